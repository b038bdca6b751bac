//! Client for a delegated Parley-compatible chat service
//!
//! When a backend URL is configured the whole request, search flag
//! included, is forwarded to `{base_url}/chat` and the provider path is
//! skipped entirely.

use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::chat::{ChatMessage, ChatRequest};
use crate::config::Config;
use crate::error::{ParleyError, Result};
use crate::retry::RetryPolicy;

/// Loosely typed backend response. Older services name the reply field
/// `response` or `message` instead of `reply`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackendResponse {
    #[serde(default)]
    reply: Option<String>,
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    used_search: bool,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    citations: Vec<String>,
}

impl BackendResponse {
    fn reply_text(&self) -> Option<&str> {
        [&self.reply, &self.response, &self.message]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|text| !text.is_empty())
    }
}

/// Reply returned by the delegated backend
#[derive(Debug, Clone, PartialEq)]
pub struct BackendReply {
    pub reply: String,
    pub used_search: bool,
    pub model: Option<String>,
    pub citations: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BackendClient {
    client: Client,
    endpoint: String,
    policy: RetryPolicy,
}

impl BackendClient {
    pub fn new(base_url: &str, timeout: Duration, policy: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ParleyError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat", base_url.trim_end_matches('/')),
            policy,
        })
    }

    /// Client for the configured backend, if any
    pub fn from_config(config: &Config) -> Result<Option<Self>> {
        config
            .backend
            .base_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .map(|url| {
                Self::new(
                    url,
                    Duration::from_secs(config.backend.timeout_secs),
                    config.retry.backend_policy(),
                )
            })
            .transpose()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Forward the conversation, retrying whole requests on failure
    pub async fn chat(&self, transcript: &[ChatMessage], use_search: bool) -> Result<BackendReply> {
        let request = ChatRequest {
            messages: transcript.to_vec(),
            use_search,
        };

        let body = self
            .policy
            .run("backend_chat", |_| self.send(&request))
            .await?;

        // A well-formed answer without reply text is final, not retried.
        let reply = body
            .reply_text()
            .ok_or_else(|| {
                ParleyError::Provider("Backend response contained no reply".to_string())
            })?
            .to_string();

        Ok(BackendReply {
            reply,
            used_search: body.used_search,
            model: body.model,
            citations: body.citations,
        })
    }

    async fn send(&self, request: &ChatRequest) -> Result<BackendResponse> {
        debug!("Forwarding chat request to {}", self.endpoint);

        let response = self.client.post(&self.endpoint).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ParleyError::status(status, &body));
        }

        let body: BackendResponse = response.json().await?;

        if let Some(error) = body.error.as_ref().filter(|e| !e.is_null()) {
            let message = error
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(ParleyError::Provider(format!("Backend reported: {message}")));
        }

        Ok(body)
    }
}
