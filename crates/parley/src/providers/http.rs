//! Shared client for OpenAI-compatible `/chat/completions` endpoints

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chat::ChatMessage;
use crate::config::ProviderConfig;
use crate::error::{ParleyError, Result};
use crate::reasoning::ReasoningFilter;
use crate::sse::SseReader;
use crate::stream::ChunkSink;

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

/// Non-streaming completion response
#[derive(Debug, Deserialize)]
pub(crate) struct CompletionResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
    /// Source URLs, returned by Perplexity's online models
    #[serde(default)]
    pub citations: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Choice {
    pub message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl CompletionResponse {
    pub fn content(&self) -> Option<&str> {
        self.choices.first()?.message.content.as_deref()
    }
}

/// One streamed completion chunk
#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// HTTP plumbing common to both providers
#[derive(Debug)]
pub(crate) struct CompletionsClient {
    client: Client,
    config: ProviderConfig,
    api_key: String,
    endpoint: String,
}

impl CompletionsClient {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                ParleyError::Config(format!("{} is not set", config.api_key_env))
            })?;

        // Only connecting is bounded client-wide; `send` and `stream` set
        // their own limits.
        let client = Client::builder()
            .connect_timeout(config.timeout())
            .build()
            .map_err(|e| ParleyError::Config(format!("Failed to build HTTP client: {e}")))?;

        let endpoint = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));

        Ok(Self {
            client,
            config,
            api_key,
            endpoint,
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        model: Option<&str>,
        stream: bool,
    ) -> Result<reqwest::Response> {
        let request = CompletionRequest {
            model: model.unwrap_or(self.config.model.as_str()),
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream,
        };

        debug!(
            "Calling {} (model: {}, messages: {}, stream: {})",
            self.endpoint,
            request.model,
            messages.len(),
            stream
        );

        let builder = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request);

        let limit = self.config.timeout();
        let response = if stream {
            // Only the wait for headers is bounded here; the body is bounded
            // per chunk by the SSE reader.
            tokio::time::timeout(limit, builder.send())
                .await
                .map_err(|_| {
                    ParleyError::Network(format!(
                        "No response from {} within {limit:?}",
                        self.endpoint
                    ))
                })??
        } else {
            builder.timeout(limit).send().await?
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ParleyError::status(status, &body));
        }

        Ok(response)
    }

    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        model: Option<&str>,
    ) -> Result<CompletionResponse> {
        let response = self.send(messages, model, false).await?;
        Ok(response.json::<CompletionResponse>().await?)
    }

    /// Stream a completion through the reasoning filter into `sink`
    pub async fn stream(
        &self,
        messages: &[ChatMessage],
        model: Option<&str>,
        sink: &ChunkSink,
    ) -> Result<String> {
        let response = self.send(messages, model, true).await?;
        let mut reader = SseReader::new(Box::pin(response.bytes_stream()))
            .with_idle_timeout(self.config.timeout());
        let mut filter = ReasoningFilter::new();
        let mut reply = String::new();

        while let Some(chunk) = reader.next_record::<StreamChunk>().await? {
            for choice in chunk.choices {
                if let Some(delta) = choice.delta.content {
                    let visible = filter.push(&delta);
                    forward(sink, &mut reply, visible).await?;
                }
            }
        }
        forward(sink, &mut reply, filter.finish()).await?;

        if reply.trim().is_empty() {
            return Err(ParleyError::EmptyResponse(
                "Stream produced no reply text".to_string(),
            ));
        }

        debug!(
            "Stream finished: {} chars, {} malformed events skipped",
            reply.len(),
            reader.skipped()
        );
        Ok(reply)
    }
}

async fn forward(sink: &ChunkSink, reply: &mut String, visible: String) -> Result<()> {
    if visible.is_empty() {
        return Ok(());
    }
    reply.push_str(&visible);
    sink.send(visible).await
}
