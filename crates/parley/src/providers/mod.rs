//! Chat completion providers
//!
//! Two interchangeable OpenAI-compatible providers sit behind the
//! [`ChatProvider`] trait. [`resolve_provider`] picks one from configuration
//! and [`ProviderRegistry`] owns the client for each provider that has a
//! credential.

mod http;
mod openai;
mod perplexity;

pub use openai::OpenAiProvider;
pub use perplexity::{PerplexityProvider, normalize_messages};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::chat::ChatMessage;
use crate::config::{Config, ProviderConfig};
use crate::error::{ParleyError, Result};
use crate::reasoning::strip_reasoning;
use crate::stream::ChunkSink;

/// Reply used when a provider answers with nothing usable
pub const FALLBACK_REPLY: &str = "Sorry, I couldn't generate a response. Please try again.";

/// Supported chat providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI chat completions (primary)
    OpenAi,
    /// Perplexity chat completions (secondary)
    Perplexity,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::OpenAi, ProviderKind::Perplexity];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Perplexity => "perplexity",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ParleyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "perplexity" => Ok(ProviderKind::Perplexity),
            other => Err(ParleyError::Config(format!(
                "Unknown provider '{other}': expected 'openai' or 'perplexity'"
            ))),
        }
    }
}

/// A chat completion backend
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Default model used when a call does not name one
    fn model(&self) -> &str;

    /// Request a complete reply.
    ///
    /// Reasoning sections are removed; an empty result becomes
    /// [`FALLBACK_REPLY`].
    async fn complete(&self, messages: &[ChatMessage], model: Option<&str>) -> Result<String>;

    /// Stream a reply, sending filtered fragments to `sink` in arrival order.
    ///
    /// Returns the accumulated filtered text. Fails with
    /// [`ParleyError::EmptyResponse`] when nothing was produced.
    async fn complete_streaming(
        &self,
        messages: &[ChatMessage],
        model: Option<&str>,
        sink: &ChunkSink,
    ) -> Result<String>;
}

/// Pick the provider to use for a request.
///
/// A valid explicit override wins. Otherwise Perplexity is chosen only when
/// it is the sole provider with a credential.
pub fn resolve_provider(config: &Config) -> ProviderKind {
    if let Some(name) = config.provider.name.as_deref() {
        match name.parse::<ProviderKind>() {
            Ok(kind) => return kind,
            Err(e) => warn!("Ignoring provider override: {e}"),
        }
    }

    let has_openai = config.provider_config(ProviderKind::OpenAi).has_credential();
    let has_perplexity = config
        .provider_config(ProviderKind::Perplexity)
        .has_credential();

    if has_perplexity && !has_openai {
        ProviderKind::Perplexity
    } else {
        ProviderKind::OpenAi
    }
}

/// Build the client for one provider
fn build_provider(kind: ProviderKind, config: ProviderConfig) -> Result<Arc<dyn ChatProvider>> {
    Ok(match kind {
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(config)?),
        ProviderKind::Perplexity => Arc::new(PerplexityProvider::new(config)?),
    })
}

/// Clients for every provider with a credential, built once at startup
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn ChatProvider>>,
    key_envs: HashMap<ProviderKind, String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = Self::new();

        for kind in ProviderKind::ALL {
            let provider_config = config.provider_config(kind);
            registry
                .key_envs
                .insert(kind, provider_config.api_key_env.clone());

            if !provider_config.has_credential() {
                debug!("No credential for {kind}; provider unavailable");
                continue;
            }

            info!(
                "Provider {} initialized with model: {}, base_url: {}",
                kind, provider_config.model, provider_config.base_url
            );
            registry
                .providers
                .insert(kind, build_provider(kind, provider_config)?);
        }

        Ok(registry)
    }

    /// Register or replace the client for the provider's kind
    pub fn with_provider(mut self, provider: Arc<dyn ChatProvider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Result<Arc<dyn ChatProvider>> {
        if let Some(provider) = self.providers.get(&kind) {
            return Ok(Arc::clone(provider));
        }

        let message = match self.key_envs.get(&kind) {
            Some(env) => format!("{env} is not set; the {kind} provider is unavailable"),
            None => format!("The {kind} provider is not configured"),
        };
        Err(ParleyError::Config(message))
    }

    /// Kinds with a ready client
    pub fn available(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|kind| self.providers.contains_key(kind))
            .collect()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("available", &self.available())
            .finish()
    }
}

/// Turn raw completion content into the final reply text
pub(crate) fn finalize_reply(content: Option<&str>) -> String {
    let visible = strip_reasoning(content.unwrap_or_default());
    let visible = visible.trim();
    if visible.is_empty() {
        FALLBACK_REPLY.to_string()
    } else {
        visible.to_string()
    }
}
