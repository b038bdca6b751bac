//! Response orchestration
//!
//! The [`Orchestrator`] turns a transcript into one assistant reply: it
//! forwards to a delegated backend when one is configured, otherwise it
//! builds the (optionally search-augmented) system prompt, resolves the
//! provider and calls it under the retry policy.

use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::backend::BackendClient;
use crate::chat::{ChatMessage, ChatResponse};
use crate::config::Config;
use crate::error::{ParleyError, Result};
use crate::providers::{ChatProvider, ProviderKind, ProviderRegistry, resolve_provider};
use crate::retry::RetryPolicy;
use crate::search::SearchAugmenter;
use crate::stream::{ChunkSink, ReplyEvent, ReplyStream};

/// Model label reported for replies produced by a delegated backend that
/// does not name its model
const BACKEND_MODEL_LABEL: &str = "delegated-backend";

/// A complete reply with its metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub reply: String,
    pub model: String,
    pub used_search: bool,
    pub citations: Vec<String>,
    pub latency_ms: u64,
}

impl From<ChatReply> for ChatResponse {
    fn from(reply: ChatReply) -> Self {
        ChatResponse {
            reply: reply.reply,
            used_search: reply.used_search,
            model: Some(reply.model),
            latency_ms: Some(reply.latency_ms),
            citations: reply.citations,
        }
    }
}

/// Prepend the system prompt to the caller's transcript
fn build_messages(system_prompt: &str, transcript: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(transcript.len() + 1);
    messages.push(ChatMessage::system(system_prompt));
    messages.extend_from_slice(transcript);
    messages
}

#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<Config>,
    registry: Arc<ProviderRegistry>,
    augmenter: Arc<SearchAugmenter>,
    backend: Option<Arc<BackendClient>>,
    policy: RetryPolicy,
}

impl Orchestrator {
    pub fn new(
        config: Arc<Config>,
        registry: ProviderRegistry,
        augmenter: SearchAugmenter,
        backend: Option<BackendClient>,
    ) -> Self {
        let policy = config.retry.provider_policy();
        Self {
            config,
            registry: Arc::new(registry),
            augmenter: Arc::new(augmenter),
            backend: backend.map(Arc::new),
            policy,
        }
    }

    /// Build every collaborator from configuration
    pub fn from_config(config: Config) -> Result<Self> {
        let registry = ProviderRegistry::from_config(&config)?;
        let augmenter = SearchAugmenter::from_config(&config)?;
        let backend = BackendClient::from_config(&config)?;

        if let Some(ref backend) = backend {
            info!("Delegating chat requests to {}", backend.endpoint());
        }

        Ok(Self::new(Arc::new(config), registry, augmenter, backend))
    }

    /// Always call providers directly, ignoring any configured backend
    pub fn without_delegation(mut self) -> Self {
        self.backend = None;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_delegating(&self) -> bool {
        self.backend.is_some()
    }

    pub fn provider_kind(&self) -> ProviderKind {
        resolve_provider(&self.config)
    }

    fn provider(&self) -> Result<Arc<dyn ChatProvider>> {
        self.registry.get(self.provider_kind())
    }

    /// Reply text only
    pub async fn generate_response(
        &self,
        transcript: &[ChatMessage],
        use_search: bool,
    ) -> Result<String> {
        Ok(self.generate_reply(transcript, use_search).await?.reply)
    }

    /// Reply with model, search and timing metadata
    pub async fn generate_reply(
        &self,
        transcript: &[ChatMessage],
        use_search: bool,
    ) -> Result<ChatReply> {
        let started = Instant::now();

        if let Some(ref backend) = self.backend {
            let reply = backend.chat(transcript, use_search).await?;
            return Ok(ChatReply {
                reply: reply.reply,
                model: reply
                    .model
                    .unwrap_or_else(|| BACKEND_MODEL_LABEL.to_string()),
                used_search: reply.used_search,
                citations: reply.citations,
                latency_ms: started.elapsed().as_millis() as u64,
            });
        }

        // Missing credentials surface here, before any retrying.
        let provider = self.provider()?;
        let prompt = self.augmenter.augment(transcript, use_search).await;
        let messages = build_messages(&prompt.text, transcript);

        let provider_ref = &provider;
        let messages_ref = messages.as_slice();
        let reply = self
            .policy
            .run("provider_complete", move |_| {
                provider_ref.complete(messages_ref, None)
            })
            .await?;

        let latency_ms = started.elapsed().as_millis() as u64;
        info!(
            provider = %provider.kind(),
            model = provider.model(),
            used_search = prompt.used_search,
            latency_ms,
            "Generated reply"
        );

        Ok(ChatReply {
            reply,
            model: provider.model().to_string(),
            used_search: prompt.used_search,
            citations: prompt.citations,
            latency_ms,
        })
    }

    /// Stream a reply as [`ReplyEvent`]s.
    ///
    /// Fails immediately, before any I/O, when a delegated backend is
    /// configured or the provider has no credential.
    pub fn generate_response_streaming(
        &self,
        transcript: Vec<ChatMessage>,
        use_search: bool,
    ) -> Result<ReplyStream> {
        if self.backend.is_some() {
            return Err(ParleyError::Unsupported(
                "Streaming is not available through a delegated backend".to_string(),
            ));
        }

        let provider = self.provider()?;
        let this = self.clone();

        Ok(ReplyStream::spawn(move |sink| async move {
            this.stream_into(provider, transcript, use_search, sink).await;
        }))
    }

    /// Callback form of [`generate_response_streaming`](Self::generate_response_streaming).
    ///
    /// Replayed text after a retry is delivered to `on_chunk` again.
    pub async fn generate_response_streaming_with<F>(
        &self,
        transcript: Vec<ChatMessage>,
        use_search: bool,
        mut on_chunk: F,
    ) -> Result<String>
    where
        F: FnMut(&str),
    {
        let mut stream = self.generate_response_streaming(transcript, use_search)?;

        while let Some(event) = stream.next().await {
            match event {
                ReplyEvent::Chunk(text) => on_chunk(&text),
                ReplyEvent::Retrying { attempt, discarded } => {
                    debug!(attempt, discarded, "Stream restarted; earlier chunks will repeat");
                }
                ReplyEvent::Completed(text) => return Ok(text),
                ReplyEvent::Failed(e) => return Err(e),
            }
        }

        Err(ParleyError::Cancelled(
            "Reply stream ended without completing".to_string(),
        ))
    }

    async fn stream_into(
        &self,
        provider: Arc<dyn ChatProvider>,
        transcript: Vec<ChatMessage>,
        use_search: bool,
        sink: ChunkSink,
    ) {
        let started = Instant::now();
        let prompt = self.augmenter.augment(&transcript, use_search).await;
        let messages = build_messages(&prompt.text, &transcript);

        let provider_ref = &provider;
        let messages_ref = messages.as_slice();
        let sink_ref = &sink;
        let outcome = self
            .policy
            .run("provider_stream", move |attempt| async move {
                let discarded = sink_ref.take_delivered();
                if attempt > 1 && discarded > 0 {
                    sink_ref
                        .emit(ReplyEvent::Retrying { attempt, discarded })
                        .await?;
                }
                provider_ref
                    .complete_streaming(messages_ref, None, sink_ref)
                    .await
            })
            .await;

        let event = match outcome {
            Ok(text) => {
                info!(
                    provider = %provider.kind(),
                    model = provider.model(),
                    used_search = prompt.used_search,
                    latency_ms = started.elapsed().as_millis() as u64,
                    "Streamed reply"
                );
                ReplyEvent::Completed(text)
            }
            Err(e) => ReplyEvent::Failed(e),
        };

        if sink.emit(event).await.is_err() {
            debug!("Reply consumer went away before completion");
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("augmenter", &self.augmenter)
            .field("delegating", &self.backend.is_some())
            .field("policy", &self.policy)
            .finish()
    }
}
