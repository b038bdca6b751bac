//! Perplexity chat completions client
//!
//! Perplexity speaks the OpenAI wire format but rejects transcripts whose
//! system content is scattered or whose user/assistant turns do not
//! alternate, so requests are normalized before sending.

use async_trait::async_trait;
use tracing::debug;

use super::http::CompletionsClient;
use super::{ChatProvider, ProviderKind, finalize_reply};
use crate::chat::{ChatMessage, Role};
use crate::config::ProviderConfig;
use crate::error::Result;
use crate::stream::ChunkSink;

#[derive(Debug)]
pub struct PerplexityProvider {
    http: CompletionsClient,
}

impl PerplexityProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        Ok(Self {
            http: CompletionsClient::new(config)?,
        })
    }
}

/// Merge all system content into one leading message and coalesce
/// consecutive turns from the same speaker.
pub fn normalize_messages(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();

    let mut normalized = Vec::with_capacity(messages.len());
    if !system.is_empty() {
        normalized.push(ChatMessage::system(system.join("\n\n")));
    }

    for message in messages.iter().filter(|m| m.role != Role::System) {
        match normalized.last_mut() {
            Some(last) if last.role == message.role => {
                last.content.push_str("\n\n");
                last.content.push_str(&message.content);
            }
            _ => normalized.push(message.clone()),
        }
    }

    normalized
}

#[async_trait]
impl ChatProvider for PerplexityProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Perplexity
    }

    fn model(&self) -> &str {
        &self.http.config().model
    }

    async fn complete(&self, messages: &[ChatMessage], model: Option<&str>) -> Result<String> {
        let messages = normalize_messages(messages);
        let response = self.http.complete(&messages, model).await?;
        if !response.citations.is_empty() {
            debug!("Perplexity citations: {:?}", response.citations);
        }
        Ok(finalize_reply(response.content()))
    }

    async fn complete_streaming(
        &self,
        messages: &[ChatMessage],
        model: Option<&str>,
        sink: &ChunkSink,
    ) -> Result<String> {
        let messages = normalize_messages(messages);
        self.http.stream(&messages, model, sink).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_config(base_url: String) -> ProviderConfig {
        ProviderConfig {
            api_key: Some("pplx-key".to_string()),
            api_key_env: "PERPLEXITY_API_KEY".to_string(),
            model: "llama-3.1-sonar-large-128k-online".to_string(),
            base_url,
            timeout_secs: 5,
            max_tokens: 2048,
            temperature: 0.7,
        }
    }

    #[test]
    fn test_normalize_merges_system_and_coalesces_turns() {
        let messages = vec![
            ChatMessage::system("base"),
            ChatMessage::user("one"),
            ChatMessage::user("two"),
            ChatMessage::system("late instruction"),
            ChatMessage::assistant("reply"),
            ChatMessage::user("three"),
        ];

        let normalized = normalize_messages(&messages);
        assert_eq!(
            normalized,
            vec![
                ChatMessage::system("base\n\nlate instruction"),
                ChatMessage::user("one\n\ntwo"),
                ChatMessage::assistant("reply"),
                ChatMessage::user("three"),
            ]
        );
    }

    #[test]
    fn test_normalize_without_system() {
        let messages = vec![ChatMessage::user("hi")];
        assert_eq!(normalize_messages(&messages), messages);
    }

    #[tokio::test]
    async fn test_complete_uses_base_url_and_token_ceiling() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer pplx-key"))
            .and(body_partial_json(serde_json::json!({
                "model": "llama-3.1-sonar-large-128k-online",
                "max_tokens": 2048,
                "messages": [
                    {"role": "system", "content": "a\n\nb"},
                    {"role": "user", "content": "q"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "answer"}}],
                "citations": ["https://example.com/source"]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = PerplexityProvider::new(create_test_config(mock_server.uri())).unwrap();
        let messages = vec![
            ChatMessage::system("a"),
            ChatMessage::system("b"),
            ChatMessage::user("q"),
        ];
        assert_eq!(provider.complete(&messages, None).await.unwrap(), "answer");
        assert_eq!(provider.kind(), ProviderKind::Perplexity);
    }
}
