use async_trait::async_trait;

use super::http::CompletionsClient;
use super::{ChatProvider, ProviderKind, finalize_reply};
use crate::chat::ChatMessage;
use crate::config::ProviderConfig;
use crate::error::Result;
use crate::stream::ChunkSink;

/// OpenAI chat completions client
#[derive(Debug)]
pub struct OpenAiProvider {
    http: CompletionsClient,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        Ok(Self {
            http: CompletionsClient::new(config)?,
        })
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn model(&self) -> &str {
        &self.http.config().model
    }

    async fn complete(&self, messages: &[ChatMessage], model: Option<&str>) -> Result<String> {
        let response = self.http.complete(messages, model).await?;
        Ok(finalize_reply(response.content()))
    }

    async fn complete_streaming(
        &self,
        messages: &[ChatMessage],
        model: Option<&str>,
        sink: &ChunkSink,
    ) -> Result<String> {
        self.http.stream(messages, model, sink).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParleyError;
    use crate::providers::FALLBACK_REPLY;
    use crate::stream::ReplyEvent;
    use std::time::{Duration, Instant};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_config(base_url: String) -> ProviderConfig {
        ProviderConfig {
            api_key: Some("test-key".to_string()),
            api_key_env: "OPENAI_API_KEY".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url,
            timeout_secs: 5,
            max_tokens: 1000,
            temperature: 0.7,
        }
    }

    fn transcript() -> Vec<ChatMessage> {
        vec![
            ChatMessage::system("You are a helpful assistant."),
            ChatMessage::user("hello"),
        ]
    }

    fn sse_body(deltas: &[&str]) -> String {
        let mut body = String::new();
        for delta in deltas {
            let event = serde_json::json!({"choices": [{"delta": {"content": delta}}]});
            body.push_str(&format!("data: {event}\n\n"));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    #[test]
    fn test_new_requires_credential() {
        let mut config = create_test_config("https://api.openai.com/v1".to_string());
        config.api_key = None;
        let err = OpenAiProvider::new(config).unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[tokio::test]
    async fn test_complete_sends_expected_request() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "max_tokens": 1000,
                "messages": [
                    {"role": "system", "content": "You are a helpful assistant."},
                    {"role": "user", "content": "hello"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "world"}}]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = OpenAiProvider::new(create_test_config(mock_server.uri())).unwrap();
        let reply = provider.complete(&transcript(), None).await.unwrap();
        assert_eq!(reply, "world");
    }

    #[tokio::test]
    async fn test_complete_strips_reasoning_and_falls_back() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "<think>nothing to say</think>"}}]
            })))
            .mount(&mock_server)
            .await;

        let provider = OpenAiProvider::new(create_test_config(mock_server.uri())).unwrap();
        let reply = provider.complete(&transcript(), None).await.unwrap();
        assert_eq!(reply, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn test_complete_model_override() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"model": "gpt-4o"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "ok"}}]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = OpenAiProvider::new(create_test_config(mock_server.uri())).unwrap();
        assert_eq!(provider.complete(&transcript(), Some("gpt-4o")).await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_complete_error_status() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&mock_server)
            .await;

        let provider = OpenAiProvider::new(create_test_config(mock_server.uri())).unwrap();
        let err = provider.complete(&transcript(), None).await.unwrap_err();
        assert!(matches!(err, ParleyError::Provider(_)));
        let message = err.to_string();
        assert!(message.contains("429"));
        assert!(message.contains("rate limited"));
    }

    #[tokio::test]
    async fn test_complete_malformed_body() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&mock_server)
            .await;

        let provider = OpenAiProvider::new(create_test_config(mock_server.uri())).unwrap();
        let err = provider.complete(&transcript(), None).await.unwrap_err();
        assert!(matches!(err, ParleyError::Provider(_)));
    }

    #[tokio::test]
    async fn test_complete_unreachable_is_network_error() {
        // Nothing listens on the discard port.
        let provider =
            OpenAiProvider::new(create_test_config("http://127.0.0.1:9".to_string())).unwrap();
        let err = provider.complete(&transcript(), None).await.unwrap_err();
        assert!(matches!(err, ParleyError::Network(_)));
    }

    #[tokio::test]
    async fn test_streaming_filters_and_forwards_chunks() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({"stream": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse_body(&["<th", "ink>plan</think>", "Hel", "lo"])),
            )
            .mount(&mock_server)
            .await;

        let provider = OpenAiProvider::new(create_test_config(mock_server.uri())).unwrap();
        let (sink, mut rx) = ChunkSink::channel(16);

        let reply = provider
            .complete_streaming(&transcript(), None, &sink)
            .await
            .unwrap();
        assert_eq!(reply, "Hello");
        drop(sink);

        let mut chunks = Vec::new();
        while let Some(event) = rx.recv().await {
            if let ReplyEvent::Chunk(text) = event {
                chunks.push(text);
            }
        }
        assert_eq!(chunks, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn test_streaming_only_reasoning_is_empty_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(sse_body(&["<think>", "hidden"])),
            )
            .mount(&mock_server)
            .await;

        let provider = OpenAiProvider::new(create_test_config(mock_server.uri())).unwrap();
        let (sink, _rx) = ChunkSink::channel(16);

        let err = provider
            .complete_streaming(&transcript(), None, &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, ParleyError::EmptyResponse(_)));
    }

    #[tokio::test]
    async fn test_streaming_consumer_gone_is_cancelled() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&["Hello"])))
            .mount(&mock_server)
            .await;

        let provider = OpenAiProvider::new(create_test_config(mock_server.uri())).unwrap();
        let (sink, rx) = ChunkSink::channel(16);
        drop(rx);

        let err = provider
            .complete_streaming(&transcript(), None, &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, ParleyError::Cancelled(_)));
    }

    /// Read one HTTP request, headers and body, off the socket
    async fn read_request(socket: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);

            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
                let length = head
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    /// Serve one streamed completion, writing each delta after its delay
    async fn spawn_trickling_server(events: Vec<(Duration, &'static str)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;

            let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n";
            if socket.write_all(head.as_bytes()).await.is_err() {
                return;
            }
            for (delay, delta) in events {
                tokio::time::sleep(delay).await;
                let event = serde_json::json!({"choices": [{"delta": {"content": delta}}]});
                if socket
                    .write_all(format!("data: {event}\n\n").as_bytes())
                    .await
                    .is_err()
                {
                    return;
                }
            }
            let _ = socket.write_all(b"data: [DONE]\n\n").await;
            let _ = socket.shutdown().await;
        });

        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_streaming_outlives_timeout_while_data_flows() {
        let gap = Duration::from_millis(400);
        let base_url = spawn_trickling_server(vec![
            (gap, "a"),
            (gap, "b"),
            (gap, "c"),
            (gap, "d"),
            (gap, "e"),
            (gap, "f"),
        ])
        .await;

        let mut config = create_test_config(base_url);
        config.timeout_secs = 1;
        let provider = OpenAiProvider::new(config).unwrap();
        let (sink, _rx) = ChunkSink::channel(16);

        let started = Instant::now();
        let reply = provider
            .complete_streaming(&transcript(), None, &sink)
            .await
            .unwrap();

        assert_eq!(reply, "abcdef");
        assert!(started.elapsed() > Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_streaming_fails_when_stream_stalls() {
        let base_url = spawn_trickling_server(vec![
            (Duration::ZERO, "Hel"),
            (Duration::from_secs(5), "lo"),
        ])
        .await;

        let mut config = create_test_config(base_url);
        config.timeout_secs = 1;
        let provider = OpenAiProvider::new(config).unwrap();
        let (sink, _rx) = ChunkSink::channel(16);

        let started = Instant::now();
        let err = provider
            .complete_streaming(&transcript(), None, &sink)
            .await
            .unwrap_err();

        assert!(matches!(err, ParleyError::Network(_)));
        assert!(err.to_string().contains("stalled"));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
