//! Transcript types shared by every stage of the reply pipeline

use serde::{Deserialize, Serialize};

/// Speaker of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single message in a conversation transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Body of `POST /chat`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub use_search: bool,
}

/// Successful `POST /chat` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub reply: String,
    #[serde(default)]
    pub used_search: bool,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub latency_ms: Option<u64>,
    #[serde(default)]
    pub citations: Vec<String>,
}

/// Find the content of the most recent user message, scanning from the end
pub fn last_user_message(transcript: &[ChatMessage]) -> Option<&str> {
    transcript
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serializes_lowercase() {
        let msg = ChatMessage::assistant("hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json, serde_json::json!({"role": "assistant", "content": "hi"}));
    }

    #[test]
    fn test_last_user_message_skips_trailing_assistant() {
        let transcript = vec![
            ChatMessage::user("first"),
            ChatMessage::assistant("reply"),
            ChatMessage::user("second"),
            ChatMessage::assistant("another reply"),
        ];
        assert_eq!(last_user_message(&transcript), Some("second"));
    }

    #[test]
    fn test_chat_request_wire_names() {
        let request: ChatRequest = serde_json::from_value(serde_json::json!({
            "messages": [{"role": "user", "content": "hi"}],
            "useSearch": true
        }))
        .unwrap();
        assert!(request.use_search);
        assert_eq!(request.messages, vec![ChatMessage::user("hi")]);

        let defaulted: ChatRequest = serde_json::from_str("{}").unwrap();
        assert!(defaulted.messages.is_empty());
        assert!(!defaulted.use_search);
    }

    #[test]
    fn test_chat_response_wire_names() {
        let response = ChatResponse {
            reply: "world".to_string(),
            used_search: true,
            model: Some("gpt-4o-mini".to_string()),
            latency_ms: Some(12),
            citations: vec!["https://example.com".to_string()],
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["usedSearch"], true);
        assert_eq!(json["latencyMs"], 12);
        assert_eq!(json["model"], "gpt-4o-mini");
    }

    #[test]
    fn test_last_user_message_none() {
        let transcript = vec![ChatMessage::assistant("only me")];
        assert_eq!(last_user_message(&transcript), None);
        assert_eq!(last_user_message(&[]), None);
    }
}
