use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single transcript entry. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self { role, content: content.into(), timestamp: Utc::now() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMetadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user_email: Option<String>,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl ConversationMetadata {
    pub fn new(model: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            user_email: None,
            model: model.into(),
            ended_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    #[serde(rename = "conversation_id")]
    pub id: String,
    pub messages: Vec<Message>,
    pub metadata: ConversationMetadata,
}

impl Conversation {
    pub fn new(id: String, model: impl Into<String>) -> Self {
        Self { id, messages: Vec::new(), metadata: ConversationMetadata::new(model) }
    }

    /// Plain-text transcript used for the end-of-conversation email.
    pub fn snapshot(&self) -> String {
        let mut lines = vec![format!("Conversation ID: {}", self.id), "=".repeat(40)];
        for (idx, msg) in self.messages.iter().enumerate() {
            let role = match msg.role {
                MessageRole::User => "User",
                MessageRole::Assistant => "Assistant",
            };
            lines.push(format!("{}. [{role}] {}", idx + 1, msg.content));
        }
        lines.join("\n")
    }
}

/// Row returned by the conversation listing.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub message_count: usize,
    pub last_message: Option<Message>,
    pub metadata: ConversationMetadata,
}

// ── Chat contract ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub user_email: Option<String>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: Some(message.into()), ..Default::default() }
    }

    pub fn in_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn from_email(mut self, email: impl Into<String>) -> Self {
        self.user_email = Some(email.into());
        self
    }
}

/// Success carries `conversation_id`, failure carries `error` with an empty `response`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChatResponse {
    pub fn reply(response: String, conversation_id: String) -> Self {
        Self { response, conversation_id: Some(conversation_id), error: None }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self { response: String::new(), conversation_id: None, error: Some(error.into()) }
    }
}

// ── Management contract ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct EndConversationRequest {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub user_email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SwitchModelRequest {
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub provider_ready: bool,
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub current_model: String,
    pub available_models: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelSwitch {
    pub old_model: String,
    pub new_model: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_serialize_lowercase() {
        let json = serde_json::to_value(Message::user("hi")).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(MessageRole::Assistant.to_string(), "assistant");
        let role: MessageRole = serde_json::from_value(serde_json::json!("assistant")).unwrap();
        assert_eq!(role, MessageRole::Assistant);
        assert!(serde_json::from_value::<MessageRole>(serde_json::json!("system")).is_err());
    }

    #[test]
    fn failure_response_has_empty_reply_and_no_id() {
        let json = serde_json::to_value(ChatResponse::failure("boom")).unwrap();
        assert_eq!(json["response"], "");
        assert_eq!(json["error"], "boom");
        assert!(json.get("conversation_id").is_none());
    }

    #[test]
    fn snapshot_numbers_messages_with_roles() {
        let mut conv = Conversation::new("abc".into(), "m");
        conv.messages.push(Message::user("Hello"));
        conv.messages.push(Message::assistant("Hi there"));
        let text = conv.snapshot();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Conversation ID: abc");
        assert_eq!(lines[1], "=".repeat(40));
        assert_eq!(lines[2], "1. [User] Hello");
        assert_eq!(lines[3], "2. [Assistant] Hi there");
    }
}
