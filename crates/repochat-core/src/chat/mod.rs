//! Chat payload types
//!
//! The inbound request shape: an ordered message sequence plus the id of the
//! repository the question is about. The core never mutates history, it only
//! reads and reformats it.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Role of a message in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// System message (instructions/context)
    System,
    /// User message (human input)
    User,
    /// Assistant message (model response)
    Assistant,
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatRole::System => write!(f, "system"),
            ChatRole::User => write!(f, "user"),
            ChatRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// A message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender
    pub role: ChatRole,
    /// Content of the message
    pub content: String,
}

impl ChatMessage {
    /// Create a new message
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }
}

/// Inbound request payload
///
/// The last message is the active question; everything before it is history.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    /// Ordered conversation, at least one entry
    pub messages: Vec<ChatMessage>,
    /// Identifier of the repository the question targets
    pub selected_repo_id: String,
}

impl ChatPayload {
    /// Create a payload from messages and a repository id
    pub fn new(messages: Vec<ChatMessage>, selected_repo_id: impl Into<String>) -> Self {
        Self {
            messages,
            selected_repo_id: selected_repo_id.into(),
        }
    }

    /// Validate required fields
    ///
    /// A payload must carry at least one message and a non-empty repository
    /// id before any resolution or retrieval happens.
    pub fn validate(&self) -> Result<()> {
        if self.messages.is_empty() {
            return Err(Error::InvalidRequest(
                "messages must contain at least one entry".to_string(),
            ));
        }
        if self.selected_repo_id.trim().is_empty() {
            return Err(Error::InvalidRequest(
                "selectedRepoId must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The active question: content of the last message
    pub fn question(&self) -> &str {
        self.messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }

    /// Prior turns, excluding the active question
    pub fn history(&self) -> &[ChatMessage] {
        match self.messages.len() {
            0 => &[],
            n => &self.messages[..n - 1],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_display() {
        assert_eq!(ChatRole::User.to_string(), "user");
        assert_eq!(ChatRole::Assistant.to_string(), "assistant");
        assert_eq!(ChatRole::System.to_string(), "system");
    }

    #[test]
    fn test_payload_wire_format() {
        let json = r#"{
            "messages": [{"role": "user", "content": "What does X do?"}],
            "selectedRepoId": "R1"
        }"#;

        let payload: ChatPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.selected_repo_id, "R1");
        assert_eq!(payload.messages.len(), 1);
        assert_eq!(payload.messages[0].role, ChatRole::User);
    }

    #[test]
    fn test_validate_rejects_empty_messages() {
        let payload = ChatPayload::new(vec![], "R1");
        let err = payload.validate().unwrap_err();
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn test_validate_rejects_blank_repo_id() {
        let payload = ChatPayload::new(vec![ChatMessage::user("hi")], "  ");
        let err = payload.validate().unwrap_err();
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn test_question_is_last_message() {
        let payload = ChatPayload::new(
            vec![
                ChatMessage::user("a"),
                ChatMessage::assistant("b"),
                ChatMessage::user("c"),
            ],
            "R1",
        );
        assert_eq!(payload.question(), "c");
    }

    #[test]
    fn test_history_excludes_last_message() {
        let payload = ChatPayload::new(
            vec![
                ChatMessage::user("a"),
                ChatMessage::assistant("b"),
                ChatMessage::user("c"),
            ],
            "R1",
        );

        let history = payload.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "a");
        assert_eq!(history[1].content, "b");
    }

    #[test]
    fn test_history_of_single_message_is_empty() {
        let payload = ChatPayload::new(vec![ChatMessage::user("only")], "R1");
        assert!(payload.history().is_empty());
        assert_eq!(payload.question(), "only");
    }
}
