use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    #[default]
    Sent,
    Failed,
}

/// A single chat line, either from the user or the assistant.
///
/// Optimistic messages created on the client carry the same value in `id`
/// and `local_id` until the server copy replaces them.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,
    pub user_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub status: MessageStatus,
}

impl ChatMessage {
    /// True when `other` refers to the same logical message.
    pub fn same_as(&self, other: &ChatMessage) -> bool {
        if self.id == other.id {
            return true;
        }
        match (&self.local_id, &other.local_id) {
            (Some(a), Some(b)) => a == b,
            (Some(a), None) => *a == other.id,
            (None, Some(b)) => self.id == *b,
            (None, None) => false,
        }
    }
}

// POST /messages
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub user_message: ChatMessage,
    pub assistant_message: ChatMessage,
}

// GET /messages
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MessagePage {
    pub messages: Vec<ChatMessage>,
    pub limit: u32,
    pub offset: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, local_id: Option<&str>) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            local_id: local_id.map(str::to_string),
            user_id: "u1".to_string(),
            role: Role::User,
            content: "hi".to_string(),
            created_at: Utc::now(),
            status: MessageStatus::Sent,
        }
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let json = serde_json::to_value(message("m1", Some("l1"))).unwrap();
        assert_eq!(json["localId"], "l1");
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["role"], "user");
        assert_eq!(json["status"], "sent");
        assert!(json.get("createdAt").is_some());
    }

    #[test]
    fn test_missing_status_defaults_to_sent() {
        let raw = r#"{"id":"m1","userId":"u1","role":"assistant","content":"hey","createdAt":"2026-01-02T03:04:05Z"}"#;
        let parsed: ChatMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.status, MessageStatus::Sent);
        assert_eq!(parsed.role, Role::Assistant);
        assert!(parsed.local_id.is_none());
    }

    #[test]
    fn test_same_as_matches_server_copy_of_optimistic_message() {
        let optimistic = message("l1", Some("l1"));
        let server = message("srv-9", Some("l1"));
        assert!(optimistic.same_as(&server));
        assert!(server.same_as(&optimistic));
        assert!(!message("a", None).same_as(&message("b", None)));
    }

    #[test]
    fn test_role_round_trips_through_str() {
        assert_eq!(Role::User.as_str().parse::<Role>(), Ok(Role::User));
        assert!("system".parse::<Role>().is_err());
    }
}
