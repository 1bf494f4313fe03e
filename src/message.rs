use std::fmt;

use chrono::{DateTime, Local};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde::Deserialize;
use uuid::Uuid;

/// Opaque, unique message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for MessageId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// A user's answer to a yes/no clarification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, Deserialize)]
pub enum Answer {
    Yes,
    No,
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Answer::Yes => f.write_str("Yes"),
            Answer::No => f.write_str("No"),
        }
    }
}

/// Variant-specific part of a message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    User,
    Version { version: u32, features: Vec<String> },
    Error,
    Clarification { question: String },
}

impl MessageBody {
    pub fn role(&self) -> Role {
        match self {
            MessageBody::User => Role::User,
            MessageBody::Version { .. } | MessageBody::Error => Role::System,
            MessageBody::Clarification { .. } => Role::Assistant,
        }
    }

    /// Secondary discriminator carried by system messages.
    pub fn system_type(&self) -> Option<&'static str> {
        match self {
            MessageBody::Version { .. } => Some("version"),
            MessageBody::Error => Some("error"),
            MessageBody::User | MessageBody::Clarification { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    pub timestamp: DateTime<Local>,
    pub body: MessageBody,
}

impl Message {
    fn with_body(content: String, body: MessageBody) -> Self {
        Self {
            id: MessageId::new(),
            content,
            timestamp: Local::now(),
            body,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_body(content.into(), MessageBody::User)
    }

    pub fn version(content: impl Into<String>, version: u32, features: Vec<String>) -> Self {
        Self::with_body(content.into(), MessageBody::Version { version, features })
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::with_body(content.into(), MessageBody::Error)
    }

    pub fn clarification(content: impl Into<String>, question: impl Into<String>) -> Self {
        Self::with_body(
            content.into(),
            MessageBody::Clarification {
                question: question.into(),
            },
        )
    }

    pub fn role(&self) -> Role {
        self.body.role()
    }

    pub fn question(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Clarification { question } => Some(question),
            _ => None,
        }
    }

    pub fn version_number(&self) -> Option<u32> {
        match &self.body {
            MessageBody::Version { version, .. } => Some(*version),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.body, MessageBody::Error)
    }
}

// Flat wire shape: `role` for every message, `type` for system messages.
impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("id", &self.id)?;
        map.serialize_entry("role", &self.role())?;
        if let Some(kind) = self.body.system_type() {
            map.serialize_entry("type", kind)?;
        }
        map.serialize_entry("content", &self.content)?;
        map.serialize_entry("timestamp", &self.timestamp)?;
        match &self.body {
            MessageBody::Version { version, features } => {
                map.serialize_entry("version", version)?;
                map.serialize_entry("features", features)?;
            }
            MessageBody::Clarification { question } => {
                map.serialize_entry("question", question)?;
            }
            MessageBody::User | MessageBody::Error => {}
        }
        map.end()
    }
}

/// A resolved clarification question, sent from the renderer to the controller.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, Deserialize)]
pub struct ClarificationIntent {
    pub message_id: MessageId,
    pub question: String,
    pub answer: Answer,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_follow_variants() {
        assert_eq!(Message::user("hi").role(), Role::User);
        assert_eq!(Message::version("v", 1, vec![]).role(), Role::System);
        assert_eq!(Message::error("boom").role(), Role::System);
        assert_eq!(Message::clarification("c", "q?").role(), Role::Assistant);
    }

    #[test]
    fn test_version_message_wire_shape() {
        let msg = Message::version("Created version 1", 1, vec!["Layout".to_string()]);
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["role"], "system");
        assert_eq!(json["type"], "version");
        assert_eq!(json["version"], 1);
        assert_eq!(json["features"][0], "Layout");
        assert_eq!(json["id"], msg.id.to_string());
    }

    #[test]
    fn test_clarification_wire_shape_has_no_type() {
        let msg = Message::clarification("Checking requirements", "Add charts?");
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["role"], "assistant");
        assert_eq!(json["question"], "Add charts?");
        assert!(json.get("type").is_none());
    }

    #[test]
    fn test_answer_display() {
        assert_eq!(format!("Add charts? {}", Answer::Yes), "Add charts? Yes");
        assert_eq!(Answer::No.to_string(), "No");
    }
}
