//! Chat message model and normalization.
//!
//! Messages arrive from the client in a loose shape (content may be a string,
//! an array of text parts, or missing) and are stored as a JSON array in the
//! `chats.messages` column.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use tama_llm::{ChatMessage, ChatRole};

/// Speaker of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
    Data,
}

/// Message body. Always serialized as a string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MessageContent {
    Text(String),
    #[default]
    Empty,
}

impl MessageContent {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::Empty => "",
        }
    }

    pub fn is_blank(&self) -> bool {
        self.as_str().trim().is_empty()
    }

    fn from_value(value: Value) -> Self {
        let text = match value {
            Value::String(s) => s,
            // Multi-part content: keep the text parts in order.
            Value::Array(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    Value::String(s) => Some(s.as_str()),
                    Value::Object(obj) => obj.get("text").and_then(Value::as_str),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
            _ => String::new(),
        };

        if text.is_empty() {
            Self::Empty
        } else {
            Self::Text(text)
        }
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        Self::from_value(Value::String(text.to_string()))
    }
}

impl Serialize for MessageContent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageContent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from_value)
    }
}

/// File reference attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// A single chat message as exchanged with the client and persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default)]
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_invocations: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Assistant reply produced by generation.
    pub fn assistant(id: impl Into<String>, text: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
            attachments: Vec::new(),
            tool_invocations: None,
            created_at: Some(at),
        }
    }

    /// No text worth sending and nothing attached.
    pub fn is_blank(&self) -> bool {
        self.content.is_blank() && self.attachments.is_empty()
    }

    /// Provider-facing form. Only user and assistant turns are forwarded;
    /// attachments are appended as reference lines.
    pub fn to_chat_message(&self) -> Option<ChatMessage> {
        let role = match self.role {
            Role::User => ChatRole::User,
            Role::Assistant => ChatRole::Assistant,
            Role::System | Role::Tool | Role::Data => return None,
        };

        let mut content = self.content.as_str().to_string();
        for attachment in &self.attachments {
            if !content.is_empty() {
                content.push('\n');
            }
            let name = attachment.name.as_deref().unwrap_or("file");
            match &attachment.content_type {
                Some(ct) => content.push_str(&format!("[Attachment: {} ({})] {}", name, ct, attachment.url)),
                None => content.push_str(&format!("[Attachment: {}] {}", name, attachment.url)),
            }
        }

        Some(ChatMessage { role, content })
    }
}

/// Drop blank messages, trim text and fill in missing ids and timestamps.
///
/// Applying it twice gives the same result as applying it once.
pub fn normalize_messages(messages: Vec<Message>, now: DateTime<Utc>) -> Vec<Message> {
    messages
        .into_iter()
        .filter(|m| !m.is_blank())
        .map(|mut m| {
            m.content = MessageContent::from(m.content.as_str().trim());
            if m.id.trim().is_empty() {
                m.id = nanoid::nanoid!();
            }
            if m.created_at.is_none() {
                m.created_at = Some(now);
            }
            m
        })
        .collect()
}

/// Keep only the most recent `max` messages, preserving order.
pub fn keep_most_recent(mut messages: Vec<Message>, max: usize) -> Vec<Message> {
    if messages.len() > max {
        messages.drain(..messages.len() - max);
    }
    messages
}
