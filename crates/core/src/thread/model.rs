//! Thread and message model definitions

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{new_id, MESSAGE_PREFIX, THREAD_PREFIX};
use crate::store::Entity;

/// Message role in a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// One part of a message body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    /// A function call the assistant asked for
    ToolCall {
        tool_call_id: String,
        name: String,
        arguments: String,
    },
    /// The client-supplied result of a function call
    ToolResult {
        tool_call_id: String,
        output: String,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// A message appended to a thread. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    pub role: MessageRole,
    pub content: Vec<ContentPart>,
    /// Position in the thread, starting at zero
    pub seq: u64,
    /// Set when the message was authored by a run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub(crate) fn new(
        thread_id: &str,
        seq: u64,
        role: MessageRole,
        content: Vec<ContentPart>,
        run_id: Option<String>,
    ) -> Self {
        Self {
            id: new_id(MESSAGE_PREFIX),
            thread_id: thread_id.to_string(),
            role,
            content,
            seq,
            run_id,
            created_at: Utc::now(),
        }
    }

    /// Concatenated text parts
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Entity for Message {
    const KIND: &'static str = "message";

    fn id(&self) -> &str {
        &self.id
    }
}

/// A message supplied by a client, before it is appended to a thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: Vec<ContentPart>,
}

impl NewMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: vec![ContentPart::text(text)],
        }
    }
}

/// A conversation: an ordered, append-only list of messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Message ids in creation order
    #[serde(default)]
    pub message_ids: Vec<String>,
    /// The run currently holding the thread, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_run_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Thread {
    pub fn new(metadata: HashMap<String, String>) -> Self {
        Self {
            id: new_id(THREAD_PREFIX),
            metadata,
            message_ids: Vec::new(),
            active_run_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn message_count(&self) -> u64 {
        self.message_ids.len() as u64
    }
}

impl Entity for Thread {
    const KIND: &'static str = "thread";

    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_thread_is_empty_and_idle() {
        let thread = Thread::new(HashMap::new());
        assert!(thread.id.starts_with("thread_"));
        assert_eq!(thread.message_count(), 0);
        assert!(thread.active_run_id.is_none());
    }

    #[test]
    fn test_message_text_joins_text_parts_only() {
        let message = Message::new(
            "thread_1",
            0,
            MessageRole::Assistant,
            vec![
                ContentPart::text("first"),
                ContentPart::ToolCall {
                    tool_call_id: "call_1".to_string(),
                    name: "lookup".to_string(),
                    arguments: "{}".to_string(),
                },
                ContentPart::text("second"),
            ],
            None,
        );

        assert_eq!(message.text(), "first\nsecond");
    }

    #[test]
    fn test_content_part_wire_form() {
        let part = ContentPart::ToolResult {
            tool_call_id: "call_1".to_string(),
            output: "42".to_string(),
        };
        let value = serde_json::to_value(&part).unwrap();

        assert_eq!(value["type"], "tool_result");
        assert_eq!(value["output"], "42");
    }
}
