//! The chat message sum type.
//!
//! Transcripts are append-only sequences of these four variants. The
//! store persists them, the orchestrator translates them into the LLM
//! wire shape, and the HTTP API returns them to the browser.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry in a conversation transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ChatMessage {
    /// Text typed by the user.
    User { content: String },
    /// Text produced by the assistant.
    Assistant { content: String },
    /// The assistant requested a tool invocation.
    ToolUse {
        tool_name: String,
        tool_input: Value,
        tool_use_id: String,
    },
    /// The outcome of a prior tool invocation.
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
        }
    }

    pub fn tool_use(
        tool_name: impl Into<String>,
        tool_input: Value,
        tool_use_id: impl Into<String>,
    ) -> Self {
        Self::ToolUse {
            tool_name: tool_name.into(),
            tool_input,
            tool_use_id: tool_use_id.into(),
        }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
        }
    }

    /// The stored role tag for this variant.
    pub fn role(&self) -> &'static str {
        match self {
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
            Self::ToolUse { .. } => "tool_use",
            Self::ToolResult { .. } => "tool_result",
        }
    }

    /// Correlation id, present on the two tool variants.
    pub fn tool_use_id(&self) -> Option<&str> {
        match self {
            Self::ToolUse { tool_use_id, .. } | Self::ToolResult { tool_use_id, .. } => {
                Some(tool_use_id)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn role_tags_are_stable() {
        assert_eq!(ChatMessage::user("hi").role(), "user");
        assert_eq!(ChatMessage::assistant("yo").role(), "assistant");
        assert_eq!(
            ChatMessage::tool_use("query", json!({}), "u1").role(),
            "tool_use"
        );
        assert_eq!(ChatMessage::tool_result("u1", "1").role(), "tool_result");
    }

    #[test]
    fn serde_round_trip_keeps_variant() {
        let msg = ChatMessage::tool_use("query", json!({"sql": "SELECT 1"}), "u1");
        let text = serde_json::to_string(&msg).unwrap();
        assert!(text.contains(r#""role":"tool_use""#));
        let back: ChatMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(back, msg);
    }
}
