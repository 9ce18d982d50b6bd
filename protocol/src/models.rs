//! The conversation model and the result shape every tool returns.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

/// One entry in a session's conversation. The runner appends these in order
/// and persists every new message immediately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
    },
    ToolResponse {
        call_id: String,
        content: String,
    },
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
            reasoning: None,
            tool_calls: Vec::new(),
        }
    }
}

/// A tool invocation requested by the model. `arguments` is kept as the raw
/// JSON string the model produced; the runner parses it and substitutes
/// `{"raw": …}` when parsing fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// What a tool hands back through the middleware chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub display_data: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff_preview: Option<DiffPreview>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub should_abridge: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub needs_approval: bool,
}

impl ToolResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn with_display(mut self, key: impl Into<String>, value: Value) -> Self {
        self.display_data.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffPreview {
    pub file_path: String,
    pub unified_diff: String,
    pub added_lines: usize,
    pub removed_lines: usize,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn assistant_message_omits_empty_fields() {
        let json = serde_json::to_value(Message::assistant("done")).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({"role": "assistant", "content": "done"})
        );
    }

    #[test]
    fn tool_result_failure_carries_error() {
        let result = ToolResult::failure("no such file");
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("no such file"));
    }
}
