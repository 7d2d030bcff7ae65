use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a normalized message actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One content segment of a normalized message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum ContentSegment {
    Text {
        text: String,
    },
    /// Reference to an image block (payload bytes stay in the log)
    Image {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
}

/// A tool invocation attached to an assistant message,
/// enriched with its result once the log contains one
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// tool_use id as reported by the agent
    pub id: String,
    pub name: String,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default)]
    pub is_error: bool,
}

/// Normalized message — the UI event contract.
///
/// `id` is agent-assigned: the API message id for assistant entries (so a
/// copy seen on child stdout and a copy read back from the log coincide),
/// the record uuid for user entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedMessage {
    pub id: String,
    pub role: Role,
    pub content: Vec<ContentSegment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    pub timestamp: DateTime<Utc>,
}

impl NormalizedMessage {
    /// True when the message carries nothing a human would see
    pub fn is_visibly_empty(&self) -> bool {
        self.content.is_empty() && self.tool_calls.is_empty()
    }

    /// Concatenated text segments (convenience for snippets and tests)
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ContentSegment::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization_round_trip() {
        let msg = NormalizedMessage {
            id: "msg_01".to_string(),
            role: Role::Assistant,
            content: vec![ContentSegment::Text {
                text: "Running ls".to_string(),
            }],
            tool_calls: vec![ToolCall {
                id: "toolu_01".to_string(),
                name: "Bash".to_string(),
                input: serde_json::json!({"command": "ls"}),
                result: Some("Cargo.toml\nsrc".to_string()),
                is_error: false,
            }],
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&msg).unwrap();
        let back: NormalizedMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "msg_01");
        assert_eq!(back.tool_calls.len(), 1);
        assert_eq!(back.text(), "Running ls");
    }

    #[test]
    fn test_empty_tool_calls_omitted() {
        let msg = NormalizedMessage {
            id: "u-1".to_string(),
            role: Role::User,
            content: vec![ContentSegment::Text {
                text: "hi".to_string(),
            }],
            tool_calls: vec![],
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("tool_calls"));
    }
}
