use serde::Deserialize;
use serde_json::Value;

/// One line of the agent's session log.
///
/// The format is owned by the agent and evolves without notice; every
/// variant and field the daemon does not consume falls through to
/// `Unknown` / `IgnoredAny` rather than failing the line.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type")]
#[serde(rename_all = "kebab-case")]
pub(crate) enum LogRecord {
    User(ChatRecord),
    Assistant(ChatRecord),
    Summary(SummaryRecord),
    QueueOperation(QueueOperationRecord),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChatRecord {
    pub uuid: String,
    pub timestamp: String,
    pub message: ChatMessage,
    #[serde(default)]
    pub is_meta: bool,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub(crate) struct ChatMessage {
    pub role: String,
    /// API message id; present on assistant entries, shared across the
    /// multiple log lines of one streamed assistant turn
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(deserialize_with = "deserialize_content", default)]
    pub content: Vec<ContentBlock>,
}

/// `content` is either a bare string or a list of typed blocks
fn deserialize_content<'de, D>(deserializer: D) -> Result<Vec<ContentBlock>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrBlocks {
        String(String),
        Blocks(Vec<ContentBlock>),
    }

    match StringOrBlocks::deserialize(deserializer)? {
        StringOrBlocks::String(s) => Ok(vec![ContentBlock::Text { text: s }]),
        StringOrBlocks::Blocks(blocks) => Ok(blocks),
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub(crate) enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Option<Value>,
        #[serde(default)]
        is_error: bool,
    },
    Image {
        #[serde(default)]
        source: Option<ImageSource>,
    },
    #[serde(other)]
    Unknown,
}

/// Image block source descriptor. `data` (base64 payload) is deliberately
/// not captured; normalized messages carry references, not bytes.
#[derive(Debug, Deserialize, Clone)]
pub(crate) struct ImageSource {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SummaryRecord {
    pub summary: String,
    #[serde(default)]
    pub leaf_uuid: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QueueOperationRecord {
    #[serde(default)]
    pub operation: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user_string_content() {
        let line = r#"{"type":"user","uuid":"u-1","timestamp":"2026-01-01T00:00:00Z","message":{"role":"user","content":"hello"}}"#;
        let record: LogRecord = serde_json::from_str(line).unwrap();
        match record {
            LogRecord::User(chat) => {
                assert_eq!(chat.uuid, "u-1");
                assert!(matches!(
                    chat.message.content.as_slice(),
                    [ContentBlock::Text { text }] if text == "hello"
                ));
            }
            _ => panic!("Expected user record"),
        }
    }

    #[test]
    fn test_parse_assistant_tool_use() {
        let line = r#"{"type":"assistant","uuid":"a-1","timestamp":"2026-01-01T00:00:01Z","message":{"role":"assistant","id":"msg_01","model":"sonnet","content":[{"type":"tool_use","id":"toolu_1","name":"Bash","input":{"command":"ls"}}]}}"#;
        let record: LogRecord = serde_json::from_str(line).unwrap();
        match record {
            LogRecord::Assistant(chat) => {
                assert_eq!(chat.message.id.as_deref(), Some("msg_01"));
                assert!(matches!(
                    chat.message.content.as_slice(),
                    [ContentBlock::ToolUse { id, name, .. }] if id == "toolu_1" && name == "Bash"
                ));
            }
            _ => panic!("Expected assistant record"),
        }
    }

    #[test]
    fn test_unknown_type_falls_through() {
        let line = r#"{"type":"file-history-snapshot","messageId":"m","snapshot":{}}"#;
        let record: LogRecord = serde_json::from_str(line).unwrap();
        assert!(matches!(record, LogRecord::Unknown));
    }

    #[test]
    fn test_queue_operation_kebab_tag() {
        let line = r#"{"type":"queue-operation","operation":"enqueue","sessionId":"s"}"#;
        let record: LogRecord = serde_json::from_str(line).unwrap();
        assert!(matches!(record, LogRecord::QueueOperation(_)));
    }

    #[test]
    fn test_unknown_content_block() {
        let line = r#"{"type":"user","uuid":"u-2","timestamp":"2026-01-01T00:00:00Z","message":{"role":"user","content":[{"type":"server_tool_use","id":"x"}]}}"#;
        let record: LogRecord = serde_json::from_str(line).unwrap();
        match record {
            LogRecord::User(chat) => {
                assert!(matches!(
                    chat.message.content.as_slice(),
                    [ContentBlock::Unknown]
                ));
            }
            _ => panic!("Expected user record"),
        }
    }
}
