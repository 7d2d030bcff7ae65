use serde::{Deserialize, Serialize};
use serde_json::Value;

use agrelay_types::{ContentSegment, NormalizedMessage, Role, ToolCall};

// ─── stdout frames ───────────────────────────────────────────────────────────

/// One line of the child's `--output-format stream-json` stdout
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub(crate) enum StdoutFrame {
    /// Handshake and housekeeping. `subtype: "init"` carries the session
    /// id the child minted (or resumed).
    System {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },
    Assistant {
        message: ChatBody,
        #[serde(default)]
        uuid: Option<String>,
    },
    User {
        message: ChatBody,
        #[serde(default)]
        uuid: Option<String>,
    },
    /// Turn completion
    Result {
        #[serde(default)]
        subtype: Option<String>,
        #[serde(default)]
        is_error: bool,
    },
    /// Permission prompt raised over stdio
    ControlRequest {
        request_id: String,
        request: ControlRequestBody,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "subtype")]
#[serde(rename_all = "snake_case")]
pub(crate) enum ControlRequestBody {
    CanUseTool {
        tool_name: String,
        input: Value,
        #[serde(default)]
        tool_use_id: Option<String>,
        #[serde(default)]
        permission_suggestions: Option<Value>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize, Clone)]
pub(crate) struct ChatBody {
    pub role: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(deserialize_with = "deserialize_blocks", default)]
    pub content: Vec<Block>,
}

fn deserialize_blocks<'de, D>(deserializer: D) -> Result<Vec<Block>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrBlocks {
        String(String),
        Blocks(Vec<Block>),
    }

    match StringOrBlocks::deserialize(deserializer)? {
        StringOrBlocks::String(s) => Ok(vec![Block::Text { text: s }]),
        StringOrBlocks::Blocks(blocks) => Ok(blocks),
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub(crate) enum Block {
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
        source: Option<Value>,
    },
    #[serde(other)]
    Unknown,
}

/// Unwrap a chat frame into the UI contract. Returns `None` for frames a
/// human would not see (tool_result-only user wraps, empty bodies).
pub(crate) fn normalize_chat(
    body: &ChatBody,
    uuid: Option<&str>,
    timestamp: chrono::DateTime<chrono::Utc>,
) -> Option<NormalizedMessage> {
    let role = match body.role.as_str() {
        "user" => Role::User,
        "assistant" => Role::Assistant,
        _ => return None,
    };

    let mut content = Vec::new();
    let mut tool_calls = Vec::new();

    for block in &body.content {
        match block {
            Block::Text { text } => content.push(ContentSegment::Text { text: text.clone() }),
            Block::Image { source } => content.push(ContentSegment::Image {
                media_type: source
                    .as_ref()
                    .and_then(|s| s.get("media_type"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                url: source
                    .as_ref()
                    .and_then(|s| s.get("url"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }),
            Block::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
                result: None,
                is_error: false,
            }),
            // Results are attached by the log reader once the log has
            // them; thinking never surfaces
            Block::ToolResult { .. } | Block::Thinking { .. } | Block::Unknown => {}
        }
    }

    if content.is_empty() && tool_calls.is_empty() {
        return None;
    }

    let id = body
        .id
        .clone()
        .or_else(|| uuid.map(str::to_string))
        .unwrap_or_else(fallback_id);

    Some(NormalizedMessage {
        id,
        role,
        content,
        tool_calls,
        timestamp,
    })
}

/// Last-resort id for a frame missing both message id and uuid
fn fallback_id() -> String {
    format!(
        "wire-{}",
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
    )
}

// ─── stdin frames ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub(crate) struct UserTurnFrame {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub message: UserTurnBody,
}

#[derive(Debug, Serialize)]
pub(crate) struct UserTurnBody {
    pub role: &'static str,
    pub content: Vec<Value>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ControlResponseFrame {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub response: ControlResponseBody,
}

#[derive(Debug, Serialize)]
pub(crate) struct ControlResponseBody {
    pub subtype: &'static str,
    pub request_id: String,
    pub response: Value,
}

pub(crate) fn user_turn_frame(text: &str, images: &[crate::child::ImagePayload]) -> UserTurnFrame {
    let mut content = vec![serde_json::json!({"type": "text", "text": text})];
    for image in images {
        content.push(serde_json::json!({
            "type": "image",
            "source": {
                "type": "base64",
                "media_type": image.media_type,
                "data": image.data,
            },
        }));
    }
    UserTurnFrame {
        kind: "user",
        message: UserTurnBody {
            role: "user",
            content,
        },
    }
}

pub(crate) fn permission_response_frame(
    request_id: &str,
    allow: bool,
    updated_input: Option<Value>,
    deny_message: Option<&str>,
) -> ControlResponseFrame {
    let response = if allow {
        match updated_input {
            Some(input) => serde_json::json!({"behavior": "allow", "updatedInput": input}),
            None => serde_json::json!({"behavior": "allow"}),
        }
    } else {
        serde_json::json!({
            "behavior": "deny",
            "message": deny_message.unwrap_or("Denied by user"),
        })
    };

    ControlResponseFrame {
        kind: "control_response",
        response: ControlResponseBody {
            subtype: "success",
            request_id: request_id.to_string(),
            response,
        },
    }
}
