use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use agrelay_types::{ContentSegment, NormalizedMessage, Role, SessionMetadata, ToolCall};

use crate::discovery;
use crate::error::{Error, Result};
use crate::schema::{ChatRecord, ContentBlock, LogRecord};
use crate::sentinel::parse_retry_sentinel;

/// Derived products of one pass over a session log
#[derive(Debug, Clone, Default)]
pub struct SessionLog {
    pub messages: Vec<NormalizedMessage>,
    pub pending_tool_calls: Vec<PendingToolCall>,
}

/// A tool_use with no matching tool_result in the same log
#[derive(Debug, Clone)]
pub struct PendingToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// Read-only view over the agent's log directory.
///
/// All queries are idempotent over a fixed file state; the reader holds no
/// per-session memory and never writes.
#[derive(Debug, Clone)]
pub struct LogReader {
    log_root: PathBuf,
}

impl LogReader {
    pub fn new(log_root: impl Into<PathBuf>) -> Self {
        Self {
            log_root: log_root.into(),
        }
    }

    /// The agent's default home (`~/.claude`)
    pub fn default_root() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".claude"))
    }

    pub fn log_root(&self) -> &Path {
        &self.log_root
    }

    /// Normalize the session log into messages plus the pending set.
    ///
    /// A missing session is an error; an unreadable file is an empty
    /// result (the log is owned by another process and may be mid-rotate).
    pub fn read(&self, session_id: &str) -> Result<SessionLog> {
        let path = self
            .find_session_file(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        Ok(read_session_file(&path))
    }

    /// How many normalized messages the log currently yields
    pub fn message_count(&self, session_id: &str) -> Result<usize> {
        Ok(self.read(session_id)?.messages.len())
    }

    /// True iff the log file was modified within `window` of now
    pub fn is_recently_active(&self, session_id: &str, window: Duration) -> bool {
        let Some(path) = self.find_session_file(session_id) else {
            return false;
        };
        let Ok(modified) = path.metadata().and_then(|m| m.modified()) else {
            return false;
        };
        modified
            .elapsed()
            .map(|elapsed| elapsed < window)
            .unwrap_or(true)
    }

    /// The authoritative project directory, from the first `cwd` field
    pub fn project_of_session(&self, session_id: &str) -> Result<PathBuf> {
        let path = self
            .find_session_file(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
        discovery::extract_cwd(&path)
            .map(PathBuf::from)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    /// Model, counts and summary/slug fields for the metadata endpoint
    pub fn session_metadata(&self, session_id: &str) -> Result<SessionMetadata> {
        let path = self
            .find_session_file(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;

        let mut model = None;
        let mut project_root = None;
        let mut summary = None;
        let mut slug = None;

        for record in read_records(&path) {
            match record {
                LogRecord::Assistant(chat) => {
                    if let Some(m) = chat.message.model {
                        model = Some(m);
                    }
                    if project_root.is_none() {
                        project_root = chat.cwd;
                    }
                    if slug.is_none() {
                        slug = chat.slug;
                    }
                }
                LogRecord::User(chat) => {
                    if project_root.is_none() {
                        project_root = chat.cwd;
                    }
                    if slug.is_none() {
                        slug = chat.slug;
                    }
                }
                LogRecord::Summary(record) => summary = Some(record.summary),
                _ => {}
            }
        }

        Ok(SessionMetadata {
            session_id: session_id.to_string(),
            project_root,
            model,
            message_count: read_session_file(&path).messages.len(),
            summary,
            slug,
        })
    }

    /// Locate `<log_root>/projects/*/<session_id>.jsonl`
    pub fn find_session_file(&self, session_id: &str) -> Option<PathBuf> {
        discovery::find_session_file(&self.log_root, session_id)
    }

    pub fn list_projects(&self) -> Result<Vec<agrelay_types::ProjectSummary>> {
        discovery::list_projects(&self.log_root)
    }

    pub fn list_sessions(&self, project: &str) -> Result<Vec<agrelay_types::SessionSummary>> {
        discovery::list_sessions(&self.log_root, project)
    }
}

/// Parse every line that parses; torn or foreign lines are dropped
fn read_records(path: &Path) -> Vec<LogRecord> {
    let Ok(text) = std::fs::read_to_string(path) else {
        return Vec::new();
    };

    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| serde_json::from_str::<LogRecord>(line).ok())
        .collect()
}

fn read_session_file(path: &Path) -> SessionLog {
    normalize_records(read_records(path))
}

/// Two passes over the parsed records: first index tool results, then
/// build messages in file order with retry filtering and dedup.
fn normalize_records(records: Vec<LogRecord>) -> SessionLog {
    // Pass 1: tool_use_id -> (stringified result, is_error)
    let mut result_index: HashMap<String, (String, bool)> = HashMap::new();
    for record in &records {
        let LogRecord::User(chat) = record else {
            continue;
        };
        for block in &chat.message.content {
            if let ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } = block
            {
                result_index.insert(
                    tool_use_id.clone(),
                    (stringify_tool_result(content.as_ref()), *is_error),
                );
            }
        }
    }

    // Pass 2: message build
    let mut messages: Vec<NormalizedMessage> = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut all_tool_uses: Vec<PendingToolCall> = Vec::new();
    // Tool name named by a retry sentinel; armed until the next assistant
    // message carrying a matching tool_use is swallowed
    let mut suppress_tool: Option<String> = None;
    // tool_use ids replaced by a retry (never pending, never resolved)
    let mut replaced: HashSet<String> = HashSet::new();

    for record in &records {
        match record {
            LogRecord::User(chat) => {
                if chat.is_meta || chat.message.role != "user" {
                    continue;
                }

                if let Some(tool_name) = first_text(chat).and_then(|t| parse_retry_sentinel(t)) {
                    // The blocked original will never get a tool_result;
                    // the retried call supersedes it.
                    for call in &all_tool_uses {
                        if call.name == tool_name && !result_index.contains_key(&call.id) {
                            replaced.insert(call.id.clone());
                        }
                    }
                    suppress_tool = Some(tool_name);
                    continue;
                }

                let content = user_segments(chat);
                if content.is_empty() {
                    // Only tool_results (already indexed) or nothing visible
                    continue;
                }

                let id = chat.uuid.clone();
                if seen.contains_key(&id) {
                    continue;
                }
                seen.insert(id.clone(), messages.len());
                messages.push(NormalizedMessage {
                    id,
                    role: Role::User,
                    content,
                    tool_calls: Vec::new(),
                    timestamp: parse_timestamp(&chat.timestamp),
                });
            }

            LogRecord::Assistant(chat) => {
                if chat.message.role != "assistant" {
                    continue;
                }

                let tool_uses: Vec<(&String, &String, &Value)> = chat
                    .message
                    .content
                    .iter()
                    .filter_map(|block| match block {
                        ContentBlock::ToolUse { id, name, input } => Some((id, name, input)),
                        _ => None,
                    })
                    .collect();

                for (id, name, input) in &tool_uses {
                    all_tool_uses.push(PendingToolCall {
                        id: (*id).clone(),
                        name: (*name).clone(),
                        input: (*input).clone(),
                    });
                }

                if let Some(tool_name) = &suppress_tool
                    && tool_uses.iter().any(|(_, name, _)| *name == tool_name)
                {
                    // The retried tool_use rides on this message; neither
                    // the sentinel nor the re-raise is surfaced.
                    suppress_tool = None;
                    continue;
                }

                let id = chat
                    .message
                    .id
                    .clone()
                    .unwrap_or_else(|| chat.uuid.clone());

                let new_tool_calls: Vec<ToolCall> = tool_uses
                    .iter()
                    .map(|(id, name, input)| {
                        let (result, is_error) = result_index
                            .get(*id)
                            .map(|(out, err)| (Some(out.clone()), *err))
                            .unwrap_or((None, false));
                        ToolCall {
                            id: (*id).clone(),
                            name: (*name).clone(),
                            input: (*input).clone(),
                            result,
                            is_error,
                        }
                    })
                    .collect();

                if let Some(&idx) = seen.get(&id) {
                    // Later log line for the same streamed assistant turn:
                    // attach tool calls not already present
                    let existing = &mut messages[idx];
                    for call in new_tool_calls {
                        if !existing.tool_calls.iter().any(|c| c.id == call.id) {
                            existing.tool_calls.push(call);
                        }
                    }
                    continue;
                }

                seen.insert(id.clone(), messages.len());
                messages.push(NormalizedMessage {
                    id,
                    role: Role::Assistant,
                    content: assistant_segments(chat),
                    tool_calls: new_tool_calls,
                    timestamp: parse_timestamp(&chat.timestamp),
                });
            }

            // summary / queue-operation / unknown: not chat, never surfaced
            _ => {}
        }
    }

    let pending_tool_calls = all_tool_uses
        .into_iter()
        .filter(|call| !result_index.contains_key(&call.id) && !replaced.contains(&call.id))
        .collect();

    SessionLog {
        messages,
        pending_tool_calls,
    }
}

fn first_text(chat: &ChatRecord) -> Option<&str> {
    chat.message.content.iter().find_map(|block| match block {
        ContentBlock::Text { text } => Some(text.as_str()),
        _ => None,
    })
}

fn user_segments(chat: &ChatRecord) -> Vec<ContentSegment> {
    chat.message
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(ContentSegment::Text { text: text.clone() }),
            ContentBlock::Image { source } => Some(ContentSegment::Image {
                media_type: source.as_ref().and_then(|s| s.media_type.clone()),
                url: source.as_ref().and_then(|s| s.url.clone()),
            }),
            _ => None,
        })
        .collect()
}

fn assistant_segments(chat: &ChatRecord) -> Vec<ContentSegment> {
    chat.message
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(ContentSegment::Text { text: text.clone() }),
            _ => None,
        })
        .collect()
}

/// Canonical string form of a tool_result body: strings pass through,
/// text-block lists are joined, anything else is serialized
fn stringify_tool_result(content: Option<&Value>) -> String {
    match content {
        None => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => {
            let texts: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect();
            if texts.is_empty() {
                serde_json::to_string(items).unwrap_or_default()
            } else {
                texts.join("\n")
            }
        }
        Some(other) => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn parse_timestamp(ts: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
