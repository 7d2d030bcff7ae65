use chrono::{DateTime, Utc};
use serde_json::Value;

use agrelay_types::PromptRecord;

use crate::session::SessionRecord;

/// What to do with a newly observed prompt
#[derive(Debug, PartialEq)]
pub enum PromptDecision {
    /// Answer yes without fanning out to clients
    AutoApprove,
    /// Already acted on (or already open); do not surface again
    Suppress,
    /// Register, fan out, arm the TTL
    Surface,
}

/// The policy chain consulted for every newly observed prompt, in order:
/// blanket allow-list, unexpired approval hint (consumed on hit), the
/// denied/retried suppression sets, then surface.
pub fn decide(record: &mut SessionRecord, prompt: &PromptRecord, now: DateTime<Utc>) -> PromptDecision {
    // Dedup on (session, request id): an open prompt is never re-raised
    if record.open_prompt(&prompt.request_id).is_some() {
        return PromptDecision::Suppress;
    }

    if record.allowed_tool_names.contains(&prompt.tool_name) {
        return PromptDecision::AutoApprove;
    }

    if record.take_valid_hint(&prompt.tool_name, now).is_some() {
        return PromptDecision::AutoApprove;
    }

    if record.denied_prompt_ids.contains(&prompt.request_id)
        || record.retried_prompt_ids.contains(&prompt.request_id)
    {
        return PromptDecision::Suppress;
    }

    PromptDecision::Surface
}

/// Prompts to replay to a fresh subscriber: every open prompt, minus any
/// the user already acted on (the sets guard against races where a
/// response landed between registration and replay).
pub fn replayable<'a>(record: &'a SessionRecord) -> Vec<&'a PromptRecord> {
    record
        .prompts
        .iter()
        .filter(|p| {
            !record.denied_prompt_ids.contains(&p.request_id)
                && !record.retried_prompt_ids.contains(&p.request_id)
        })
        .collect()
}

/// Whether a pending tool call in the log may be surfaced as a
/// file-source prompt. Deliberately narrow: other tools announce
/// themselves via hooks, and a slow tool is not a blocked one.
pub fn file_prompt_eligible(tool_name: &str) -> bool {
    crate::config::FILE_PROMPT_TOOLS.contains(&tool_name)
}

/// Build a prompt record with the runtime's TTL applied
pub fn make_prompt(
    session_id: &str,
    request_id: &str,
    tool_use_id: &str,
    tool_name: &str,
    tool_input: Value,
    suggestions: Option<Value>,
    source: agrelay_types::PromptSource,
    ttl: std::time::Duration,
) -> PromptRecord {
    let now = Utc::now();
    PromptRecord {
        session_id: session_id.to_string(),
        request_id: request_id.to_string(),
        tool_use_id: tool_use_id.to_string(),
        tool_name: tool_name.to_string(),
        tool_input,
        suggestions,
        source,
        created_at: now,
        expires_at: now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(60)),
    }
}
