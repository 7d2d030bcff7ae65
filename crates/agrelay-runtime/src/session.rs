use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use agrelay_agent::AgentChild;
use agrelay_types::PromptRecord;

/// How the session entered the daemon's view. A terminal session keeps
/// `Terminal` even while a resume companion is running for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Spawned,
    Terminal,
}

/// Per-session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No child, no open prompts, no recent log activity
    Idle,
    /// A child is mid-turn, or the terminal session's log is growing
    Working,
    /// At least one open prompt
    AwaitingUser,
    /// Child exit pending teardown
    Closing,
}

/// The user just approved this tool; a fresh prompt for the same tool
/// within the TTL is approved without asking again (the child may
/// regenerate request ids across retries).
#[derive(Debug, Clone)]
pub struct ApprovalHint {
    pub tool_name: String,
    pub tool_input: Value,
    pub expires_at: DateTime<Utc>,
}

/// In-memory state of one watched session. Accessed only under the
/// per-session lock; none of it survives a daemon restart.
pub struct SessionRecord {
    pub project_path: Option<PathBuf>,
    pub origin: Origin,
    pub state: SessionState,
    /// At most one child at a time (spawned turn or retry companion)
    pub active_child: Option<Arc<AgentChild>>,
    /// Normalized messages already emitted from the log; never decreases
    pub last_log_message_count: usize,
    /// Cross-source dedup: ids emitted from stdout or the log
    pub emitted_message_ids: HashSet<String>,
    /// tool_use ids seen pending in the log on the previous scan
    /// (edge-triggered emission and out-of-band resolution)
    pub pending_prompt_ids: HashSet<String>,
    /// Open prompt records, in observation order
    pub prompts: Vec<PromptRecord>,
    /// Tools the user blanket-approved for this session
    pub allowed_tool_names: HashSet<String>,
    pub pending_approval_hint: Option<ApprovalHint>,
    /// Prompts already acted on; consulted before re-surfacing
    pub denied_prompt_ids: HashSet<String>,
    pub retried_prompt_ids: HashSet<String>,
    pub last_activity_at: Instant,
    /// The inactivity heuristic fires at most once per Working episode
    pub completion_emitted: bool,
    /// Set while a retry companion runs; the poller skips the session
    pub being_resumed_for_approval: bool,
}

impl SessionRecord {
    pub fn new(origin: Origin, project_path: Option<PathBuf>) -> Self {
        Self {
            project_path,
            origin,
            state: SessionState::Idle,
            active_child: None,
            last_log_message_count: 0,
            emitted_message_ids: HashSet::new(),
            pending_prompt_ids: HashSet::new(),
            prompts: Vec::new(),
            allowed_tool_names: HashSet::new(),
            pending_approval_hint: None,
            denied_prompt_ids: HashSet::new(),
            retried_prompt_ids: HashSet::new(),
            last_activity_at: Instant::now(),
            completion_emitted: false,
            being_resumed_for_approval: false,
        }
    }

    pub fn open_prompt(&self, request_id: &str) -> Option<&PromptRecord> {
        self.prompts.iter().find(|p| p.request_id == request_id)
    }

    pub fn remove_prompt(&mut self, request_id: &str) -> Option<PromptRecord> {
        let idx = self.prompts.iter().position(|p| p.request_id == request_id)?;
        Some(self.prompts.remove(idx))
    }

    /// Begin a Working episode (send, resume, fresh log activity, hook)
    pub fn enter_working(&mut self) {
        self.state = SessionState::Working;
        self.completion_emitted = false;
        self.last_activity_at = Instant::now();
    }

    /// Recompute AwaitingUser/Working after prompt set changes
    pub fn settle_after_prompts(&mut self) {
        if !self.prompts.is_empty() {
            self.state = SessionState::AwaitingUser;
        } else if self.state == SessionState::AwaitingUser {
            self.state = SessionState::Working;
            self.last_activity_at = Instant::now();
        }
    }

    /// Hint lookup with expiry; a hit consumes the hint
    pub fn take_valid_hint(&mut self, tool_name: &str, now: DateTime<Utc>) -> Option<ApprovalHint> {
        let hint = self.pending_approval_hint.as_ref()?;
        if hint.expires_at <= now {
            self.pending_approval_hint = None;
            return None;
        }
        if hint.tool_name != tool_name {
            return None;
        }
        self.pending_approval_hint.take()
    }

    /// Lifecycle rule: droppable once nothing references the session
    pub fn is_droppable(&self, subscriber_count: usize) -> bool {
        subscriber_count == 0
            && self.active_child.is_none()
            && self.prompts.is_empty()
            && !self.being_resumed_for_approval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agrelay_types::PromptSource;
    use chrono::Duration as ChronoDuration;

    fn prompt(request_id: &str) -> PromptRecord {
        let now = Utc::now();
        PromptRecord {
            session_id: "s".to_string(),
            request_id: request_id.to_string(),
            tool_use_id: request_id.to_string(),
            tool_name: "Bash".to_string(),
            tool_input: serde_json::json!({}),
            suggestions: None,
            source: PromptSource::Hook,
            created_at: now,
            expires_at: now + ChronoDuration::seconds(60),
        }
    }

    #[test]
    fn settle_moves_between_awaiting_and_working() {
        let mut record = SessionRecord::new(Origin::Terminal, None);
        record.enter_working();

        record.prompts.push(prompt("r1"));
        record.settle_after_prompts();
        assert_eq!(record.state, SessionState::AwaitingUser);

        record.remove_prompt("r1");
        record.settle_after_prompts();
        assert_eq!(record.state, SessionState::Working);
    }

    #[test]
    fn hint_expires_and_matches_by_tool() {
        let mut record = SessionRecord::new(Origin::Spawned, None);
        let now = Utc::now();
        record.pending_approval_hint = Some(ApprovalHint {
            tool_name: "Bash".to_string(),
            tool_input: serde_json::json!({"command": "ls"}),
            expires_at: now + ChronoDuration::seconds(30),
        });

        assert!(record.take_valid_hint("Read", now).is_none());
        assert!(record.pending_approval_hint.is_some());

        assert!(record.take_valid_hint("Bash", now).is_some());
        assert!(record.pending_approval_hint.is_none());

        record.pending_approval_hint = Some(ApprovalHint {
            tool_name: "Bash".to_string(),
            tool_input: serde_json::json!({}),
            expires_at: now - ChronoDuration::seconds(1),
        });
        assert!(record.take_valid_hint("Bash", now).is_none());
        assert!(record.pending_approval_hint.is_none());
    }

    #[test]
    fn droppable_requires_everything_clear() {
        let mut record = SessionRecord::new(Origin::Terminal, None);
        assert!(record.is_droppable(0));
        assert!(!record.is_droppable(1));

        record.prompts.push(prompt("r1"));
        assert!(!record.is_droppable(0));
    }
}
