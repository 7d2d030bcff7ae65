use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where an open permission prompt was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptSource {
    /// Raised on stdout by a child this daemon spawned; answerable over stdin
    Spawned,
    /// Announced by an out-of-band callback from a terminal agent
    Hook,
    /// Inferred from the session log (tool_use without tool_result)
    File,
}

/// One open permission prompt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRecord {
    pub session_id: String,
    /// Dedup key within the session. Equals `tool_use_id` for hook/file
    /// prompts; child-chosen for spawned prompts.
    pub request_id: String,
    pub tool_use_id: String,
    pub tool_name: String,
    pub tool_input: Value,
    /// Alternative inputs the child will accept (spawned prompts only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Value>,
    pub source: PromptSource,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PromptRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let prompt = PromptRecord {
            session_id: "s1".to_string(),
            request_id: "r1".to_string(),
            tool_use_id: "toolu_1".to_string(),
            tool_name: "Bash".to_string(),
            tool_input: serde_json::json!({"command": "ls"}),
            suggestions: None,
            source: PromptSource::Spawned,
            created_at: now,
            expires_at: now + Duration::seconds(60),
        };

        assert!(!prompt.is_expired(now));
        assert!(prompt.is_expired(now + Duration::seconds(61)));
    }

    #[test]
    fn test_source_wire_form() {
        let json = serde_json::to_string(&PromptSource::Hook).unwrap();
        assert_eq!(json, "\"hook\"");
    }
}
