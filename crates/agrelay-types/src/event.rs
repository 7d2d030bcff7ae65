use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::NormalizedMessage;
use crate::prompt::PromptRecord;

/// Event payload variants of the uniform per-session stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum EventPayload {
    /// Subscription acknowledged (first frame a subscriber sees)
    Connected,

    /// Liveness frame, every 15 s
    Heartbeat,

    /// A normalized message. Never duplicated within a session.
    Message { message: NormalizedMessage },

    /// An open permission prompt. Emitted once per (session, request id).
    PermissionRequest { prompt: PromptRecord },

    /// A prompt is no longer open (answered, retried, denied, or its
    /// tool_result appeared in the log)
    PermissionResolved {
        request_id: String,
        tool_use_id: String,
    },

    /// A prompt hit its TTL. Spawned prompts are followed by child
    /// termination; hook/file prompt records survive for re-display.
    PermissionTimeout { request_id: String },

    /// User requested abort; the active child was signalled with SIGINT
    SessionAborted,

    /// Synthesized turn completion for terminal sessions, for parity
    /// with the spawned "result" signal
    ProcessingComplete,
}

/// One frame of the uniform event stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl SessionEvent {
    pub fn new(session_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            session_id: session_id.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Wire name of the payload variant, used as the SSE event name
    pub fn kind(&self) -> &'static str {
        match self.payload {
            EventPayload::Connected => "connected",
            EventPayload::Heartbeat => "heartbeat",
            EventPayload::Message { .. } => "message",
            EventPayload::PermissionRequest { .. } => "permission_request",
            EventPayload::PermissionResolved { .. } => "permission_resolved",
            EventPayload::PermissionTimeout { .. } => "permission_timeout",
            EventPayload::SessionAborted => "session_aborted",
            EventPayload::ProcessingComplete => "processing_complete",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flattened_tag() {
        let event = SessionEvent::new(
            "sess-1",
            EventPayload::PermissionResolved {
                request_id: "r1".to_string(),
                tool_use_id: "toolu_1".to_string(),
            },
        );

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "permission_resolved");
        assert_eq!(json["session_id"], "sess-1");
        assert_eq!(json["request_id"], "r1");
        assert_eq!(event.kind(), "permission_resolved");
    }

    #[test]
    fn test_round_trip() {
        let event = SessionEvent::new("sess-1", EventPayload::ProcessingComplete);
        let json = serde_json::to_string(&event).unwrap();
        let back: SessionEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(back.payload, EventPayload::ProcessingComplete));
    }
}
