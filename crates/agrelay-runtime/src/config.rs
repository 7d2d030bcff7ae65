use std::path::PathBuf;
use std::time::Duration;

/// Tools whose prompts may be inferred from the log alone. Everything
/// else is expected to arrive via a hook callback.
pub const FILE_PROMPT_TOOLS: &[&str] = &["AskUserQuestion"];

/// Timing and location knobs for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// The agent's home directory (session logs live under `projects/`)
    pub log_root: PathBuf,
    /// Binary to exec for spawned children
    pub agent_binary: String,
    /// Cadence of the shared log poller
    pub poll_interval: Duration,
    /// TTL of an open permission prompt
    pub prompt_ttl: Duration,
    /// Ceiling on one spawned send (child is killed on expiry)
    pub send_ceiling: Duration,
    /// Budget for the session-id handshake on a new-session spawn
    pub handshake_timeout: Duration,
    /// Budget for a retry companion before SIGTERM
    pub companion_budget: Duration,
    /// TTL of the pending-approval hint
    pub approval_hint_ttl: Duration,
    /// Quiet time after which a Working terminal session is considered done
    pub inactivity_window: Duration,
    /// Recency window for file-prompt detection and prompt replay
    pub activity_window: Duration,
    /// Subscriber heartbeat cadence
    pub heartbeat_interval: Duration,
}

impl RuntimeConfig {
    pub fn new(log_root: impl Into<PathBuf>) -> Self {
        Self {
            log_root: log_root.into(),
            agent_binary: "claude".to_string(),
            poll_interval: Duration::from_secs(1),
            prompt_ttl: Duration::from_secs(60),
            send_ceiling: Duration::from_secs(5 * 60),
            handshake_timeout: Duration::from_secs(10),
            companion_budget: Duration::from_secs(30),
            approval_hint_ttl: Duration::from_secs(30),
            inactivity_window: Duration::from_secs(10),
            activity_window: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(15),
        }
    }
}
