// Error types
pub mod error;

// Timing and location knobs
pub mod config;

// Per-session record and state machine
pub mod session;

// Pending-prompt policies (allow-list, hint, suppression)
pub mod prompts;

// Client subscription registry with bounded fan-out
pub mod subscribers;

// The per-session owner: send flows, prompts, poller, companions
mod coordinator;

// Daemon value wiring coordinator + registry + background tasks
mod runtime;

pub use agrelay_agent::ImagePayload;
pub use config::{FILE_PROMPT_TOOLS, RuntimeConfig};
pub use coordinator::{Coordinator, HookNotification, SendOptions};
pub use error::{Error, Result};
pub use runtime::Daemon;
pub use session::{Origin, SessionState};
pub use subscribers::{SubscriberRegistry, Subscription};
