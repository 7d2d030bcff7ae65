// Error types
pub mod error;

// Log record schema (foreign wire format, owned by the agent)
pub(crate) mod schema;

// Two-pass normalization into messages + pending tool calls
mod reader;

// Project/session discovery over the agent's log directory
mod discovery;

// Retry sentinel (produced by the runtime, filtered here)
mod sentinel;

pub use discovery::munge_project_path;
pub use error::{Error, Result};
pub use reader::{LogReader, PendingToolCall, SessionLog};
pub use sentinel::{parse_retry_sentinel, retry_sentinel};
