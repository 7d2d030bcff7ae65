use std::fmt;

/// Result type for agrelay-runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types surfaced to API callers
#[derive(Debug)]
pub enum Error {
    /// The session id is not present in any project's log directory
    SessionNotFound(String),

    /// Child could not be launched, or exited before providing a session id
    SpawnFailed(String),

    /// A send was issued while the session already has an active child
    ConcurrentSend(String),

    /// A permission response targets an unknown prompt
    PromptNotFound(String),

    /// Log reading failed below the reader's recover-locally layer
    Logs(agrelay_logs::Error),

    /// Child stdio failed mid-operation
    Agent(agrelay_agent::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::SessionNotFound(id) => write!(f, "Session not found: {}", id),
            Error::SpawnFailed(msg) => write!(f, "Spawn failed: {}", msg),
            Error::ConcurrentSend(id) => {
                write!(f, "Session {} already has an active child", id)
            }
            Error::PromptNotFound(id) => write!(f, "No open prompt with request id: {}", id),
            Error::Logs(err) => write!(f, "Log error: {}", err),
            Error::Agent(err) => write!(f, "Agent error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Logs(err) => Some(err),
            Error::Agent(err) => Some(err),
            _ => None,
        }
    }
}

impl From<agrelay_logs::Error> for Error {
    fn from(err: agrelay_logs::Error) -> Self {
        match err {
            agrelay_logs::Error::SessionNotFound(id) => Error::SessionNotFound(id),
            other => Error::Logs(other),
        }
    }
}

impl From<agrelay_agent::Error> for Error {
    fn from(err: agrelay_agent::Error) -> Self {
        match err {
            agrelay_agent::Error::Spawn(msg) => Error::SpawnFailed(msg),
            other => Error::Agent(other),
        }
    }
}
