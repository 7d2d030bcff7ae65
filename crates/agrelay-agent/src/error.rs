use std::fmt;

/// Result type for agrelay-agent operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while driving an agent child
#[derive(Debug)]
pub enum Error {
    /// IO operation failed
    Io(std::io::Error),

    /// Child could not be launched
    Spawn(String),

    /// Frame serialization failed
    Json(serde_json::Error),

    /// The child's stdin is gone (process exited or was killed)
    ChildGone,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Spawn(msg) => write!(f, "Failed to spawn agent: {}", msg),
            Error::Json(err) => write!(f, "JSON error: {}", err),
            Error::ChildGone => write!(f, "Agent child is no longer running"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::Spawn(_) | Error::ChildGone => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}
