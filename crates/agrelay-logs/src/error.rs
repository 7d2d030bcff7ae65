use std::fmt;

/// Result type for agrelay-logs operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the log-reading layer
#[derive(Debug)]
pub enum Error {
    /// IO operation failed
    Io(std::io::Error),

    /// No log file exists for the session id in any project directory
    SessionNotFound(String),

    /// No project directory matches the given path
    ProjectNotFound(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::SessionNotFound(id) => write!(f, "Session not found: {}", id),
            Error::ProjectNotFound(path) => write!(f, "Project not found: {}", path),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::SessionNotFound(_) | Error::ProjectNotFound(_) => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}
