//! Session error taxonomy.

use std::fmt;

/// Errors surfaced by the session layer.
///
/// None of these are fatal to the process: the session stays in, or returns
/// to, the disconnected state and the caller decides whether to retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Bind or connect could not be started (port in use, bad address, ...).
    Transport { reason: String },
    /// An outbound join was rejected or timed out.
    Connection { reason: String },
    /// The authority went away while we were joined.
    AuthorityLost,
}

impl SessionError {
    pub fn transport(reason: impl Into<String>) -> Self {
        SessionError::Transport {
            reason: reason.into(),
        }
    }

    pub fn connection(reason: impl Into<String>) -> Self {
        SessionError::Connection {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Transport { reason } => write!(f, "transport error: {reason}"),
            SessionError::Connection { reason } => write!(f, "connection error: {reason}"),
            SessionError::AuthorityLost => write!(f, "authority disconnected"),
        }
    }
}

impl std::error::Error for SessionError {}
