//! Error types for session lifecycle operations.
//!
//! Messages stay constant; operational context lives in fields so callers
//! can log structured detail without parsing strings.

use thiserror::Error;

use crate::model::SessionId;

/// Primary error type for session commands.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The request was malformed or conflicted with an existing session.
    #[error("invalid argument")]
    InvalidArgument {
        /// Static reason describing the rejected input.
        reason: &'static str,
    },
    /// No session exists for the given identifier.
    #[error("session not found")]
    NotFound {
        /// Missing session identifier.
        session_id: SessionId,
    },
    /// A network call to the transfer engine failed or timed out.
    #[error("transfer engine unavailable")]
    EngineUnavailable {
        /// Operation that could not be serviced.
        operation: &'static str,
        /// Underlying failure.
        #[source]
        source: anyhow::Error,
    },
    /// The discovery overlay never reached the minimum participant count.
    #[error("overlay bootstrap timed out")]
    BootstrapTimeout {
        /// Total time spent waiting, in milliseconds.
        waited_ms: u64,
    },
    /// The engine reported a fatal transfer fault for this session.
    #[error("unrecoverable transfer fault")]
    Unrecoverable {
        /// Engine-supplied fault description.
        message: String,
    },
}

impl SessionError {
    /// Helper for engine call failures with structured operation context.
    pub fn engine(operation: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::EngineUnavailable {
            operation,
            source: source.into(),
        }
    }
}

/// Convenience alias for session operation results.
pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn display_messages_are_constant() {
        let cases: Vec<(SessionError, &str)> = vec![
            (
                SessionError::InvalidArgument {
                    reason: "malformed magnet",
                },
                "invalid argument",
            ),
            (
                SessionError::NotFound {
                    session_id: SessionId::new(),
                },
                "session not found",
            ),
            (
                SessionError::BootstrapTimeout { waited_ms: 10_000 },
                "overlay bootstrap timed out",
            ),
            (
                SessionError::Unrecoverable {
                    message: "disk full".into(),
                },
                "unrecoverable transfer fault",
            ),
        ];
        for (err, message) in cases {
            assert_eq!(err.to_string(), message);
            assert!(err.source().is_none());
        }
    }

    #[test]
    fn engine_helper_preserves_source() {
        let err = SessionError::engine("submit", anyhow::anyhow!("connection refused"));
        assert_eq!(err.to_string(), "transfer engine unavailable");
        let source = err.source().expect("engine errors carry a source");
        assert_eq!(source.to_string(), "connection refused");
    }
}
