//! # Design
//!
//! - Centralize application-level errors for bootstrap wiring.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use std::io;

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration operations failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: magnetar_config::ConfigError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: anyhow::Error,
    },
    /// Session lifecycle operations failed.
    #[error("session operation failed")]
    Session {
        /// Operation identifier.
        operation: &'static str,
        /// Source session error.
        source: magnetar_session::SessionError,
    },
    /// IO operations failed.
    #[error("io operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Source IO error.
        source: io::Error,
    },
}

impl AppError {
    /// Wrap a configuration error with an operation identifier.
    #[must_use]
    pub const fn config(operation: &'static str, source: magnetar_config::ConfigError) -> Self {
        Self::Config { operation, source }
    }

    /// Wrap a telemetry error with an operation identifier.
    #[must_use]
    pub fn telemetry(operation: &'static str, source: anyhow::Error) -> Self {
        Self::Telemetry { operation, source }
    }

    /// Wrap a session error with an operation identifier.
    #[must_use]
    pub const fn session(operation: &'static str, source: magnetar_session::SessionError) -> Self {
        Self::Session { operation, source }
    }

    /// Wrap an IO error with an operation identifier.
    #[must_use]
    pub const fn io(operation: &'static str, source: io::Error) -> Self {
        Self::Io { operation, source }
    }
}
