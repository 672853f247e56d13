//! Telemetry primitives shared across the magnetar workspace.
//!
//! Centralises tracing-subscriber setup so every binary emits logs with the
//! same shape, and records the build identifier once so spans can carry it.

use anyhow::{Result, anyhow};
use once_cell::sync::OnceCell;
use tracing::{Span, span::Entered};
use tracing_subscriber::{EnvFilter, fmt};

use magnetar_config::{LogConfig, LogFormat};

static BUILD_SHA: OnceCell<String> = OnceCell::new();

/// Configure and install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured filter when both are present.
///
/// # Errors
///
/// Returns an error if the tracing subscriber cannot be installed (for
/// example, because another subscriber has already been set globally).
pub fn init_logging(config: &LogConfig, build_sha: &str) -> Result<()> {
    BUILD_SHA.set(build_sha.to_string()).ok().or(Some(()));

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter.clone()));

    let builder = fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false);

    let result = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
    result.map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))
}

/// Choose a sensible default log format for the current build.
#[must_use]
pub const fn infer_format() -> LogFormat {
    if cfg!(debug_assertions) {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    }
}

/// Access the build SHA recorded during logging initialisation.
#[must_use]
pub fn build_sha() -> &'static str {
    BUILD_SHA.get().map_or("dev", String::as_str)
}

/// Guard that keeps the application-level span entered for the lifetime of
/// the process.
pub struct GlobalContextGuard {
    _guard: Entered<'static>,
}

impl GlobalContextGuard {
    #[must_use]
    pub fn new(component: impl Into<String>) -> Self {
        let component = component.into();
        let span: &'static Span = Box::leak(Box::new(
            tracing::info_span!("app", component = %component, build_sha = %build_sha()),
        ));
        let guard = span.enter();
        Self { _guard: guard }
    }
}
