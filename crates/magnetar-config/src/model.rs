//! Typed configuration models.
//!
//! # Design
//! - Pure data carriers; loading and validation live in `lib.rs`.
//! - Every field has a sensible default so an empty environment boots.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Overlay bootstrap gate tunables.
    pub bootstrap: BootstrapConfig,
    /// Transfer engine call tunables.
    pub engine: EngineConfig,
    /// Periodic reconciliation tunables.
    pub reconcile: ReconcileConfig,
    /// Logging output tunables.
    pub log: LogConfig,
}

/// Settings for the overlay readiness gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Minimum overlay participants before submissions are allowed.
    pub min_participants: u64,
    /// Delay between participant-count polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// Overall deadline for a single readiness wait, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            min_participants: 10,
            poll_interval_ms: 1_000,
            timeout_ms: 10_000,
        }
    }
}

impl BootstrapConfig {
    /// Poll delay as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Readiness deadline as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Settings for calls into the transfer engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Deadline applied to every engine call, in milliseconds.
    pub call_timeout_ms: u64,
    /// Directory handed to the engine for payload storage.
    pub work_dir: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 10_000,
            work_dir: "downloads".to_owned(),
        }
    }
}

impl EngineConfig {
    /// Engine call deadline as a [`Duration`].
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Settings for the periodic reconciliation sweep.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Delay between reconciliation sweeps, in milliseconds.
    pub interval_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self { interval_ms: 5_000 }
    }
}

impl ReconcileConfig {
    /// Sweep delay as a [`Duration`].
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Settings for the tracing subscriber.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// Output format for log lines.
    pub format: LogFormat,
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            filter: "info".to_owned(),
        }
    }
}

/// Log line rendering style.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-oriented multi-line output.
    #[default]
    Pretty,
    /// Machine-oriented JSON lines.
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::invalid(
                "log",
                "format",
                Some(other.to_owned()),
                "must be 'pretty' or 'json'",
            )),
        }
    }
}

impl LogFormat {
    /// Render the format as its lowercase string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}
