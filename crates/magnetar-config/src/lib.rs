#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Runtime configuration for the magnetar workspace.
//!
//! Configuration starts from built-in defaults and is overridden by
//! `MAGNETAR_*` environment variables. Loading is total: every override is
//! parsed and validated up front so the rest of the system never sees a
//! half-formed value.

mod error;
mod model;

pub use error::{ConfigError, ConfigResult};
pub use model::{
    AppConfig, BootstrapConfig, EngineConfig, LogConfig, LogFormat, ReconcileConfig,
};

use std::str::FromStr;

/// Environment variable names recognised by [`AppConfig::from_env`].
const ENV_BOOTSTRAP_MIN_PARTICIPANTS: &str = "MAGNETAR_BOOTSTRAP_MIN_PARTICIPANTS";
const ENV_BOOTSTRAP_POLL_INTERVAL_MS: &str = "MAGNETAR_BOOTSTRAP_POLL_INTERVAL_MS";
const ENV_BOOTSTRAP_TIMEOUT_MS: &str = "MAGNETAR_BOOTSTRAP_TIMEOUT_MS";
const ENV_ENGINE_CALL_TIMEOUT_MS: &str = "MAGNETAR_ENGINE_CALL_TIMEOUT_MS";
const ENV_ENGINE_WORK_DIR: &str = "MAGNETAR_ENGINE_WORK_DIR";
const ENV_RECONCILE_INTERVAL_MS: &str = "MAGNETAR_RECONCILE_INTERVAL_MS";
const ENV_LOG_FORMAT: &str = "MAGNETAR_LOG_FORMAT";
const ENV_LOG_FILTER: &str = "MAGNETAR_LOG_FILTER";

impl AppConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] when an override is present but
    /// unparseable, or when the resulting document fails validation.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source. Exposed so
    /// tests can avoid mutating process-wide environment state.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_BOOTSTRAP_MIN_PARTICIPANTS) {
            config.bootstrap.min_participants =
                parse_u64("bootstrap", "min_participants", &raw)?;
        }
        if let Some(raw) = lookup(ENV_BOOTSTRAP_POLL_INTERVAL_MS) {
            config.bootstrap.poll_interval_ms = parse_u64("bootstrap", "poll_interval_ms", &raw)?;
        }
        if let Some(raw) = lookup(ENV_BOOTSTRAP_TIMEOUT_MS) {
            config.bootstrap.timeout_ms = parse_u64("bootstrap", "timeout_ms", &raw)?;
        }
        if let Some(raw) = lookup(ENV_ENGINE_CALL_TIMEOUT_MS) {
            config.engine.call_timeout_ms = parse_u64("engine", "call_timeout_ms", &raw)?;
        }
        if let Some(raw) = lookup(ENV_ENGINE_WORK_DIR) {
            config.engine.work_dir = raw;
        }
        if let Some(raw) = lookup(ENV_RECONCILE_INTERVAL_MS) {
            config.reconcile.interval_ms = parse_u64("reconcile", "interval_ms", &raw)?;
        }
        if let Some(raw) = lookup(ENV_LOG_FORMAT) {
            config.log.format = LogFormat::from_str(&raw)?;
        }
        if let Some(raw) = lookup(ENV_LOG_FILTER) {
            config.log.filter = raw;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] naming the first offending
    /// section and field.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.bootstrap.min_participants == 0 {
            return Err(ConfigError::invalid(
                "bootstrap",
                "min_participants",
                Some(self.bootstrap.min_participants.to_string()),
                "must be at least 1",
            ));
        }
        if self.bootstrap.poll_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "bootstrap",
                "poll_interval_ms",
                Some(self.bootstrap.poll_interval_ms.to_string()),
                "must be positive",
            ));
        }
        if self.bootstrap.timeout_ms < self.bootstrap.poll_interval_ms {
            return Err(ConfigError::invalid(
                "bootstrap",
                "timeout_ms",
                Some(self.bootstrap.timeout_ms.to_string()),
                "must be at least the poll interval",
            ));
        }
        if self.engine.call_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "engine",
                "call_timeout_ms",
                Some(self.engine.call_timeout_ms.to_string()),
                "must be positive",
            ));
        }
        if self.engine.work_dir.trim().is_empty() {
            return Err(ConfigError::invalid(
                "engine",
                "work_dir",
                None,
                "must not be empty",
            ));
        }
        if self.reconcile.interval_ms == 0 {
            return Err(ConfigError::invalid(
                "reconcile",
                "interval_ms",
                Some(self.reconcile.interval_ms.to_string()),
                "must be positive",
            ));
        }
        Ok(())
    }
}

fn parse_u64(section: &'static str, field: &'static str, raw: &str) -> ConfigResult<u64> {
    raw.trim().parse::<u64>().map_err(|_| {
        ConfigError::invalid(section, field, Some(raw.to_owned()), "must be an integer")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn lookup_from<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        move |name| map.get(name).map(|value| (*value).to_owned())
    }

    #[test]
    fn defaults_boot_from_an_empty_environment() {
        let config = AppConfig::from_lookup(|_| None).expect("defaults are valid");
        assert_eq!(config.bootstrap.min_participants, 10);
        assert_eq!(config.bootstrap.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.bootstrap.timeout(), Duration::from_secs(10));
        assert_eq!(config.engine.call_timeout(), Duration::from_secs(10));
        assert_eq!(config.engine.work_dir, "downloads");
        assert_eq!(config.reconcile.interval(), Duration::from_secs(5));
        assert_eq!(config.log.format, LogFormat::Pretty);
        assert_eq!(config.log.filter, "info");
    }

    #[test]
    fn overrides_replace_only_the_named_fields() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("MAGNETAR_BOOTSTRAP_MIN_PARTICIPANTS", "25"),
            ("MAGNETAR_ENGINE_WORK_DIR", "/srv/payloads"),
            ("MAGNETAR_LOG_FORMAT", "json"),
        ]))
        .expect("overrides are valid");
        assert_eq!(config.bootstrap.min_participants, 25);
        assert_eq!(config.bootstrap.poll_interval_ms, 1_000);
        assert_eq!(config.engine.work_dir, "/srv/payloads");
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn unparseable_override_is_rejected_with_field_context() {
        let err = AppConfig::from_lookup(lookup_from(&[(
            "MAGNETAR_BOOTSTRAP_TIMEOUT_MS",
            "soon",
        )]))
        .expect_err("non-numeric override");
        let ConfigError::InvalidField { section, field, value, .. } = err;
        assert_eq!(section, "bootstrap");
        assert_eq!(field, "timeout_ms");
        assert_eq!(value.as_deref(), Some("soon"));
    }

    #[test]
    fn timeout_shorter_than_poll_interval_is_rejected() {
        let err = AppConfig::from_lookup(lookup_from(&[
            ("MAGNETAR_BOOTSTRAP_POLL_INTERVAL_MS", "5000"),
            ("MAGNETAR_BOOTSTRAP_TIMEOUT_MS", "1000"),
        ]))
        .expect_err("deadline below poll interval");
        assert!(matches!(
            err,
            ConfigError::InvalidField {
                section: "bootstrap",
                field: "timeout_ms",
                ..
            }
        ));
    }

    #[test]
    fn zero_values_fail_validation() {
        for (name, field) in [
            ("MAGNETAR_BOOTSTRAP_MIN_PARTICIPANTS", "min_participants"),
            ("MAGNETAR_ENGINE_CALL_TIMEOUT_MS", "call_timeout_ms"),
            ("MAGNETAR_RECONCILE_INTERVAL_MS", "interval_ms"),
        ] {
            let err =
                AppConfig::from_lookup(lookup_from(&[(name, "0")])).expect_err("zero rejected");
            let ConfigError::InvalidField { field: got, .. } = err;
            assert_eq!(got, field);
        }
    }

    #[test]
    fn log_format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("Pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("yaml".parse::<LogFormat>().is_err());
        assert_eq!(LogFormat::Json.as_str(), "json");
    }
}
