//! Limiter configuration structures.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::{AppResult, Capacity};

/// Environment variable holding the limiter name.
pub const ENV_NAME: &str = "THREAD_CONTROL_NAME";
/// Environment variable holding the thread cap (`auto` = one per CPU).
pub const ENV_MAX_THREADS: &str = "THREAD_CONTROL_MAX_THREADS";
/// Environment variable holding the default join timeout in milliseconds.
pub const ENV_WAIT_TIMEOUT_MS: &str = "THREAD_CONTROL_WAIT_TIMEOUT_MS";

/// Configuration for a single limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Name used in log lines.
    #[serde(default = "default_name")]
    pub name: String,
    /// Maximum concurrent admissions; zero or negative means unbounded.
    #[serde(default)]
    pub max_threads: i64,
    /// Default timeout for bounded joins, in milliseconds.
    #[serde(default)]
    pub wait_timeout_ms: Option<u64>,
}

fn default_name() -> String {
    "default".into()
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            max_threads: 0,
            wait_timeout_ms: None,
        }
    }
}

impl LimiterConfig {
    /// Config with one slot per logical CPU.
    #[must_use]
    pub fn per_cpu(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_threads: cpu_count(),
            wait_timeout_ms: None,
        }
    }

    /// Capacity described by `max_threads`.
    #[must_use]
    pub fn capacity(&self) -> Capacity {
        Capacity::from_max_threads(self.max_threads)
    }

    /// Default join timeout, if configured.
    #[must_use]
    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_ms.map(Duration::from_millis)
    }

    /// Validate limiter configuration values.
    ///
    /// # Errors
    ///
    /// Returns a message naming the offending field.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".into());
        }
        if self.wait_timeout_ms == Some(0) {
            return Err("wait_timeout_ms must be greater than 0".into());
        }
        Ok(())
    }

    /// Load configuration from the process environment, reading `.env` first
    /// when one exists.
    ///
    /// # Errors
    ///
    /// Returns a message if a variable is present but malformed or the
    /// result fails validation.
    pub fn from_env() -> Result<Self, String> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!("failed to read .env: {}", e);
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from a key lookup function.
    ///
    /// Unset keys keep their defaults. `THREAD_CONTROL_MAX_THREADS=auto`
    /// selects one slot per logical CPU.
    ///
    /// # Errors
    ///
    /// Returns a message if a value does not parse or validation fails.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(name) = lookup(ENV_NAME) {
            cfg.name = name;
        }
        if let Some(raw) = lookup(ENV_MAX_THREADS) {
            let raw = raw.trim();
            cfg.max_threads = if raw.eq_ignore_ascii_case("auto") {
                cpu_count()
            } else {
                raw.parse()
                    .map_err(|e| format!("{ENV_MAX_THREADS}=`{raw}` is not an integer: {e}"))?
            };
        }
        if let Some(raw) = lookup(ENV_WAIT_TIMEOUT_MS) {
            let raw = raw.trim();
            let ms = raw
                .parse()
                .map_err(|e| format!("{ENV_WAIT_TIMEOUT_MS}=`{raw}` is not an integer: {e}"))?;
            cfg.wait_timeout_ms = Some(ms);
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

fn cpu_count() -> i64 {
    i64::try_from(num_cpus::get()).unwrap_or(i64::MAX)
}

/// A named set of limiters, e.g. one per pipeline stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimiterSetConfig {
    /// Map of limiter name to configuration.
    pub limiters: HashMap<String, LimiterConfig>,
}

impl LimiterSetConfig {
    /// Validate all limiters and ensure at least one exists.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first invalid limiter.
    pub fn validate(&self) -> Result<(), String> {
        if self.limiters.is_empty() {
            return Err("at least one limiter must be defined".into());
        }
        for (name, limiter) in &self.limiters {
            limiter
                .validate()
                .map_err(|e| format!("limiter `{name}` invalid: {e}"))?;
        }
        Ok(())
    }

    /// Parse limiter set configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a message on parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse, and validate a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Fails with context if the file cannot be read or is invalid.
    pub fn from_path(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading limiter config {}", path.display()))?;
        Self::from_json_str(&raw)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("loading limiter config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v).to_string())
        }
    }

    #[test]
    fn test_from_lookup_defaults() {
        let cfg = LimiterConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, LimiterConfig::default());
        assert_eq!(cfg.capacity(), Capacity::Unbounded);
    }

    #[test]
    fn test_from_lookup_values() {
        let cfg = LimiterConfig::from_lookup(lookup(&[
            (ENV_NAME, "crawler"),
            (ENV_MAX_THREADS, " 8 "),
            (ENV_WAIT_TIMEOUT_MS, "1500"),
        ]))
        .unwrap();
        assert_eq!(cfg.name, "crawler");
        assert_eq!(cfg.max_threads, 8);
        assert_eq!(cfg.wait_timeout(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_from_lookup_auto() {
        let cfg = LimiterConfig::from_lookup(lookup(&[(ENV_MAX_THREADS, "AUTO")])).unwrap();
        assert!(cfg.max_threads >= 1);
        assert!(cfg.capacity().is_bounded());
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = LimiterConfig::from_lookup(lookup(&[(ENV_MAX_THREADS, "lots")])).unwrap_err();
        assert!(err.contains(ENV_MAX_THREADS));
        assert!(LimiterConfig::from_lookup(lookup(&[(ENV_WAIT_TIMEOUT_MS, "0")])).is_err());
    }

    #[test]
    fn test_from_path_missing_file() {
        let err = LimiterSetConfig::from_path("/nonexistent/limiters.json").unwrap_err();
        assert!(format!("{err:#}").contains("reading limiter config"));
    }
}
