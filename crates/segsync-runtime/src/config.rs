#![forbid(unsafe_code)]

//! Runtime configuration.
//!
//! Every tunable of the server driver lives in one [`SyncConfig`] that can be
//! loaded from TOML or JSON at startup. Missing tables and fields fall back
//! to their defaults.
//!
//! ```toml
//! [cache]
//! inactivity_timeout_ms = 300000
//!
//! [batch]
//! interval_ms = 3000
//! max_responses_per_pair = 0
//!
//! [transition]
//! move_ms = 400
//!
//! [logging]
//! filter = "segsync=debug"
//! json = true
//! ```

use std::path::Path;
use std::time::Duration;

use segsync_core::animation::TransitionConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::LoggingConfig;

/// Overrides [`BatchConfig::interval_ms`].
pub const ENV_BATCH_INTERVAL_MS: &str = "SEGSYNC_BATCH_INTERVAL_MS";
/// Overrides [`CacheConfig::inactivity_timeout_ms`].
pub const ENV_INACTIVITY_TIMEOUT_MS: &str = "SEGSYNC_INACTIVITY_TIMEOUT_MS";

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Visualization cache parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// A session with no access for this long is put to sleep.
    pub inactivity_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_ms: 300_000,
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.inactivity_timeout_ms)
    }
}

/// Batch scheduler parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub interval_ms: u64,
    /// Per `(session, visualization)` queue cap; `0` means unbounded.
    pub max_responses_per_pair: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            interval_ms: 3_000,
            max_responses_per_pair: 0,
        }
    }
}

impl BatchConfig {
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

// ---------------------------------------------------------------------------
// SyncConfig
// ---------------------------------------------------------------------------

/// Top-level configuration for the server driver.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub cache: CacheConfig,
    pub batch: BatchConfig,
    /// Forwarded to viewers alongside snapshots.
    pub transition: TransitionConfig,
    pub logging: LoggingConfig,
}

impl SyncConfig {
    /// Load from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Load from a TOML file on disk.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Load from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Load from a JSON file on disk.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    /// Load a TOML file and reject it unless [`validate`](Self::validate)
    /// comes back clean.
    pub fn load_validated_toml(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_file(path)?.into_validated()
    }

    /// JSON counterpart of [`load_validated_toml`](Self::load_validated_toml).
    pub fn load_validated_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json_file(path)?.into_validated()
    }

    fn into_validated(self) -> Result<Self, ConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    /// Check every parameter; an empty list means the config is usable.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.cache.inactivity_timeout_ms == 0 {
            errors.push("cache.inactivity_timeout_ms must be > 0".to_string());
        }
        if self.batch.interval_ms == 0 {
            errors.push("batch.interval_ms must be > 0".to_string());
        }
        let t = &self.transition;
        for (name, value) in [
            ("disappear_ms", t.disappear_ms),
            ("move_ms", t.move_ms),
            ("image_change_ms", t.image_change_ms),
            ("appear_ms", t.appear_ms),
        ] {
            if value == 0 {
                errors.push(format!("transition.{name} must be > 0"));
            }
        }
        if self.logging.filter.trim().is_empty() {
            errors.push("logging.filter must not be empty".to_string());
        }
        errors
    }

    /// Apply `SEGSYNC_*` overrides from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.apply_env_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup`. Unparseable values are ignored
    /// with a warning.
    #[must_use]
    pub fn apply_env_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(ms) = parse_override(&lookup, ENV_BATCH_INTERVAL_MS) {
            self.batch.interval_ms = ms;
        }
        if let Some(ms) = parse_override(&lookup, ENV_INACTIVITY_TIMEOUT_MS) {
            self.cache.inactivity_timeout_ms = ms;
        }
        self
    }
}

fn parse_override(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(error) => {
            tracing::warn!(key, value = %raw, %error, "ignoring unparseable override");
            None
        }
    }
}

/// Failure to load a [`SyncConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("validation errors: {}", .0.join("; "))]
    Invalid(Vec<String>),
}
