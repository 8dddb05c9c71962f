#![forbid(unsafe_code)]

//! Process-wide `tracing` setup for binaries embedding the runtime.
//!
//! Libraries in this workspace only emit events; installing a subscriber is
//! left to the host, which may call [`init_tracing`] or bring its own.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Takes precedence over [`LoggingConfig::filter`] when set.
pub const ENV_LOG_FILTER: &str = "SEGSYNC_LOG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `segsync_runtime=debug`.
    pub filter: String,
    /// Emit one JSON object per event instead of compact text.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: String::from("info"),
            json: false,
        }
    }
}

impl LoggingConfig {
    /// Resolve the effective filter, falling back to `info` on a bad directive.
    #[must_use]
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_env(ENV_LOG_FILTER)
            .or_else(|_| EnvFilter::try_new(&self.filter))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Install the global subscriber.
///
/// Returns `false` if a global subscriber was already installed; that is not
/// an error.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter = config.env_filter();
    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().compact().with_target(true))
            .try_init()
    };
    installed.is_ok()
}
