//! Logging setup.
//!
//! The level is passed in explicitly by whoever owns the process; nothing
//! in the library flips a global debug switch.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::errors::{SyncError, SyncResult};

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive ("info", "debug", "strategy_mirror=trace", ...)
    pub level: String,

    /// Emit one JSON object per event instead of human-readable lines
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl LogConfig {
    pub fn new(level: impl Into<String>, json: bool) -> Self {
        Self {
            level: level.into(),
            json,
        }
    }

    /// `RUST_LOG` wins over the configured level when it is set.
    fn filter(&self) -> SyncResult<EnvFilter> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(self.level.trim().to_lowercase())
            .map_err(|e| SyncError::config(format!("invalid log level '{}': {}", self.level, e)))
    }
}

/// Install the global subscriber.
///
/// Fails if the level does not parse or a subscriber is already installed.
pub fn init(config: &LogConfig) -> SyncResult<()> {
    let filter = config.filter()?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json {
        registry.with(fmt::layer().json().with_target(false)).try_init()
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()
    };

    installed.map_err(|e| SyncError::config(format!("logging already initialised: {}", e)))
}
