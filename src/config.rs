//! Server configuration.
//!
//! Loaded from a JSON file at startup. Every field has a default, so an empty
//! object (`{}`) is a valid configuration:
//!
//! ```json
//! {
//!   "host": "127.0.0.1",
//!   "port": 6379,
//!   "cron_interval_ms": 100,
//!   "expire_samples": 20,
//!   "max_query_buffer": 67108864,
//!   "max_events": 64,
//!   "log_level": "info"
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Runtime settings of the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address to bind
    pub host: String,
    /// Port to listen on; 0 picks an ephemeral port
    pub port: u16,
    /// Period of the server cron timer
    pub cron_interval_ms: u64,
    /// Expiration entries sampled per cron run
    pub expire_samples: usize,
    /// Input buffer size at which a client is disconnected
    pub max_query_buffer: usize,
    /// Readiness events fetched per poll
    pub max_events: usize,
    /// Default tracing filter, overridden by `RUST_LOG`
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_PORT,
            cron_interval_ms: 100,
            expire_samples: 20,
            max_query_buffer: 64 * 1024 * 1024,
            max_events: crate::event::DEFAULT_MAX_EVENTS,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Reads and validates a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_json::from_str(&contents).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_events == 0 {
            return Err(ConfigError::Invalid("max_events must be greater than 0".into()));
        }
        if self.cron_interval_ms == 0 {
            return Err(ConfigError::Invalid("cron_interval_ms must be greater than 0".into()));
        }
        if self.max_query_buffer == 0 {
            return Err(ConfigError::Invalid("max_query_buffer must be greater than 0".into()));
        }
        Ok(())
    }

    /// The `host:port` string to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
