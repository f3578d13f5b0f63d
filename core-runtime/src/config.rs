//! # Core Configuration Module
//!
//! Configuration for the playback core.
//!
//! ## Overview
//!
//! `CoreConfig` holds the store backend selection and the timing knobs of the
//! session engine: how often dirty positions are flushed, how long a load may
//! stay pending, and how far the skip controls jump. It can be assembled with
//! the builder or deserialized from JSON; both paths run the same fail-fast
//! validation.
//!
//! ## Usage
//!
//! ### Builder
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, StoreBackend};
//! use std::time::Duration;
//!
//! let config = CoreConfig::builder()
//!     .store(StoreBackend::sqlite("/var/lib/shelf/library.db"))
//!     .position_flush_interval(Duration::from_secs(5))
//!     .build()
//!     .expect("valid config");
//! ```
//!
//! ### JSON
//!
//! ```ignore
//! let config = CoreConfig::from_json_str(r#"{
//!     "store": { "kind": "sqlite", "database_path": "library.db" },
//!     "skip_forward_secs": 15
//! }"#)?;
//! ```
//!
//! Missing fields take the defaults listed on [`CoreConfig`].

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Which Store Adapter implementation backs the library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreBackend {
    /// In-process store that keeps payload bytes in memory.
    Embedded,
    /// SQLite database that indexes payload files by path.
    Sqlite { database_path: PathBuf },
}

impl StoreBackend {
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        StoreBackend::Sqlite {
            database_path: path.into(),
        }
    }
}

impl Default for StoreBackend {
    fn default() -> Self {
        StoreBackend::Embedded
    }
}

/// Core configuration.
///
/// | Field | Default |
/// |-------|---------|
/// | `store` | `Embedded` |
/// | `position_flush_interval_ms` | 5000 |
/// | `load_timeout_ms` | 10000 |
/// | `tick_interval_ms` | 250 |
/// | `skip_backward_secs` | 10 |
/// | `skip_forward_secs` | 30 |
/// | `default_volume` | 1.0 |
/// | `event_buffer_size` | 100 |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub store: StoreBackend,
    /// Debounce window for dirty position flushes.
    pub position_flush_interval_ms: u64,
    /// A load that has not reported ready within this window fails.
    pub load_timeout_ms: u64,
    /// Period of the engine's housekeeping tick.
    pub tick_interval_ms: u64,
    pub skip_backward_secs: f64,
    pub skip_forward_secs: f64,
    /// Volume applied before any persisted preference.
    pub default_volume: f32,
    pub event_buffer_size: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            store: StoreBackend::default(),
            position_flush_interval_ms: 5_000,
            load_timeout_ms: 10_000,
            tick_interval_ms: 250,
            skip_backward_secs: 10.0,
            skip_forward_secs: 30.0,
            default_volume: 1.0,
            event_buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
        }
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: CoreConfig = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Invalid configuration document: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn position_flush_interval(&self) -> Duration {
        Duration::from_millis(self.position_flush_interval_ms)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Check every field and fail with an actionable message.
    pub fn validate(&self) -> Result<()> {
        if let StoreBackend::Sqlite { database_path } = &self.store {
            if database_path.as_os_str().is_empty() {
                return Err(Error::Config(
                    "Database path cannot be empty for the sqlite store".to_string(),
                ));
            }
        }

        if self.position_flush_interval_ms == 0 {
            return Err(Error::Config(
                "position_flush_interval_ms must be greater than zero".to_string(),
            ));
        }

        if self.load_timeout_ms == 0 {
            return Err(Error::Config(
                "load_timeout_ms must be greater than zero".to_string(),
            ));
        }

        if self.tick_interval_ms == 0 || self.tick_interval_ms > self.position_flush_interval_ms {
            return Err(Error::Config(format!(
                "tick_interval_ms must be in 1..={} (the flush interval)",
                self.position_flush_interval_ms
            )));
        }

        for (name, value) in [
            ("skip_backward_secs", self.skip_backward_secs),
            ("skip_forward_secs", self.skip_forward_secs),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(Error::Config(format!(
                    "{} must be a positive number of seconds, got {}",
                    name, value
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.default_volume) {
            return Err(Error::Config(format!(
                "default_volume must be within 0.0..=1.0, got {}",
                self.default_volume
            )));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "event_buffer_size must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for [`CoreConfig`].
#[derive(Debug, Default)]
pub struct CoreConfigBuilder {
    config: CoreConfig,
}

impl CoreConfigBuilder {
    pub fn store(mut self, store: StoreBackend) -> Self {
        self.config.store = store;
        self
    }

    /// Shortcut for `store(StoreBackend::sqlite(path))`.
    pub fn database_path<P: Into<PathBuf>>(self, path: P) -> Self {
        self.store(StoreBackend::sqlite(path))
    }

    pub fn position_flush_interval(mut self, interval: Duration) -> Self {
        self.config.position_flush_interval_ms = duration_to_millis(interval);
        self
    }

    pub fn load_timeout(mut self, timeout: Duration) -> Self {
        self.config.load_timeout_ms = duration_to_millis(timeout);
        self
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval_ms = duration_to_millis(interval);
        self
    }

    pub fn skip_backward_secs(mut self, seconds: f64) -> Self {
        self.config.skip_backward_secs = seconds;
        self
    }

    pub fn skip_forward_secs(mut self, seconds: f64) -> Self {
        self.config.skip_forward_secs = seconds;
        self
    }

    pub fn default_volume(mut self, volume: f32) -> Self {
        self.config.default_volume = volume;
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.config.event_buffer_size = size;
        self
    }

    /// Validate and produce the configuration.
    pub fn build(self) -> Result<CoreConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
