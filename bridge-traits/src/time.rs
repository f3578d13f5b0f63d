//! Time and Logging Abstractions
//!
//! Provides injectable time source and logging sink for testing and platform integration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::error::Result;

/// Time source trait
///
/// Abstracts system time so debounce windows and load timeouts can be tested
/// deterministically.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::time::Clock;
///
/// fn flush_due(clock: &dyn Clock, last_flush_ms: i64, window_ms: i64) -> bool {
///     clock.unix_timestamp_millis() - last_flush_ms >= window_ms
/// }
/// ```
pub trait Clock: Send + Sync {
    /// Get current UTC time
    fn now(&self) -> DateTime<Utc>;

    /// Get current Unix timestamp in seconds
    fn unix_timestamp(&self) -> i64 {
        self.now().timestamp()
    }

    /// Get current Unix timestamp in milliseconds
    fn unix_timestamp_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// System clock implementation using actual system time
#[derive(Debug, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests.
///
/// Starts at the given instant and only moves when [`ManualClock::advance`]
/// or [`ManualClock::set_millis`] is called.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(start_millis),
        }
    }

    pub fn advance(&self, by: Duration) {
        let delta = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.millis.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn set_millis(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(self.millis.load(Ordering::SeqCst))
            .unwrap_or_default()
    }

    fn unix_timestamp_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Severity of a forwarded log entry, ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// One engine log line as seen by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub timestamp: DateTime<Utc>,
    /// Module path that emitted the event, e.g. `core_sync::synchronizer`.
    pub target: String,
    pub message: String,
    pub fields: HashMap<String, String>,
    /// Name of the innermost span the event was recorded in.
    pub span: Option<String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            timestamp: Utc::now(),
            target: target.into(),
            message: message.into(),
            fields: HashMap::new(),
            span: None,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn in_span(mut self, span: impl Into<String>) -> Self {
        self.span = Some(span.into());
        self
    }
}

/// Host-side receiver for engine logs.
///
/// Payload paths in `fields` are already reduced to file names when the
/// engine runs with path redaction enabled.
#[async_trait::async_trait]
pub trait LoggerSink: Send + Sync {
    async fn log(&self, entry: LogEntry) -> Result<()>;

    /// Entries below this level are dropped before they are built.
    fn min_level(&self) -> LogLevel {
        LogLevel::Info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock() {
        let clock = SystemClock;
        let now = clock.now();
        let timestamp = clock.unix_timestamp();

        assert!(timestamp > 0);
        assert!(now.timestamp() == timestamp);
    }

    #[test]
    fn test_manual_clock_advances_only_on_demand() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.unix_timestamp_millis(), 1_000);
        assert_eq!(clock.unix_timestamp_millis(), 1_000);

        clock.advance(Duration::from_millis(4_500));
        assert_eq!(clock.unix_timestamp_millis(), 5_500);
        assert_eq!(clock.unix_timestamp(), 5);

        clock.set_millis(42);
        assert_eq!(clock.now().timestamp_millis(), 42);
    }

    #[test]
    fn test_log_entry_builder() {
        let entry = LogEntry::new(LogLevel::Warn, "core_sync::synchronizer", "Flush failed")
            .with_field("reason", "seek")
            .in_span("flush");

        assert_eq!(entry.level, LogLevel::Warn);
        assert_eq!(entry.fields.get("reason").map(String::as_str), Some("seek"));
        assert_eq!(entry.span.as_deref(), Some("flush"));
        assert!(LogLevel::Debug < LogLevel::Warn);
    }
}
