//! Integration tests for logging system

use async_trait::async_trait;
use bridge_traits::error::Result as SinkResult;
use bridge_traits::time::{LogEntry, LogLevel, LoggerSink};
use core_runtime::logging::{init_logging, redact_if_sensitive, strip_path, LogFormat, LoggingConfig};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct CapturingSink {
    entries: Mutex<Vec<LogEntry>>,
}

#[async_trait]
impl LoggerSink for CapturingSink {
    async fn log(&self, entry: LogEntry) -> SinkResult<()> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }

    fn min_level(&self) -> LogLevel {
        LogLevel::Debug
    }
}

// The global subscriber can only be installed once per process, so every
// assertion that depends on it lives in this single test.
#[test]
fn test_global_initialization_forwards_to_sink() {
    let sink = Arc::new(CapturingSink::default());
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Debug)
        .with_logger_sink(sink.clone());

    init_logging(config).expect("first initialization succeeds");

    tracing::debug!(target: "core_sync", database_url = "sqlite:///data/shelf.db", "position flushed");
    tracing::trace!(target: "core_sync", "below the filter");
    tracing::info!(target: "hyper", "foreign crate at info is filtered");

    {
        let entries = sink.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "position flushed");
        assert_eq!(
            entries[0].fields.get("database_url"),
            Some(&"shelf.db".to_string())
        );
    }

    let second = init_logging(LoggingConfig::default());
    assert!(second.is_err());
}

#[test]
fn test_path_fields_are_stripped() {
    assert_eq!(redact_if_sensitive("file_path", "/books/dune/01.mp3"), "01.mp3");
    assert_eq!(redact_if_sensitive("payload_file", "C:\\books\\02.mp3"), "02.mp3");
    assert_eq!(redact_if_sensitive("collection_id", "abc"), "abc");
}

#[test]
fn test_path_stripping() {
    assert_eq!(strip_path("/var/log/app.log"), "app.log");
    assert_eq!(strip_path("D:\\data\\file.txt"), "file.txt");
    assert_eq!(strip_path(""), "");
}

#[test]
fn test_config_chaining() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Warn)
        .with_path_redaction(false)
        .with_spans(false)
        .with_target(false)
        .with_thread_info(true);

    assert_eq!(config.format, LogFormat::Compact);
    assert_eq!(config.level, LogLevel::Warn);
    assert!(!config.redact_paths);
    assert!(!config.enable_spans);
    assert!(!config.display_target);
    assert!(config.display_thread_info);
}
