//! Logging setup for binaries and tests embedding the media session

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{MediaSessionError, Result};

/// Configuration for the logging system
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// The log level to use
    pub level: Level,
    /// Whether to include file and line information
    pub file_info: bool,
    /// Whether to log span enter/exit
    pub log_spans: bool,
    /// Whether to include thread names (shows the designated context)
    pub thread_names: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            file_info: false,
            log_spans: false,
            thread_names: true,
        }
    }
}

impl LoggingConfig {
    /// Create a configuration for `level`
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Include file and line information
    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    /// Log span activity
    pub fn with_spans(mut self) -> Self {
        self.log_spans = true;
        self
    }
}

/// Install a global `tracing` subscriber
///
/// `RUST_LOG` directives are honoured on top of the configured level. Fails if
/// a global subscriber is already installed.
pub fn setup_logging(config: LoggingConfig) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(config.level.into());

    let span_events = if config.log_spans {
        FmtSpan::ACTIVE
    } else {
        FmtSpan::NONE
    };

    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(span_events)
        .with_thread_names(config.thread_names)
        .with_file(config.file_info)
        .with_line_number(config.file_info)
        .try_init()
        .map_err(|e| MediaSessionError::Config(format!("failed to install subscriber: {}", e)))
}

/// Parse a log level from a string
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level).map_err(|_| MediaSessionError::Config(format!("Invalid log level: {}", level)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("WARN").unwrap(), Level::WARN);
        assert!(matches!(parse_log_level("loud"), Err(MediaSessionError::Config(_))));
    }
}
