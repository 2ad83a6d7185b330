//! Structured Logging
//!
//! One entry point for every Warden process:
//! - JSON output for log aggregation (`LogFormat::Json`)
//! - Human-readable output for operators and development (`LogFormat::Text`)
//!
//! `RUST_LOG` always wins over the configured default directive, so
//! `RUST_LOG=wd_access=debug` works without touching the config file.
//!
//! ```rust,ignore
//! use wd_common::logging::{init_logging, LogFormat};
//!
//! init_logging("wd-admin", LogFormat::Text, "info")?;
//! tracing::info!(role_uuid = %uuid, "Role updated");
//! ```

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log directive '{directive}': {message}")]
    InvalidDirective { directive: String, message: String },

    #[error("Global subscriber already installed: {0}")]
    AlreadyInitialized(String),

    #[error("Unknown log format: {0}")]
    UnknownFormat(String),
}

/// Output format of the log stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(LoggingError::UnknownFormat(other.to_string())),
        }
    }
}

/// Build the level filter: `RUST_LOG` if set, otherwise `default_directive`.
pub fn build_filter(default_directive: &str) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    EnvFilter::try_new(default_directive).map_err(|e| LoggingError::InvalidDirective {
        directive: default_directive.to_string(),
        message: e.to_string(),
    })
}

/// Install the global tracing subscriber.
///
/// Returns an error instead of panicking when a subscriber is already
/// installed, which happens when tests or embedding binaries call this twice.
pub fn init_logging(
    service_name: &str,
    format: LogFormat,
    default_directive: &str,
) -> Result<(), LoggingError> {
    let filter = build_filter(default_directive)?;

    let result = match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true)
                    .flatten_event(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .try_init(),
    };

    result.map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    tracing::info!(service = service_name, ?format, "Logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_format() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" TEXT ".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!(matches!(
            "xml".parse::<LogFormat>(),
            Err(LoggingError::UnknownFormat(_))
        ));
    }

    #[test]
    fn test_invalid_directive_rejected() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        assert!(build_filter("wd_access=notalevel").is_err());
        assert!(build_filter("info,wd_access=debug").is_ok());
    }

    #[test]
    fn test_second_init_is_an_error() {
        let _ = init_logging("test", LogFormat::Text, "warn");
        assert!(init_logging("test", LogFormat::Json, "warn").is_err());
    }
}
