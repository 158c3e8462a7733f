//! Logging system initialization
//!
//! Uses the tracing ecosystem for structured logging with support for:
//! - Environment variable override (`TASKWEAVE_LOG`)
//! - Pretty, compact or JSON console output
//! - Optional file output with daily rotation

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Environment variable that overrides the configured filter
pub const LOG_ENV_VAR: &str = "TASKWEAVE_LOG";

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level
    pub level: String,
    pub format: LogFormat,
    /// Show timestamps
    pub timestamps: bool,
    /// Show file and line numbers
    pub file_line: bool,
    /// Enable file output
    pub file_output: bool,
    /// Log file directory path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            timestamps: true,
            file_line: false,
            file_output: false,
            file_path: None,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    }
}

/// Get the default log directory path
fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskweave")
        .join("logs")
}

/// Filter used when `TASKWEAVE_LOG` is unset
fn default_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::new(format!(
        "taskweave={}",
        parse_level(&config.level).as_str().to_lowercase()
    ))
}

/// Install the global subscriber.
///
/// Fails if a global subscriber is already set, so embedding applications
/// that configure tracing themselves should simply not call this.
///
/// # Environment Variables
/// - `TASKWEAVE_LOG`: Override the filter (e.g., "taskweave=debug,taskweave::domain::bus=trace")
pub fn init_logging(config: &LoggingConfig) -> ConfigResult<()> {
    let env_filter =
        EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| default_filter(config));

    let console_layer = match config.format {
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_target(true)
                .with_level(true)
                .with_file(config.file_line)
                .with_line_number(config.file_line)
                .with_current_span(true);
            if config.timestamps {
                layer.boxed()
            } else {
                layer.without_time().boxed()
            }
        }
        LogFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_target(true)
                .with_level(true)
                .with_file(config.file_line)
                .with_line_number(config.file_line);
            if config.timestamps {
                layer.boxed()
            } else {
                layer.without_time().boxed()
            }
        }
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(config.file_line)
                .with_line_number(config.file_line)
                .with_ansi(true);
            if config.timestamps {
                layer.boxed()
            } else {
                layer.without_time().boxed()
            }
        }
    };

    let file_layer = if config.file_output {
        let log_dir = config.file_path.clone().unwrap_or_else(default_log_dir);
        std::fs::create_dir_all(&log_dir).map_err(|e| {
            ConfigError::IoError(format!(
                "Failed to create log directory {}: {}",
                log_dir.display(),
                e
            ))
        })?;

        let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "taskweave.log");
        Some(
            fmt::layer()
                .with_writer(file_appender)
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_span_events(FmtSpan::CLOSE)
                .boxed(),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| ConfigError::Invalid(format!("Logging already initialized: {}", e)))?;

    tracing::debug!(
        level = %config.level,
        format = ?config.format,
        file_output = config.file_output,
        "Logging initialized"
    );
    Ok(())
}

/// Parse log level from string
pub fn parse_level(s: &str) -> Level {
    match s.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}
