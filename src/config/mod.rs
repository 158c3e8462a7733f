//! Configuration management for Taskweave
//!
//! This module handles loading, parsing, and managing configuration from:
//! 1. Embedded default_config.toml (compile-time defaults)
//! 2. User config at ~/.config/taskweave/config.toml (or platform-specific location)
//! 3. Project-local config at ./.taskweave/config.toml
//!
//! Overlays are merged table by table, so a file only needs the keys it
//! changes.

use crate::domain::bus::BusConfig;
use crate::domain::task::SchedulerConfig;
use crate::error::{ConfigError, ConfigResult};
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration embedded in binary
const DEFAULT_CONFIG: &str = include_str!("../../default_config.toml");

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ============================================================================
// Configuration loading
// ============================================================================

impl AppConfig {
    /// Load configuration with fallback chain:
    /// embedded defaults, then the user file, then the project file.
    pub fn load() -> ConfigResult<Self> {
        let mut table = parse_table(DEFAULT_CONFIG, "default config")?;

        for path in [Self::user_config_path(), Self::project_config_path()]
            .into_iter()
            .flatten()
        {
            if !path.exists() {
                continue;
            }
            match read_table(&path) {
                Ok(overlay) => {
                    merge_tables(&mut table, overlay);
                    tracing::info!("Loaded config overlay from {:?}", path);
                }
                Err(e) => {
                    tracing::warn!("Failed to load config overlay {:?}: {}", path, e);
                }
            }
        }

        let config: AppConfig = toml::Value::Table(table)
            .try_into()
            .map_err(|e| ConfigError::ParseError(format!("Failed to apply config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a single file on top of the built-in defaults
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        toml::from_str::<Self>(&contents)
            .map_err(|e| {
                ConfigError::ParseError(format!("Failed to parse {}: {}", path.display(), e))
            })
            .and_then(|config| config.validate().map(|()| config))
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(contents: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| ConfigError::ParseError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Get the user config path
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|config_dir| config_dir.join("taskweave").join("config.toml"))
    }

    /// Get the project-local config path
    pub fn project_config_path() -> Option<PathBuf> {
        std::env::current_dir()
            .ok()
            .map(|cwd| cwd.join(".taskweave").join("config.toml"))
    }

    /// Reject values that would stall the scheduler or bus
    pub fn validate(&self) -> ConfigResult<()> {
        if self.scheduler.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.max_concurrent must be at least 1".to_string(),
            ));
        }
        if let Some(ref retry) = self.scheduler.retry {
            if retry.base_delay > retry.max_delay {
                return Err(ConfigError::Invalid(format!(
                    "scheduler.retry.base_delay_secs ({:?}) exceeds max_delay_secs ({:?})",
                    retry.base_delay, retry.max_delay
                )));
            }
        }
        Ok(())
    }

    /// Save configuration to user config path
    pub fn save(&self) -> ConfigResult<()> {
        let config_path = Self::user_config_path().ok_or_else(|| {
            ConfigError::IoError("Could not determine user config directory".to_string())
        })?;
        self.save_to(&config_path)
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let toml_string =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, toml_string).map_err(|e| ConfigError::IoError(e.to_string()))?;

        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }
}

fn parse_table(contents: &str, origin: &str) -> ConfigResult<toml::Table> {
    contents
        .parse::<toml::Table>()
        .map_err(|e| ConfigError::ParseError(format!("Failed to parse {}: {}", origin, e)))
}

fn read_table(path: &Path) -> ConfigResult<toml::Table> {
    let contents =
        std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
    parse_table(&contents, &path.display().to_string())
}

/// Deep merge: nested tables merge key by key, anything else is replaced
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        let toml::Value::Table(incoming) = value else {
            base.insert(key, value);
            continue;
        };
        if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
            merge_tables(existing, incoming);
            continue;
        }
        base.insert(key, toml::Value::Table(incoming));
    }
}

/// Serde adapter storing a `Duration` as fractional seconds
pub mod duration_secs {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|e| D::Error::custom(format!("invalid duration {secs}: {e}")))
    }
}
