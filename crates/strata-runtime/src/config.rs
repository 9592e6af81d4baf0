//! Engine configuration
//!
//! Supports both YAML and TOML configuration files.
//!
//! # Example YAML configuration:
//! ```yaml
//! # Record pools
//! pool:
//!   stream_capacity: 4096
//!   state_capacity: 1024
//!
//! # Timer scheduler driver
//! scheduler:
//!   tick_ms: 50
//!
//! # Snapshot persistence
//! snapshot:
//!   directory: /var/lib/strata/snapshots
//!   max_revisions: 5
//!
//! # Logging settings
//! logging:
//!   level: info
//!   format: json
//! ```

use crate::pool::DEFAULT_POOL_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Record pool sizing
    pub pool: PoolConfig,

    /// Scheduler driver settings
    pub scheduler: SchedulerConfig,

    /// Snapshot persistence settings
    pub snapshot: SnapshotConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Record pool sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Released stream events kept per pool
    pub stream_capacity: usize,

    /// Released correlation records kept per pool
    pub state_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            stream_capacity: DEFAULT_POOL_CAPACITY,
            state_capacity: DEFAULT_POOL_CAPACITY,
        }
    }
}

/// Scheduler driver settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How often the driver checks for due timers, in milliseconds
    pub tick_ms: u64,
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tick_ms: 100 }
    }
}

/// Snapshot persistence settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Directory for the file store; in-memory when unset
    pub directory: Option<PathBuf>,

    /// Revisions kept per app before the oldest is pruned
    pub max_revisions: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            directory: None,
            max_revisions: 3,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,

    /// Include timestamps
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            timestamps: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a file (YAML or TOML, auto-detected by extension)
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e.to_string()))?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match extension.as_str() {
            "yaml" | "yml" => Self::from_yaml(&content),
            "toml" => Self::from_toml(&content),
            _ => Self::from_yaml(&content).or_else(|_| Self::from_toml(&content)),
        }
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Merge another config into this one (other values take precedence if set)
    pub fn merge(&mut self, other: EngineConfig) {
        let pool_default = PoolConfig::default();
        if other.pool.stream_capacity != pool_default.stream_capacity {
            self.pool.stream_capacity = other.pool.stream_capacity;
        }
        if other.pool.state_capacity != pool_default.state_capacity {
            self.pool.state_capacity = other.pool.state_capacity;
        }

        if other.scheduler.tick_ms != SchedulerConfig::default().tick_ms {
            self.scheduler.tick_ms = other.scheduler.tick_ms;
        }

        if other.snapshot.directory.is_some() {
            self.snapshot.directory = other.snapshot.directory;
        }
        if other.snapshot.max_revisions != SnapshotConfig::default().max_revisions {
            self.snapshot.max_revisions = other.snapshot.max_revisions;
        }

        let logging_default = LoggingConfig::default();
        if other.logging.level != logging_default.level {
            self.logging.level = other.logging.level;
        }
        if other.logging.format != logging_default.format {
            self.logging.format = other.logging.format;
        }
        if !other.logging.timestamps {
            self.logging.timestamps = false;
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    IoError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.pool.stream_capacity, DEFAULT_POOL_CAPACITY);
        assert_eq!(config.scheduler.tick(), Duration::from_millis(100));
        assert!(config.snapshot.directory.is_none());
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
pool:
  stream_capacity: 64
scheduler:
  tick_ms: 10
logging:
  level: debug
  format: json
"#;
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.pool.stream_capacity, 64);
        assert_eq!(config.pool.state_capacity, DEFAULT_POOL_CAPACITY);
        assert_eq!(config.scheduler.tick_ms, 10);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_toml_parsing() {
        let toml = r#"
[snapshot]
directory = "/tmp/strata"
max_revisions = 7

[scheduler]
tick_ms = 25
"#;
        let config = EngineConfig::from_toml(toml).unwrap();
        assert_eq!(config.snapshot.directory, Some(PathBuf::from("/tmp/strata")));
        assert_eq!(config.snapshot.max_revisions, 7);
        assert_eq!(config.scheduler.tick_ms, 25);
    }

    #[test]
    fn test_zero_tick_is_clamped() {
        let config = SchedulerConfig { tick_ms: 0 };
        assert_eq!(config.tick(), Duration::from_millis(1));
    }

    #[test]
    fn test_config_merge() {
        let mut base = EngineConfig::default();
        let override_config = EngineConfig {
            scheduler: SchedulerConfig { tick_ms: 5 },
            snapshot: SnapshotConfig {
                directory: Some(PathBuf::from("/data")),
                ..Default::default()
            },
            ..Default::default()
        };

        base.merge(override_config);
        assert_eq!(base.scheduler.tick_ms, 5);
        assert_eq!(base.snapshot.directory, Some(PathBuf::from("/data")));
        assert_eq!(base.logging.level, "info");
    }

    #[test]
    fn test_load_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "[pool]\nstate_capacity = 8\n").unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.pool.state_capacity, 8);

        let missing = EngineConfig::load(dir.path().join("absent.yaml"));
        assert!(matches!(missing, Err(ConfigError::IoError(_, _))));
    }
}
