use crate::error::ConfigError;
use crate::level::Level;
use crate::path::StrategyKind;
use crate::routing::Predicate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Longest accepted shutdown or drain timeout (one day)
pub const MAX_TIMEOUT_MS: u64 = 86_400_000;

/// Longest accepted overflow warning window (one day)
pub const MAX_OVERFLOW_WARNING_WINDOW_SECS: u64 = 86_400;

/// Engine configuration, loaded from TOML
///
/// Every field has a default, so an empty file is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Global kill switch applied at startup
    pub monitoring_enabled: bool,
    /// Upper bound on waiting for processor shutdown hooks
    pub shutdown_timeout_ms: u64,
    pub dispatch: DispatchConfig,
    pub path: PathConfig,
    /// Monitor name prefix to level
    pub monitor_levels: BTreeMap<String, Level>,
    /// Processor name prefix to level
    pub processor_levels: BTreeMap<String, Level>,
    pub groups: Vec<GroupConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            monitoring_enabled: true,
            shutdown_timeout_ms: 5000,
            dispatch: DispatchConfig::default(),
            path: PathConfig::default(),
            monitor_levels: BTreeMap::new(),
            processor_levels: BTreeMap::new(),
            groups: Vec::new(),
        }
    }
}

/// Where processors run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// On the thread that completes the monitor
    #[default]
    Inline,
    /// On a bounded worker pool
    Background,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub mode: DispatchMode,
    pub workers: usize,
    pub queue_capacity: usize,
    /// How long shutdown waits for queued monitors
    pub drain_timeout_ms: u64,
    pub overflow_warnings_per_window: usize,
    pub overflow_warning_window_secs: u64,
}

impl DispatchConfig {
    /// Drain window, capped at [`MAX_TIMEOUT_MS`]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms.min(MAX_TIMEOUT_MS))
    }

    /// Overflow warning window, capped at [`MAX_OVERFLOW_WARNING_WINDOW_SECS`]
    ///
    /// Unvalidated values never reach chrono's range limits.
    pub fn overflow_warning_window(&self) -> chrono::Duration {
        let secs = self
            .overflow_warning_window_secs
            .min(MAX_OVERFLOW_WARNING_WINDOW_SECS);
        chrono::Duration::try_seconds(secs as i64).unwrap_or_else(chrono::Duration::zero)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: DispatchMode::Inline,
            workers: 2,
            queue_capacity: 1024,
            drain_timeout_ms: 2000,
            overflow_warnings_per_window: 1,
            overflow_warning_window_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    pub strategy: StrategyKind,
    /// Monitors below this level are not tracked in the tree
    pub event_pattern_level: Level,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Stack,
            event_pattern_level: Level::Debug,
        }
    }
}

/// One `[[groups]]` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupConfig {
    #[serde(default)]
    pub name: Option<String>,
    /// Names of registered processors
    pub processors: Vec<String>,
    #[serde(default)]
    pub level: Level,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub predicate: Option<Predicate>,
}

fn default_active() -> bool {
    true
}

impl EngineConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read, and a parse
    /// or validation error if its contents are invalid.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig =
            toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that deserialize fine but cannot work
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch.mode == DispatchMode::Background {
            if self.dispatch.workers == 0 {
                return Err(ConfigError::ValidationError(
                    "dispatch.workers must be at least 1 in background mode".to_string(),
                ));
            }
            if self.dispatch.queue_capacity == 0 {
                return Err(ConfigError::ValidationError(
                    "dispatch.queue_capacity must be at least 1 in background mode".to_string(),
                ));
            }
            if self.dispatch.drain_timeout_ms == 0 {
                return Err(ConfigError::ValidationError(
                    "dispatch.drain_timeout_ms must be greater than 0 in background mode"
                        .to_string(),
                ));
            }
        }
        if self.dispatch.overflow_warning_window_secs == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch.overflow_warning_window_secs must be greater than 0".to_string(),
            ));
        }
        if self.dispatch.overflow_warning_window_secs > MAX_OVERFLOW_WARNING_WINDOW_SECS {
            return Err(ConfigError::ValidationError(format!(
                "dispatch.overflow_warning_window_secs must be at most {}",
                MAX_OVERFLOW_WARNING_WINDOW_SECS
            )));
        }
        if self.dispatch.drain_timeout_ms > MAX_TIMEOUT_MS {
            return Err(ConfigError::ValidationError(format!(
                "dispatch.drain_timeout_ms must be at most {}",
                MAX_TIMEOUT_MS
            )));
        }
        if self.shutdown_timeout_ms > MAX_TIMEOUT_MS {
            return Err(ConfigError::ValidationError(format!(
                "shutdown_timeout_ms must be at most {}",
                MAX_TIMEOUT_MS
            )));
        }
        for (index, group) in self.groups.iter().enumerate() {
            if group.processors.is_empty() {
                let label = group
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("#{}", index));
                return Err(ConfigError::ValidationError(format!(
                    "processor group {} lists no processors",
                    label
                )));
            }
        }
        Ok(())
    }

    /// Shutdown timeout, capped at [`MAX_TIMEOUT_MS`]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms.min(MAX_TIMEOUT_MS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(config.monitoring_enabled);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(5));
        assert_eq!(config.dispatch.queue_capacity, 1024);
        assert_eq!(config.path.strategy, StrategyKind::Stack);
        assert_eq!(config.path.event_pattern_level, Level::Debug);
    }

    #[test]
    fn test_full_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
monitoring_enabled = false
shutdown_timeout_ms = 250

[dispatch]
mode = "background"
workers = 4
queue_capacity = 16

[path]
strategy = "map"
event_pattern_level = "ESSENTIAL"

[monitor_levels]
"db." = "debug"

[processor_levels]
xml = "essential"

[[groups]]
name = "errors"
processors = ["log", "xml"]
level = "info"
predicate = {{ op = "equals", key = "failed", value = true }}

[[groups]]
processors = ["metrics"]
active = false
"#
        )
        .unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert!(!config.monitoring_enabled);
        assert_eq!(config.dispatch.mode, DispatchMode::Background);
        assert_eq!(config.dispatch.workers, 4);
        assert_eq!(config.dispatch.drain_timeout_ms, 2000);
        assert_eq!(config.path.strategy, StrategyKind::Map);
        assert_eq!(config.path.event_pattern_level, Level::Essential);
        assert_eq!(config.monitor_levels.get("db."), Some(&Level::Debug));
        assert_eq!(config.processor_levels.get("xml"), Some(&Level::Essential));
        assert_eq!(config.groups.len(), 2);
        assert_eq!(config.groups[0].name.as_deref(), Some("errors"));
        assert!(config.groups[0].predicate.is_some());
        assert!(!config.groups[1].active);
        assert_eq!(config.groups[1].level, Level::Info);
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = EngineConfig::from_file(Path::new("/nonexistent/monitrace.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError(_)));
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let err = EngineConfig::from_toml_str("shutdown_timeout_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
        let err = EngineConfig::from_toml_str("[path]\nstrategy = \"graph\"").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_validation_rejects_unusable_values() {
        let cases = [
            "[dispatch]\nmode = \"background\"\nworkers = 0",
            "[dispatch]\nmode = \"background\"\nqueue_capacity = 0",
            "[dispatch]\nmode = \"background\"\ndrain_timeout_ms = 0",
            "[dispatch]\noverflow_warning_window_secs = 0",
            "[[groups]]\nprocessors = []",
        ];
        for case in cases {
            let err = EngineConfig::from_toml_str(case).unwrap_err();
            assert!(
                matches!(err, ConfigError::ValidationError(_)),
                "case {:?} gave {:?}",
                case,
                err
            );
        }

        // Zero workers only matter in background mode
        assert!(EngineConfig::from_toml_str("[dispatch]\nworkers = 0").is_ok());
    }

    #[test]
    fn test_validation_rejects_out_of_range_windows() {
        let cases = [
            "[dispatch]\noverflow_warning_window_secs = 9223372036854775807",
            "[dispatch]\noverflow_warning_window_secs = 86401",
            "[dispatch]\ndrain_timeout_ms = 9223372036854775807",
            "shutdown_timeout_ms = 9223372036854775807",
        ];
        for case in cases {
            let err = EngineConfig::from_toml_str(case).unwrap_err();
            assert!(matches!(err, ConfigError::ValidationError(_)), "case {:?}", case);
        }
        assert!(EngineConfig::from_toml_str("[dispatch]\noverflow_warning_window_secs = 86400").is_ok());
    }

    #[test]
    fn test_unvalidated_windows_are_capped() {
        let config = EngineConfig {
            shutdown_timeout_ms: u64::MAX,
            dispatch: DispatchConfig {
                drain_timeout_ms: u64::MAX,
                overflow_warning_window_secs: u64::MAX,
                ..DispatchConfig::default()
            },
            ..EngineConfig::default()
        };
        assert_eq!(config.shutdown_timeout(), Duration::from_millis(MAX_TIMEOUT_MS));
        assert_eq!(config.dispatch.drain_timeout(), Duration::from_millis(MAX_TIMEOUT_MS));
        assert_eq!(
            config.dispatch.overflow_warning_window(),
            chrono::Duration::seconds(MAX_OVERFLOW_WARNING_WINDOW_SECS as i64)
        );
    }
}
