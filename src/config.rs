use std::env;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::level::Level;
use crate::snapshot::SnapshotSize;

/// Environment variable holding the maximum level name.
pub const ENV_LEVEL: &str = "FAULT_LOGGER_LEVEL";
/// Environment variable holding the line buffer capacity in bytes.
pub const ENV_BUFFER: &str = "FAULT_LOGGER_BUFFER";

/// Default line buffer capacity.
pub const DEFAULT_BUFFER_CAPACITY: usize = 4096;

/// Settings for [`crate::Logger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggerConfig {
    pub max_level: Level,
    pub buffer_capacity: usize,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            max_level: Level::Debug,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

impl LoggerConfig {
    pub fn with_max_level(mut self, max_level: Level) -> Self {
        self.max_level = max_level;
        self
    }

    pub fn with_buffer_capacity(mut self, buffer_capacity: usize) -> Self {
        self.buffer_capacity = buffer_capacity;
        self
    }

    /// Defaults overridden by `FAULT_LOGGER_LEVEL` and `FAULT_LOGGER_BUFFER`.
    ///
    /// Unset variables keep their defaults; set but malformed ones are errors.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`LoggerConfig::from_env`] with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(level) = lookup(ENV_LEVEL) {
            config.max_level = level.parse()?;
        }
        if let Some(buffer) = lookup(ENV_BUFFER) {
            config.buffer_capacity = match buffer.trim().parse::<usize>() {
                Ok(capacity) if capacity > 1 => capacity,
                _ => {
                    return Err(Error::InvalidConfig {
                        key: ENV_BUFFER,
                        value: buffer,
                    })
                }
            };
        }
        Ok(config)
    }
}

/// Settings for [`crate::CrashHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashConfig {
    pub snapshot_size: SnapshotSize,
    /// Where the snapshot goes. `None` disables snapshots.
    pub snapshot_path: Option<PathBuf>,
    /// Run the crash path from the panic hook for panics that end the
    /// process. Panics on other threads, and panics the crate contains
    /// itself, are not crashes. Turn this off if the main thread recovers
    /// from panics with `catch_unwind`.
    pub capture_panics: bool,
}

impl Default for CrashConfig {
    fn default() -> Self {
        Self {
            snapshot_size: SnapshotSize::Small,
            snapshot_path: None,
            capture_panics: true,
        }
    }
}

impl CrashConfig {
    pub fn new(snapshot_size: SnapshotSize, snapshot_path: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_size,
            snapshot_path: Some(snapshot_path.into()),
            ..Self::default()
        }
    }

    pub fn with_capture_panics(mut self, capture_panics: bool) -> Self {
        self.capture_panics = capture_panics;
        self
    }

    /// Whether a trigger should attempt a snapshot at all.
    pub fn snapshots_enabled(&self) -> bool {
        self.snapshot_size != SnapshotSize::None && self.snapshot_path.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let config = LoggerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, LoggerConfig::default());
        assert_eq!(config.buffer_capacity, 4096);
        assert_eq!(config.max_level, Level::Debug);
    }

    #[test]
    fn test_env_overrides() {
        let config = LoggerConfig::from_lookup(lookup(&[(ENV_LEVEL, "warning"), (ENV_BUFFER, "512")])).unwrap();
        assert_eq!(config.max_level, Level::Warning);
        assert_eq!(config.buffer_capacity, 512);
    }

    #[test]
    fn test_malformed_env_is_rejected() {
        assert!(matches!(
            LoggerConfig::from_lookup(lookup(&[(ENV_LEVEL, "shouty")])),
            Err(Error::InvalidLevel(_))
        ));
        assert!(matches!(
            LoggerConfig::from_lookup(lookup(&[(ENV_BUFFER, "1")])),
            Err(Error::InvalidConfig { key: ENV_BUFFER, .. })
        ));
        assert!(LoggerConfig::from_lookup(lookup(&[(ENV_BUFFER, "lots")])).is_err());
    }

    #[test]
    fn test_crash_config_snapshot_switch() {
        assert!(!CrashConfig::default().snapshots_enabled());
        assert!(CrashConfig::new(SnapshotSize::Small, "/tmp/crash.dmp").snapshots_enabled());
        assert!(!CrashConfig::new(SnapshotSize::None, "/tmp/crash.dmp").snapshots_enabled());
    }
}
