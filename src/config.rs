//! Configuration types for the reminder engine.

use crate::error::{ChimeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChimeConfig {
    /// Scheduler loop tuning.
    pub scheduler: SchedulerConfig,
    /// Reminder database location.
    pub store: StoreConfig,
    /// Notification text and snooze defaults.
    pub notifications: NotificationConfig,
}

/// Scheduler loop configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How late a fire may be processed before it counts as a misfire.
    pub misfire_grace_secs: u64,
    /// Upper bound on the persistence work of a single dispatch.
    pub dispatch_timeout_secs: u64,
    /// When completing a recurring reminder lands its next anchor in the
    /// past, the anchor is clamped to now plus this many seconds.
    pub catch_up_secs: u64,
    /// Capacity of the command channel between handles and the loop.
    pub command_buffer: usize,
    /// Longest single sleep of the loop, so wall-clock jumps are noticed.
    pub idle_poll_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            misfire_grace_secs: 60,
            dispatch_timeout_secs: 10,
            catch_up_secs: 60,
            command_buffer: 256,
            idle_poll_secs: 60,
        }
    }
}

impl SchedulerConfig {
    pub fn misfire_grace(&self) -> chrono::TimeDelta {
        seconds_delta(self.misfire_grace_secs)
    }

    pub fn catch_up(&self) -> chrono::TimeDelta {
        seconds_delta(self.catch_up_secs)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs.max(1))
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_secs(self.idle_poll_secs.max(1))
    }
}

/// Saturates at `TimeDelta::MAX` for values no `TimeDelta` can hold.
fn seconds_delta(secs: u64) -> chrono::TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::TimeDelta::try_seconds)
        .unwrap_or(chrono::TimeDelta::MAX)
}

/// Reminder database configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the SQLite database file.
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: data_dir().join("reminders.db"),
        }
    }
}

/// Notification configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Prepended to the task text of every fired reminder.
    pub prefix: String,
    /// Snooze length used when a caller does not give one.
    pub default_snooze_mins: u32,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            prefix: "🔔 Reminder: ".to_owned(),
            default_snooze_mins: 10,
        }
    }
}

impl ChimeConfig {
    /// Load config from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| ChimeError::Config(format!("invalid config {}: {e}", path.display())))
    }

    /// Load from `path` if it exists, otherwise defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write config to a TOML file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ChimeError::Config(format!("cannot serialize config: {e}")))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Default config file location (`<config dir>/chime/config.toml`).
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("chime"))
            .unwrap_or_else(|| PathBuf::from("/tmp/chime-config"))
            .join("config.toml")
    }
}

/// Platform data directory for chime.
fn data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("chime"))
        .unwrap_or_else(|| PathBuf::from("/tmp/chime-data"))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ChimeConfig::default();
        assert_eq!(config.scheduler.misfire_grace_secs, 60);
        assert_eq!(config.scheduler.catch_up(), chrono::TimeDelta::minutes(1));
        assert_eq!(config.notifications.prefix, "🔔 Reminder: ");
        assert_eq!(config.notifications.default_snooze_mins, 10);
        assert!(config.store.db_path.ends_with("reminders.db"));
    }

    #[test]
    fn huge_windows_saturate() {
        let config = SchedulerConfig {
            misfire_grace_secs: i64::MAX as u64 / 1_000 + 1,
            catch_up_secs: u64::MAX,
            ..SchedulerConfig::default()
        };
        assert_eq!(config.misfire_grace(), chrono::TimeDelta::MAX);
        assert_eq!(config.catch_up(), chrono::TimeDelta::MAX);

        let modest = SchedulerConfig {
            catch_up_secs: 86_400,
            ..SchedulerConfig::default()
        };
        assert_eq!(modest.catch_up(), chrono::TimeDelta::days(1));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: ChimeConfig = toml::from_str(
            r#"
            [scheduler]
            misfire_grace_secs = 5

            [notifications]
            prefix = "Reminder: "
            "#,
        )
        .unwrap();
        assert_eq!(config.scheduler.misfire_grace_secs, 5);
        assert_eq!(config.scheduler.dispatch_timeout_secs, 10);
        assert_eq!(config.notifications.prefix, "Reminder: ");
        assert_eq!(config.notifications.default_snooze_mins, 10);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = ChimeConfig::default();
        config.scheduler.idle_poll_secs = 15;
        config.store.db_path = dir.path().join("r.db");
        config.save_to_file(&path).unwrap();

        let loaded = ChimeConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ChimeConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, ChimeConfig::default());
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[scheduler\nmisfire_grace_secs = ").unwrap();
        let err = ChimeConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ChimeError::Config(_)));
    }

    #[test]
    fn zero_durations_are_floored() {
        let config = SchedulerConfig {
            dispatch_timeout_secs: 0,
            idle_poll_secs: 0,
            ..SchedulerConfig::default()
        };
        assert_eq!(config.dispatch_timeout(), Duration::from_secs(1));
        assert_eq!(config.idle_poll(), Duration::from_secs(1));
    }
}
