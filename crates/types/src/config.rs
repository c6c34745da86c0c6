//! Configuration types for Lattica KeyDir.
//!
//! Durations serialize in humantime format ("30s", "5m"). Each struct
//! validates its values via `validate()`, called by the fallible builders
//! and after deserialization.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigSnafu, KeydirError};

/// Duration serialization using humantime format.
pub mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

/// Per-directory revision timing and batching policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
pub struct DirectorySettings {
    /// Minimum wall time between successive revisions.
    #[serde(with = "duration_serde")]
    #[builder(default = Duration::from_secs(1))]
    pub min_interval: Duration,

    /// Maximum wall time between successive revisions. Once this lapses
    /// the sequencer forces a revision even with an empty queue (subject
    /// to `publish_empty_revisions`).
    #[serde(with = "duration_serde")]
    #[builder(default = Duration::from_secs(60 * 60))]
    pub max_interval: Duration,

    /// Whether to anchor empty revisions when `max_interval` lapses with
    /// no queued mutations.
    #[builder(default = true)]
    pub publish_empty_revisions: bool,

    /// Maximum number of queued mutations folded into one revision.
    #[builder(default = 1024)]
    pub max_batch_size: usize,
}

impl Default for DirectorySettings {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60 * 60),
            publish_empty_revisions: true,
            max_batch_size: 1024,
        }
    }
}

impl DirectorySettings {
    /// Validates interval ordering and batch bounds.
    pub fn validate(&self) -> Result<(), KeydirError> {
        snafu::ensure!(
            self.min_interval > Duration::ZERO,
            ConfigSnafu { message: "min_interval must be positive".to_string() }
        );
        snafu::ensure!(
            self.min_interval <= self.max_interval,
            ConfigSnafu {
                message: format!(
                    "min_interval {:?} exceeds max_interval {:?}",
                    self.min_interval, self.max_interval
                ),
            }
        );
        snafu::ensure!(
            self.max_batch_size > 0,
            ConfigSnafu { message: "max_batch_size must be positive".to_string() }
        );
        Ok(())
    }
}

/// Retry policy for transient backend failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
pub struct RetryConfig {
    /// First backoff delay.
    #[serde(with = "duration_serde")]
    #[builder(default = Duration::from_millis(50))]
    pub initial_backoff: Duration,

    /// Backoff ceiling.
    #[serde(with = "duration_serde")]
    #[builder(default = Duration::from_secs(10))]
    pub max_backoff: Duration,

    /// Multiplier applied per attempt.
    #[builder(default = 2)]
    pub multiplier: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(10),
            multiplier: 2,
        }
    }
}

impl RetryConfig {
    /// Validates backoff ordering.
    pub fn validate(&self) -> Result<(), KeydirError> {
        snafu::ensure!(
            self.initial_backoff > Duration::ZERO,
            ConfigSnafu { message: "initial_backoff must be positive".to_string() }
        );
        snafu::ensure!(
            self.initial_backoff <= self.max_backoff,
            ConfigSnafu { message: "initial_backoff exceeds max_backoff".to_string() }
        );
        snafu::ensure!(
            self.multiplier >= 1,
            ConfigSnafu { message: "multiplier must be at least 1".to_string() }
        );
        Ok(())
    }

    /// Backoff delay for `attempt` (0-based), capped at `max_backoff`.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.min(24));
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Rejected-mutation audit log configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
pub struct AuditConfig {
    /// Directory the audit files are written to. `None` disables the
    /// file audit log.
    pub path: Option<PathBuf>,

    /// Rotate the active file once it exceeds this many bytes.
    #[builder(default = 64 * 1024 * 1024)]
    pub max_file_bytes: u64,

    /// Number of rotated files to retain.
    #[builder(default = 4)]
    pub max_files: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { path: None, max_file_bytes: 64 * 1024 * 1024, max_files: 4 }
    }
}

impl AuditConfig {
    /// Validates rotation bounds.
    pub fn validate(&self) -> Result<(), KeydirError> {
        snafu::ensure!(
            self.max_file_bytes > 0,
            ConfigSnafu { message: "max_file_bytes must be positive".to_string() }
        );
        snafu::ensure!(
            self.max_files > 0,
            ConfigSnafu { message: "max_files must be positive".to_string() }
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_settings_defaults_are_valid() {
        let settings = DirectorySettings::default();
        settings.validate().expect("defaults should validate");
        assert!(settings.publish_empty_revisions);
        assert_eq!(settings.max_batch_size, 1024);
    }

    #[test]
    fn test_directory_settings_rejects_inverted_intervals() {
        let settings = DirectorySettings::builder()
            .min_interval(Duration::from_secs(120))
            .max_interval(Duration::from_secs(60))
            .build();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_directory_settings_rejects_zero_batch() {
        let settings = DirectorySettings::builder().max_batch_size(0).build();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_retry_backoff_grows_and_caps() {
        let retry = RetryConfig::builder()
            .initial_backoff(Duration::from_millis(100))
            .max_backoff(Duration::from_millis(450))
            .multiplier(2)
            .build();
        retry.validate().unwrap();

        assert_eq!(retry.backoff_for_attempt(0), Duration::from_millis(100));
        assert_eq!(retry.backoff_for_attempt(1), Duration::from_millis(200));
        assert_eq!(retry.backoff_for_attempt(2), Duration::from_millis(400));
        assert_eq!(retry.backoff_for_attempt(3), Duration::from_millis(450));
        assert_eq!(retry.backoff_for_attempt(30), Duration::from_millis(450));
    }

    #[test]
    fn test_duration_serde_humantime_roundtrip() {
        let settings = DirectorySettings::builder()
            .min_interval(Duration::from_secs(5))
            .max_interval(Duration::from_secs(90))
            .build();
        let json = serde_json::to_string(&settings).unwrap();
        assert!(json.contains("\"5s\""));
        assert!(json.contains("\"1m 30s\""));

        let back: DirectorySettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, settings);
    }
}
