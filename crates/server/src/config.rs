//! Server configuration.
//!
//! CLI arguments (with environment-variable fallbacks) select the listen
//! address and an optional TOML config file; the file seeds directories
//! and tunes registry policy. CLI arguments override file values.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use lattica_keydir_types::config::{AuditConfig, DirectorySettings, RetryConfig};
use serde::Deserialize;
use snafu::{ResultExt, Snafu};

/// Command-line interface for the server binary.
#[derive(Debug, Parser)]
#[command(name = "lattica-keydir", about = "Lattica KeyDir transparency directory server")]
pub struct Cli {
    /// Address the HTTP gateway listens on.
    #[arg(long, env = "KEYDIR_LISTEN", default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// Path to a TOML config file.
    #[arg(long, env = "KEYDIR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log output format.
    #[arg(long, env = "KEYDIR_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Directory the rejected-mutation audit log is written to. Overrides
    /// the config file; when absent everywhere, auditing stays in memory.
    #[arg(long, env = "KEYDIR_AUDIT_DIR")]
    pub audit_dir: Option<PathBuf>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable single-line text.
    Text,
    /// JSON, one object per line.
    Json,
}

/// Error type for config loading.
#[derive(Debug, Snafu)]
pub enum ConfigFileError {
    /// The file could not be read.
    #[snafu(display("failed to read config file {path:?}: {source}"))]
    Read {
        /// The file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file could not be parsed.
    #[snafu(display("failed to parse config file {path:?}: {source}"))]
    Parse {
        /// The file path.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
}

/// A directory created at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectorySeed {
    /// The directory id.
    pub id: String,
    /// Revision timing and batching policy.
    #[serde(default)]
    pub settings: DirectorySettings,
}

/// TOML config file contents.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Grace period before a soft-deleted directory may be destroyed.
    #[serde(default, with = "humantime_opt")]
    pub gc_grace: Option<Duration>,

    /// Backend retry policy.
    #[serde(default)]
    pub retry: Option<RetryConfig>,

    /// Rejected-mutation audit settings.
    #[serde(default)]
    pub audit: AuditConfig,

    /// Directories created at startup.
    #[serde(default)]
    pub directories: Vec<DirectorySeed>,
}

impl FileConfig {
    /// Loads and parses a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigFileError> {
        let contents =
            std::fs::read_to_string(path).context(ReadSnafu { path: path.to_path_buf() })?;
        toml::from_str(&contents).context(ParseSnafu { path: path.to_path_buf() })
    }
}

/// Optional humantime duration serde.
mod humantime_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<String>::deserialize(deserializer)?;
        value
            .map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
