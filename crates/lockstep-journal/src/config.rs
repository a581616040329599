//! Journal configuration.
//!
//! [`JournalConfig`] is usually embedded in a host application's YAML
//! config; it can also be loaded on its own with [`JournalConfig::from_file`].

use std::path::Path;

use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Behaviour switches for a leader or follower journal.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JournalConfig {
    /// Compute a real checksum at every step while staging. When off, the
    /// leader records zero checksums and relies on
    /// [`Leader::force_compute_checksum`](crate::leader::Leader::force_compute_checksum).
    #[serde(default = "default_true")]
    pub compute_checksums: bool,

    /// Re-verify recorded checksums when the leader replays operations onto
    /// the checkpoint during commit.
    #[serde(default = "default_true")]
    pub consistency_checks: bool,

    /// Version passed to the serializer.
    #[serde(default = "default_serialization_version")]
    pub serialization_version: u32,

    /// Maximum number of retained snapshots. The oldest is evicted first.
    #[serde(default = "default_max_snapshots")]
    pub max_snapshots: usize,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            compute_checksums: true,
            consistency_checks: true,
            serialization_version: default_serialization_version(),
            max_snapshots: default_max_snapshots(),
        }
    }
}

impl JournalConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yml::from_str(yaml)?)
    }
}

const fn default_true() -> bool {
    true
}

const fn default_serialization_version() -> u32 {
    1
}

const fn default_max_snapshots() -> usize {
    8
}
