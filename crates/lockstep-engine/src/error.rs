//! Error types for the lockstep engine binary.
//!
//! [`EngineError`] wraps every failure mode of configuration loading and
//! session execution so `main` can propagate it with `?`.

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse the configuration YAML.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The configuration parsed but is unusable.
    #[error("invalid config: {reason}")]
    InvalidConfig {
        /// What is wrong.
        reason: String,
    },

    /// The colony could not be created.
    #[error("sim error: {source}")]
    Sim {
        /// The underlying simulation error.
        #[from]
        source: lockstep_sim::SimError,
    },

    /// A journal call was refused.
    #[error("journal error: {source}")]
    Journal {
        /// The underlying journal error.
        #[from]
        source: lockstep_journal::JournalError,
    },
}

impl From<serde_yml::Error> for EngineError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}
