//! Error types for the `lockstep-sim` crate.

/// Errors raised while configuring or spawning a colony.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// Failed to read the rules file from disk.
    #[error("failed to read rules file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse rules YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The rules are internally inconsistent.
    #[error("invalid colony rules: {reason}")]
    InvalidRules {
        /// What is wrong.
        reason: String,
    },
}

impl From<serde_yml::Error> for SimError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}
