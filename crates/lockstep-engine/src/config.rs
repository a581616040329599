//! Engine configuration loaded from `lockstep-config.yaml`.
//!
//! Every section and every field is optional; missing values fall back to
//! the defaults below.

use std::path::Path;

use lockstep_journal::JournalConfig;
use lockstep_sim::ColonyRules;
use serde::Deserialize;
use tracing::info;

use crate::error::EngineError;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "lockstep-config.yaml";

/// Environment variable overriding [`DEFAULT_CONFIG_PATH`].
pub const CONFIG_PATH_ENV: &str = "LOCKSTEP_CONFIG";

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    /// Switches shared by the leader and the follower journal.
    #[serde(default)]
    pub journal: JournalConfig,

    /// Session shape.
    #[serde(default)]
    pub session: SessionConfig,

    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Colony rules used by both peers.
    #[serde(default)]
    pub rules: ColonyRules,
}

/// How a session runs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionConfig {
    /// Ticks to run.
    #[serde(default = "default_ticks")]
    pub ticks: u32,

    /// Actions the leader proposes after every tick.
    #[serde(default = "default_actions_per_tick")]
    pub actions_per_tick: u32,

    /// Commit every this many ticks.
    #[serde(default = "default_commit_interval_ticks")]
    pub commit_interval_ticks: u32,

    /// Capture a snapshot every this many ticks; 0 disables snapshots.
    #[serde(default = "default_snapshot_interval_ticks")]
    pub snapshot_interval_ticks: u32,

    /// Tick at which a desync is injected, if any.
    #[serde(default)]
    pub desync_at_tick: Option<u32>,

    /// What kind of desync to inject.
    #[serde(default)]
    pub desync_kind: DesyncKind,

    /// Whether the follower keeps a checkpoint. The leader always does.
    #[serde(default = "default_checkpointing")]
    pub checkpointing: bool,

    /// Spawn seed shared by both peers.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Number of agents spawned.
    #[serde(default = "default_agents")]
    pub agents: u32,
}

/// Injected divergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesyncKind {
    /// Corrupt every checksum shipped from the desync tick until the next
    /// commit, as if the leader had diverged.
    #[default]
    ForgedChecksums,
    /// Run an extra tick on the follower outside of the journal.
    LocalEdit,
}

/// Logging switches.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ticks: default_ticks(),
            actions_per_tick: default_actions_per_tick(),
            commit_interval_ticks: default_commit_interval_ticks(),
            snapshot_interval_ticks: default_snapshot_interval_ticks(),
            desync_at_tick: None,
            desync_kind: DesyncKind::default(),
            checkpointing: default_checkpointing(),
            seed: default_seed(),
            agents: default_agents(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from `path`, or use defaults if it does not
    /// exist.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`], [`EngineError::Yaml`] or
    /// [`EngineError::InvalidConfig`].
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Self::parse(&contents)
        } else {
            info!(path = %path.display(), "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Parse and validate configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Yaml`] or [`EngineError::InvalidConfig`].
    pub fn parse(yaml: &str) -> Result<Self, EngineError> {
        let config: Self = serde_yml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the session cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] or the colony rules' own
    /// validation error.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.session.commit_interval_ticks == 0 {
            return Err(EngineError::InvalidConfig {
                reason: "session.commit_interval_ticks must be positive".to_owned(),
            });
        }
        if self.session.agents == 0 {
            return Err(EngineError::InvalidConfig {
                reason: "session.agents must be positive".to_owned(),
            });
        }
        self.rules.validate()?;
        Ok(())
    }
}

const fn default_ticks() -> u32 {
    24
}

const fn default_actions_per_tick() -> u32 {
    4
}

const fn default_commit_interval_ticks() -> u32 {
    4
}

const fn default_snapshot_interval_ticks() -> u32 {
    2
}

const fn default_checkpointing() -> bool {
    true
}

const fn default_seed() -> u64 {
    42
}

const fn default_agents() -> u32 {
    6
}

fn default_level() -> String {
    "info".to_owned()
}
