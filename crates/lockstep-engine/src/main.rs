//! Lockstep session driver.
//!
//! Runs a leader and a follower colony side by side, ships operations and
//! per-step checksums from one to the other, and reports every commit.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `lockstep-config.yaml` (or `LOCKSTEP_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Spawn both colonies and set up both journals
//! 4. Run the session
//! 5. Log the summary

mod config;
mod error;
mod planner;
mod session;

use std::path::PathBuf;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH, EngineConfig};
use crate::session::Session;

/// Application entry point.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or either journal
/// refuses a call.
fn main() -> anyhow::Result<()> {
    let path = std::env::var_os(CONFIG_PATH_ENV).map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    let config = EngineConfig::load(&path)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_target(true)
        .init();

    info!(
        path = %path.display(),
        ticks = config.session.ticks,
        actions_per_tick = config.session.actions_per_tick,
        commit_interval_ticks = config.session.commit_interval_ticks,
        checkpointing = config.session.checkpointing,
        seed = config.session.seed,
        "lockstep-engine starting"
    );

    let mut session = Session::new(&config)?;
    let report = session.run()?;

    info!(
        ticks = report.ticks,
        operations = report.operations,
        refused = report.refused,
        commits = report.commits,
        conflicts = report.conflicts,
        drifts = report.drifts,
        resyncs = report.resyncs,
        events = report.events,
        "Session finished"
    );
    Ok(())
}
