//! A leader and a follower colony run side by side.
//!
//! The leader stages ticks and planner-proposed actions, then ships each
//! operation together with its per-step checksums through an in-memory
//! queue. The follower drains the queue, stages the same operations, and
//! verifies every commit. A follower that diverges is resynchronized from
//! the leader's checkpoint.

use std::collections::VecDeque;

use lockstep_journal::model::NullStepContext;
use lockstep_journal::slot::TimelineSlot;
use lockstep_journal::{
    CommitResult, Follower, JournalListener, JournalModel, JournalPosition, JsonSerializer, Leader, Operation,
    SideEffects,
};
use lockstep_sim::{Colony, ColonyAction, EventSink, spawn_colony};
use tracing::{debug, info};

use crate::config::{DesyncKind, EngineConfig, SessionConfig};
use crate::error::EngineError;
use crate::planner::ActionPlanner;

/// Mask applied to shipped checksums while a forged desync is active.
const FORGE_MASK: u32 = 0x5A5A_5A5A;

/// Counters collected over a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    /// Ticks run.
    pub ticks: u32,
    /// Operations shipped to the follower.
    pub operations: u64,
    /// Planner proposals the leader's dry run refused.
    pub refused: u64,
    /// Commits verified by the follower.
    pub commits: u32,
    /// Commits that reported a conflict.
    pub conflicts: u32,
    /// Commits that reported checkpoint drift.
    pub drifts: u32,
    /// Follower resynchronizations.
    pub resyncs: u32,
    /// Side-effect events emitted by the leader.
    pub events: usize,
}

/// One message from the leader to the follower.
#[derive(Debug)]
enum Shipment {
    Operation {
        operation: Operation<ColonyAction>,
        checksums: Vec<u32>,
    },
    Commit(JournalPosition),
}

/// Logs journal activity under a peer label.
struct TraceListener {
    peer: &'static str,
}

impl JournalListener<Colony> for TraceListener {
    fn after_setup(&mut self, position: JournalPosition, model: &Colony) {
        debug!(peer = self.peer, %position, agents = model.agents().len(), "Journal set up");
    }

    fn after_commit(&mut self, checkpoint: JournalPosition) {
        debug!(peer = self.peer, %checkpoint, "Checkpoint advanced");
    }

    fn begin_unsynchronized_actions(&mut self, model: &Colony) {
        debug!(peer = self.peer, tick = model.tick_count(), "Unsynchronized edit");
    }
}

/// A running lockstep session.
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    leader: Leader<Colony, JsonSerializer>,
    follower: Follower<Colony, JsonSerializer>,
    planner: ActionPlanner,
    queue: VecDeque<Shipment>,
    sink: EventSink,
    forging: bool,
    report: SessionReport,
}

impl Session {
    /// Spawn both colonies from the same seed and set up both journals at
    /// the epoch.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Sim`] if spawning fails or
    /// [`EngineError::Journal`] if a journal cannot be set up.
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        let session = config.session.clone();
        let sink = EventSink::new();

        let mut leading = spawn_colony(config.rules.clone(), session.seed, session.agents)?;
        leading.attach_sink(sink.clone());
        let following = spawn_colony(config.rules.clone(), session.seed, session.agents)?;

        let mut leader = Leader::new(JsonSerializer, config.journal.clone());
        leader.add_listener(Box::new(TraceListener { peer: "leader" }));
        leader.setup(leading, JournalPosition::EPOCH, true)?;

        let mut follower = Follower::new(JsonSerializer, config.journal.clone());
        follower.add_listener(Box::new(TraceListener { peer: "follower" }));
        follower.setup(following, JournalPosition::EPOCH, session.checkpointing)?;

        Ok(Self {
            planner: ActionPlanner::new(session.seed.wrapping_add(1)),
            config: session,
            leader,
            follower,
            queue: VecDeque::new(),
            sink,
            forging: false,
            report: SessionReport::default(),
        })
    }

    /// Run every configured tick and return the counters.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Journal`] if either journal refuses a call.
    pub fn run(&mut self) -> Result<SessionReport, EngineError> {
        for tick in 0..self.config.ticks {
            let desync = self.config.desync_at_tick == Some(tick);
            if desync && self.config.desync_kind == DesyncKind::ForgedChecksums {
                info!(tick, "Forging leader checksums until the next commit");
                self.forging = true;
            }

            self.lead_tick()?;
            let finished = tick.saturating_add(1);
            if is_due(finished, self.config.commit_interval_ticks) || finished == self.config.ticks {
                self.lead_commit()?;
            }
            self.pump()?;

            if desync && self.config.desync_kind == DesyncKind::LocalEdit {
                info!(tick, "Running an extra tick on the follower");
                self.follower
                    .execute_unsynchronized(|colony| colony.tick(&mut NullStepContext))?;
            }
            if is_due(finished, self.config.snapshot_interval_ticks) {
                self.capture_snapshots()?;
            }
            self.report.ticks = finished;
        }
        self.report.events = self.sink.len();
        Ok(self.report.clone())
    }

    fn lead_tick(&mut self) -> Result<(), EngineError> {
        let slot = self.leader.stage_tick()?;
        self.ship(Operation::Tick, &slot)?;

        for _ in 0..self.config.actions_per_tick {
            let Some(action) = self.planner.propose(self.leader.staged_model()?) else {
                break;
            };
            let outcome = self.leader.stage_action(action.clone())?;
            match outcome.slot {
                Some(slot) => self.ship(Operation::Action(action), &slot)?,
                None => {
                    debug!(?action, result = %outcome.result, "Proposal refused");
                    self.report.refused = self.report.refused.saturating_add(1);
                }
            }
        }
        Ok(())
    }

    fn ship(&mut self, operation: Operation<ColonyAction>, slot: &TimelineSlot) -> Result<(), EngineError> {
        let mut checksums = self.leader.operation_checksums(slot)?;
        if self.forging {
            for checksum in &mut checksums {
                *checksum ^= FORGE_MASK;
            }
        }
        self.queue.push_back(Shipment::Operation {
            operation,
            checksums,
        });
        self.report.operations = self.report.operations.saturating_add(1);
        Ok(())
    }

    fn lead_commit(&mut self) -> Result<(), EngineError> {
        let target = self.leader.timeline()?.staged_position();
        self.leader.commit(target)?;
        self.queue.push_back(Shipment::Commit(target));
        self.forging = false;
        Ok(())
    }

    fn pump(&mut self) -> Result<(), EngineError> {
        while let Some(shipment) = self.queue.pop_front() {
            match shipment {
                Shipment::Operation {
                    operation: Operation::Tick,
                    checksums,
                } => {
                    self.follower.stage_tick(&checksums)?;
                }
                Shipment::Operation {
                    operation: Operation::Action(action),
                    checksums,
                } => {
                    self.follower.stage_action(action, &checksums)?;
                }
                Shipment::Commit(target) => self.follow_commit(target)?,
            }
        }
        Ok(())
    }

    fn follow_commit(&mut self, target: JournalPosition) -> Result<(), EngineError> {
        let result = self.follower.commit(target)?;
        self.report.commits = self.report.commits.saturating_add(1);
        match &result {
            CommitResult::Ok => {
                debug!(%target, "Follower commit verified");
                return Ok(());
            }
            CommitResult::Conflict(_) => {
                self.report.conflicts = self.report.conflicts.saturating_add(1);
            }
            CommitResult::CheckpointDrift(_) => {
                self.report.drifts = self.report.drifts.saturating_add(1);
            }
        }
        info!(%target, %result, "Resynchronizing follower from the leader checkpoint");
        self.resync(target)
    }

    fn resync(&mut self, target: JournalPosition) -> Result<(), EngineError> {
        let mut model = self.leader.checkpoint_model_copy()?;
        model.attach_runtime_data(&None, SideEffects::Suppressed);
        self.follower.setup(model, target, self.config.checkpointing)?;
        self.report.resyncs = self.report.resyncs.saturating_add(1);
        Ok(())
    }

    fn capture_snapshots(&mut self) -> Result<(), EngineError> {
        self.leader.capture_snapshot()?;
        if self.config.checkpointing {
            self.follower.capture_snapshot()?;
        }
        Ok(())
    }
}

const fn is_due(finished: u32, interval: u32) -> bool {
    matches!(finished.checked_rem(interval), Some(0))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config(session: SessionConfig) -> EngineConfig {
        EngineConfig {
            session,
            ..EngineConfig::default()
        }
    }

    fn short(desync_at_tick: Option<u32>, desync_kind: DesyncKind, checkpointing: bool) -> SessionConfig {
        SessionConfig {
            ticks: 8,
            actions_per_tick: 3,
            commit_interval_ticks: 4,
            snapshot_interval_ticks: 2,
            desync_at_tick,
            desync_kind,
            checkpointing,
            ..SessionConfig::default()
        }
    }

    fn checkpoint_checksums(session: &Session) -> (u32, u32) {
        let leader = session.leader.timeline().unwrap().checkpoint().unwrap().checksum();
        let follower = session.follower.timeline().unwrap().checkpoint().unwrap().checksum();
        (leader, follower)
    }

    #[test]
    fn clean_session_stays_in_sync() {
        let mut session = Session::new(&config(short(None, DesyncKind::default(), true))).unwrap();
        let report = session.run().unwrap();
        assert_eq!(report.ticks, 8);
        assert_eq!(report.commits, 2);
        assert_eq!(report.conflicts, 0);
        assert_eq!(report.drifts, 0);
        assert!(report.operations >= 8);
        let (leader, follower) = checkpoint_checksums(&session);
        assert_eq!(leader, follower);
    }

    #[test]
    fn forged_checksums_are_reported_and_resynced() {
        let mut session =
            Session::new(&config(short(Some(2), DesyncKind::ForgedChecksums, true))).unwrap();
        let report = session.run().unwrap();
        assert_eq!(report.commits, 2);
        assert_eq!(report.conflicts, 1);
        assert_eq!(report.drifts, 0);
        assert_eq!(report.resyncs, 1);
        let (leader, follower) = checkpoint_checksums(&session);
        assert_eq!(leader, follower);
    }

    #[test]
    fn local_edit_is_reported_as_drift() {
        let mut session = Session::new(&config(short(Some(1), DesyncKind::LocalEdit, true))).unwrap();
        let report = session.run().unwrap();
        assert_eq!(report.conflicts, 0);
        assert_eq!(report.drifts, 1);
        assert_eq!(report.resyncs, 1);
    }

    #[test]
    fn follower_without_checkpoint_still_detects_forgery() {
        let mut session =
            Session::new(&config(short(Some(5), DesyncKind::ForgedChecksums, false))).unwrap();
        let report = session.run().unwrap();
        assert_eq!(report.commits, 2);
        assert_eq!(report.conflicts, 1);
        assert!(!session.follower.timeline().unwrap().has_checkpoint());
    }
}
