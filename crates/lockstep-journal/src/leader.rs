//! The authoritative role.
//!
//! A [`Leader`] executes ticks and actions on its staged model and records
//! the checksum of every step it observes. Those checksums are what
//! followers are held to.

use tracing::{debug, warn};

use crate::config::JournalConfig;
use crate::context::{Checksummer, ComputingContext, VerifyingContext};
use crate::error::JournalError;
use crate::listener::{JournalListener, ListenerSet};
use crate::model::{ActionResult, JournalModel, NullStepContext, Operation};
use crate::phase::StagingPhase;
use crate::position::JournalPosition;
use crate::serializer::ModelSerializer;
use crate::slot::{ComputedStep, StepRecord, TimelineSlot};
use crate::timeline::{HistoryTarget, Timeline};
use crate::walker::TimelineWalker;

/// Result of staging an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    /// The action's result code.
    pub result: ActionResult,
    /// Where the action was staged; `None` if it was refused before
    /// execution.
    pub slot: Option<TimelineSlot>,
}

/// A staged step and the checksum recorded for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepChecksum {
    /// Start position of the step.
    pub position: JournalPosition,
    /// Step name.
    pub name: String,
    /// Recorded checksum; 0 if none was computed.
    pub checksum: u32,
}

/// Authoritative journal role.
#[derive(Debug)]
pub struct Leader<M: JournalModel, S> {
    serializer: S,
    config: JournalConfig,
    timeline: Option<Timeline<M, ComputedStep>>,
    listeners: ListenerSet<M>,
    phase: StagingPhase,
    scratch: Vec<u8>,
}

impl<M, S> Leader<M, S>
where
    M: JournalModel,
    S: ModelSerializer<M>,
{
    /// Create a leader. It must be [set up](Self::setup) before use.
    pub fn new(serializer: S, config: JournalConfig) -> Self {
        Self {
            serializer,
            config,
            timeline: None,
            listeners: ListenerSet::default(),
            phase: StagingPhase::Idle,
            scratch: Vec::new(),
        }
    }

    /// Register a listener.
    pub fn add_listener(&mut self, listener: Box<dyn JournalListener<M>>) {
        self.listeners.add(listener);
    }

    /// Establish checkpoint and staged state at `position`, replacing any
    /// previous timeline.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::ReentrantStaging`] while an operation is
    /// executing, or [`JournalError::Serialization`] if the checkpoint
    /// cannot be serialized.
    pub fn setup(&mut self, model: M, position: JournalPosition, checkpointing: bool) -> Result<(), JournalError> {
        if self.phase == StagingPhase::Executing {
            return Err(JournalError::ReentrantStaging);
        }
        self.listeners.notify(|l| l.before_setup(position));
        let timeline = Timeline::setup(&self.serializer, model, position, checkpointing, &self.config)?;
        let timeline = self.timeline.insert(timeline);
        self.listeners.notify(|l| l.after_setup(position, timeline.staged()));
        Ok(())
    }

    /// Whether [`setup`](Self::setup) has run.
    pub const fn is_set_up(&self) -> bool {
        self.timeline.is_some()
    }

    /// The underlying timeline.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::NotSetUp`] before setup.
    pub fn timeline(&self) -> Result<&Timeline<M, ComputedStep>, JournalError> {
        self.timeline.as_ref().ok_or(JournalError::NotSetUp)
    }

    /// The staged model.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::NotSetUp`] before setup.
    pub fn staged_model(&self) -> Result<&M, JournalError> {
        Ok(self.timeline()?.staged())
    }

    /// Journal configuration.
    pub const fn config(&self) -> &JournalConfig {
        &self.config
    }

    /// Execute the next tick on the staged model.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::NotSetUp`], [`JournalError::ReentrantStaging`],
    /// or a position or serialization error.
    pub fn stage_tick(&mut self) -> Result<TimelineSlot, JournalError> {
        self.phase.enter()?;
        let outcome = self.run_tick();
        self.phase.leave();
        outcome
    }

    fn run_tick(&mut self) -> Result<TimelineSlot, JournalError> {
        let timeline = self.timeline.as_mut().ok_or(JournalError::NotSetUp)?;
        let start = timeline.next_tick_start()?;
        self.listeners.notify(|l| l.before_tick(start, timeline.staged()));

        let mut ctx = ComputingContext::new(
            Checksummer::new(&self.serializer, &mut self.scratch, self.config.serialization_version),
            self.config.compute_checksums,
        );
        let (_, slot) = timeline.stage(start, Operation::Tick, &mut ctx)?;
        debug!(%start, steps = slot.num_steps(), "Tick staged");

        self.listeners.notify(|l| l.after_tick(&slot, timeline.staged()));
        Ok(slot)
    }

    /// Dry-run `action` and, if it would apply, execute it as the next
    /// action of the current tick. A refused action stages nothing and
    /// notifies no listener.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::ActionBeforeFirstTick`] if no tick ran yet,
    /// [`JournalError::NotSetUp`], [`JournalError::ReentrantStaging`], or a
    /// position or serialization error.
    pub fn stage_action(&mut self, action: M::Action) -> Result<StageOutcome, JournalError> {
        self.phase.enter()?;
        let outcome = self.run_action(action);
        self.phase.leave();
        outcome
    }

    fn run_action(&mut self, action: M::Action) -> Result<StageOutcome, JournalError> {
        let timeline = self.timeline.as_mut().ok_or(JournalError::NotSetUp)?;
        let start = timeline.next_action_start()?;
        let verdict = timeline.staged().dry_run_action(&action);
        if !verdict.is_success() {
            debug!(%start, ?action, %verdict, "Action refused by dry run");
            return Ok(StageOutcome {
                result: verdict,
                slot: None,
            });
        }
        self.listeners.notify(|l| l.before_action(start, &action, timeline.staged()));

        let mut ctx = ComputingContext::new(
            Checksummer::new(&self.serializer, &mut self.scratch, self.config.serialization_version),
            self.config.compute_checksums,
        );
        let (result, slot) = timeline.stage(start, Operation::Action(action.clone()), &mut ctx)?;
        debug!(%start, steps = slot.num_steps(), %result, "Action staged");

        self.listeners
            .notify(|l| l.after_action(&slot, &action, &result, timeline.staged()));
        Ok(StageOutcome {
            result,
            slot: Some(slot),
        })
    }

    /// Move the checkpoint to `target`.
    ///
    /// When the checkpoint is advanced by replay and consistency checks are
    /// on, every replayed step is compared with the checksum recorded while
    /// staging. A divergence is logged (once per timeline) and the commit
    /// still completes.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::CommitOutOfRange`],
    /// [`JournalError::PartialCommit`], [`JournalError::NotSetUp`], or a
    /// serialization error.
    pub fn commit(&mut self, target: JournalPosition) -> Result<(), JournalError> {
        self.ensure_idle()?;
        let timeline = self.timeline.as_mut().ok_or(JournalError::NotSetUp)?;
        let plan = timeline.create_commit_plan(target)?;
        self.listeners.notify(|l| l.before_commit(target));

        let verify = self.config.consistency_checks
            && timeline.has_checkpoint()
            && plan.num_operations > 0
            && !plan.snapshot_match;
        if verify {
            let recorded = timeline.recorded_checksums(plan.end_of_operations);
            let mut ctx = VerifyingContext::new(
                Checksummer::new(&self.serializer, &mut self.scratch, self.config.serialization_version),
                recorded,
            );
            timeline.commit_operation_range(&self.serializer, plan, &mut ctx)?;
            let (mismatch, error) = ctx.into_outcome();
            if let Some(mismatch) = mismatch {
                timeline.report_divergence(&mismatch);
            }
            if let Some(e) = error {
                warn!(%e, "Consistency check could not serialize the checkpoint");
            }
        } else {
            timeline.commit_operation_range(&self.serializer, plan, &mut NullStepContext)?;
        }

        let checkpoint = timeline.checkpoint_position();
        self.listeners.notify(|l| l.after_commit(checkpoint));
        Ok(())
    }

    /// Discard every operation at or after `target` and rebuild the staged
    /// model there.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::CheckpointingDisabled`],
    /// [`JournalError::RollbackOutOfRange`],
    /// [`JournalError::PartialRollback`], [`JournalError::NotSetUp`], or a
    /// serialization error.
    pub fn rollback(&mut self, target: JournalPosition) -> Result<(), JournalError> {
        self.ensure_idle()?;
        let timeline = self.timeline.as_mut().ok_or(JournalError::NotSetUp)?;
        timeline.validate_rollback(target)?;
        self.listeners.notify(|l| l.before_rollback(target));
        timeline.rollback(&self.serializer, target)?;
        self.listeners.notify(|l| l.after_rollback(target, timeline.staged()));
        Ok(())
    }

    /// Snapshot the staged model at the staged position.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::CheckpointingDisabled`],
    /// [`JournalError::NotSetUp`], or a serialization error.
    pub fn capture_snapshot(&mut self) -> Result<(), JournalError> {
        let timeline = self.timeline.as_mut().ok_or(JournalError::NotSetUp)?;
        timeline.capture_stage_snapshot(&self.serializer)
    }

    /// Edit the checkpoint and staged models directly. Nothing is verified:
    /// the caller is responsible for keeping leader and followers in step.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::NotSetUp`], [`JournalError::ReentrantStaging`],
    /// or a serialization error.
    pub fn modify_history<F>(&mut self, modify: F) -> Result<(), JournalError>
    where
        F: FnMut(&mut M, HistoryTarget),
    {
        self.ensure_idle()?;
        let timeline = self.timeline.as_mut().ok_or(JournalError::NotSetUp)?;
        self.listeners.notify(|l| l.before_history_modification());
        timeline.modify_history(&self.serializer, modify)?;
        self.listeners
            .notify(|l| l.after_history_modification(timeline.staged()));
        Ok(())
    }

    /// Recompute the checksum at the end of the step starting at
    /// `step_position` and store it in the step record. A disagreement with
    /// a previously recorded non-zero checksum is logged as a warning.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::UnknownStep`],
    /// [`JournalError::CheckpointingDisabled`], [`JournalError::NotSetUp`],
    /// or a serialization error.
    pub fn force_compute_checksum(&mut self, step_position: JournalPosition) -> Result<u32, JournalError> {
        let timeline = self.timeline.as_mut().ok_or(JournalError::NotSetUp)?;
        let actual = timeline.probe_checksum(&self.serializer, step_position, &mut self.scratch)?;
        if let Some(record) = timeline.step_mut(step_position) {
            if record.checksum != 0 && record.checksum != actual {
                warn!(
                    position = %step_position,
                    step = %record.name,
                    recorded = record.checksum,
                    actual,
                    "Forced checksum disagrees with recorded checksum"
                );
            }
            record.checksum = actual;
        }
        Ok(actual)
    }

    /// An owned copy of the model at operation boundary `position`.
    ///
    /// # Errors
    ///
    /// See [`Timeline::create_historic_model_copy`].
    pub fn create_historic_model_copy(&self, position: JournalPosition) -> Result<M, JournalError> {
        self.timeline()?
            .create_historic_model_copy(&self.serializer, position)
    }

    /// An owned copy of the checkpoint model.
    ///
    /// # Errors
    ///
    /// See [`Timeline::checkpoint_model_copy`].
    pub fn checkpoint_model_copy(&self) -> Result<M, JournalError> {
        self.timeline()?.checkpoint_model_copy(&self.serializer)
    }

    /// Recorded checksums of every staged step at or after `from`.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::NotSetUp`].
    pub fn step_checksums(&self, from: JournalPosition) -> Result<Vec<StepChecksum>, JournalError> {
        let timeline = self.timeline()?;
        let mut walker = TimelineWalker::new(timeline, from);
        let mut checksums = Vec::new();
        while let Some(step) = walker.move_next(timeline)? {
            if let Some(record) = timeline.step(step.position) {
                checksums.push(StepChecksum {
                    position: step.position,
                    name: record.name().to_owned(),
                    checksum: record.checksum(),
                });
            }
        }
        Ok(checksums)
    }

    /// Recorded checksums of the steps of one staged operation, in order.
    /// This is the list a follower stages the same operation with.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::NotSetUp`].
    pub fn operation_checksums(&self, slot: &TimelineSlot) -> Result<Vec<u32>, JournalError> {
        let timeline = self.timeline()?;
        let until = slot.position_after()?;
        Ok(timeline
            .steps()
            .range(slot.start()..until)
            .map(|(_, record)| record.checksum())
            .collect())
    }

    /// Run `mutate` on the staged model outside of any operation. Nothing
    /// is recorded: the change will not be reproduced by replay.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::NotSetUp`] or
    /// [`JournalError::ReentrantStaging`].
    pub fn execute_unsynchronized<T>(&mut self, mutate: impl FnOnce(&mut M) -> T) -> Result<T, JournalError> {
        let timeline = self.timeline.as_mut().ok_or(JournalError::NotSetUp)?;
        self.phase.enter()?;
        self.listeners
            .notify(|l| l.begin_unsynchronized_actions(timeline.staged()));
        let value = mutate(timeline.staged_mut());
        self.listeners
            .notify(|l| l.end_unsynchronized_actions(timeline.staged()));
        self.phase.leave();
        Ok(value)
    }

    /// Poison outstanding walkers and commit plans.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::NotSetUp`].
    pub fn invalidate_ongoing_walks(&mut self) -> Result<(), JournalError> {
        self.timeline
            .as_mut()
            .ok_or(JournalError::NotSetUp)?
            .invalidate_ongoing_walks();
        Ok(())
    }

    fn ensure_idle(&self) -> Result<(), JournalError> {
        match self.phase {
            StagingPhase::Idle => Ok(()),
            StagingPhase::Executing => Err(JournalError::ReentrantStaging),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::serializer::JsonSerializer;
    use crate::testing::{Tally, TallyAction, tally_checksum};

    fn leader() -> Leader<Tally, JsonSerializer> {
        let mut leader = Leader::new(JsonSerializer, JournalConfig::default());
        leader.setup(Tally::default(), JournalPosition::EPOCH, true).unwrap();
        leader
    }

    #[test]
    fn staging_before_setup_fails() {
        let mut leader: Leader<Tally, JsonSerializer> = Leader::new(JsonSerializer, JournalConfig::default());
        assert!(matches!(leader.stage_tick(), Err(JournalError::NotSetUp)));
    }

    #[test]
    fn action_before_first_tick_is_rejected() {
        let mut leader = leader();
        let result = leader.stage_action(TallyAction::Add(1));
        assert!(matches!(result, Err(JournalError::ActionBeforeFirstTick { .. })));
    }

    #[test]
    fn tick_records_model_steps_plus_end_step() {
        let mut leader = leader();
        let slot = leader.stage_tick().unwrap();
        assert_eq!(slot.start(), JournalPosition::EPOCH);
        assert_eq!(slot.num_steps(), 2);

        let checksums = leader.step_checksums(JournalPosition::EPOCH).unwrap();
        assert_eq!(checksums.len(), 2);
        assert_eq!(checksums[0].name, "advance");
        assert_eq!(checksums[1].name, "end of tick");
        let staged = leader.staged_model().unwrap();
        assert_eq!(checksums[1].checksum, tally_checksum(staged));
    }

    #[test]
    fn positions_advance_tick_then_actions() {
        let mut leader = leader();
        leader.stage_tick().unwrap();
        let first = leader.stage_action(TallyAction::Add(2)).unwrap();
        let second = leader.stage_action(TallyAction::Add(3)).unwrap();
        assert_eq!(first.slot.unwrap().start(), JournalPosition::new(0, 1, 0));
        assert_eq!(second.slot.unwrap().start(), JournalPosition::new(0, 2, 0));

        let next_tick = leader.stage_tick().unwrap();
        assert_eq!(next_tick.start(), JournalPosition::before_tick(1));
    }

    #[test]
    fn refused_action_stages_nothing() {
        let mut leader = leader();
        leader.stage_tick().unwrap();
        let before = leader.timeline().unwrap().staged_position();
        let outcome = leader.stage_action(TallyAction::Forbidden).unwrap();
        assert!(!outcome.result.is_success());
        assert!(outcome.slot.is_none());
        assert_eq!(leader.timeline().unwrap().staged_position(), before);
    }

    #[test]
    fn commit_to_after_action_matches_staged_checksum() {
        let mut leader = leader();
        leader.stage_tick().unwrap();
        leader.stage_action(TallyAction::Add(5)).unwrap();
        let target = JournalPosition::after_action(0, 1).unwrap();
        leader.commit(target).unwrap();

        let timeline = leader.timeline().unwrap();
        assert_eq!(timeline.checkpoint_position(), target);
        assert_eq!(
            timeline.checkpoint().unwrap().checksum(),
            tally_checksum(timeline.staged())
        );
        assert!(timeline.operations().is_empty());
        assert!(timeline.steps().is_empty());
    }

    #[test]
    fn commit_inside_an_operation_is_partial() {
        let mut leader = leader();
        leader.stage_tick().unwrap();
        leader.stage_action(TallyAction::Spread { parts: 3, amount: 1 }).unwrap();
        let result = leader.commit(JournalPosition::new(0, 1, 2));
        assert!(matches!(result, Err(JournalError::PartialCommit { .. })));
    }

    #[test]
    fn commit_beyond_staged_is_out_of_range() {
        let mut leader = leader();
        leader.stage_tick().unwrap();
        let result = leader.commit(JournalPosition::before_tick(5));
        assert!(matches!(result, Err(JournalError::CommitOutOfRange { .. })));
    }

    #[test]
    fn rollback_discards_tail_and_restores_state() {
        let mut leader = leader();
        leader.stage_tick().unwrap();
        let after_tick = leader.timeline().unwrap().staged_position();
        let expected = tally_checksum(leader.staged_model().unwrap());
        leader.stage_action(TallyAction::Add(40)).unwrap();
        leader.stage_action(TallyAction::Add(2)).unwrap();

        leader.rollback(after_tick).unwrap();
        let timeline = leader.timeline().unwrap();
        assert_eq!(timeline.staged_position(), after_tick);
        assert_eq!(timeline.operations().len(), 1);
        assert_eq!(tally_checksum(timeline.staged()), expected);
    }

    #[test]
    fn rollback_without_checkpoint_is_rejected() {
        let mut leader: Leader<Tally, JsonSerializer> = Leader::new(JsonSerializer, JournalConfig::default());
        leader.setup(Tally::default(), JournalPosition::EPOCH, false).unwrap();
        leader.stage_tick().unwrap();
        let result = leader.rollback(JournalPosition::EPOCH);
        assert!(matches!(result, Err(JournalError::CheckpointingDisabled)));
    }

    #[test]
    fn force_compute_fills_disabled_checksums() {
        let config = JournalConfig {
            compute_checksums: false,
            ..JournalConfig::default()
        };
        let mut leader = Leader::new(JsonSerializer, config);
        leader.setup(Tally::default(), JournalPosition::EPOCH, true).unwrap();
        leader.stage_tick().unwrap();
        leader.stage_action(TallyAction::Spread { parts: 2, amount: 3 }).unwrap();
        leader.stage_action(TallyAction::Add(1)).unwrap();

        let middle = JournalPosition::new(0, 1, 1);
        assert_eq!(leader.timeline().unwrap().step(middle).unwrap().checksum, 0);
        let forced = leader.force_compute_checksum(middle).unwrap();
        assert_ne!(forced, 0);
        assert_eq!(leader.timeline().unwrap().step(middle).unwrap().checksum, forced);

        let unknown = leader.force_compute_checksum(JournalPosition::new(0, 1, 9));
        assert!(matches!(unknown, Err(JournalError::UnknownStep(_))));
    }

    #[test]
    fn forced_checksum_agrees_with_computed_one() {
        let mut leader = leader();
        leader.stage_tick().unwrap();
        leader.stage_action(TallyAction::Spread { parts: 3, amount: 2 }).unwrap();
        leader.stage_action(TallyAction::Add(1)).unwrap();
        let step = JournalPosition::new(0, 1, 2);
        let recorded = leader.timeline().unwrap().step(step).unwrap().checksum;
        assert_eq!(leader.force_compute_checksum(step).unwrap(), recorded);
    }

    #[test]
    fn history_modification_applies_to_both_models() {
        let mut leader = leader();
        leader.stage_tick().unwrap();
        leader.capture_snapshot().unwrap();
        let mut seen = Vec::new();
        leader
            .modify_history(|model, target| {
                model.value = model.value.wrapping_add(100);
                seen.push(target);
            })
            .unwrap();
        assert_eq!(seen, vec![HistoryTarget::Checkpoint, HistoryTarget::Staged]);
        let timeline = leader.timeline().unwrap();
        assert_eq!(timeline.snapshot_positions().count(), 0);
        assert_eq!(leader.checkpoint_model_copy().unwrap().value, 100);
    }

    #[test]
    fn walker_goes_stale_after_mutation() {
        let mut leader = leader();
        leader.stage_tick().unwrap();
        let mut walker = TimelineWalker::new(leader.timeline().unwrap(), JournalPosition::EPOCH);
        leader.stage_action(TallyAction::Add(1)).unwrap();
        let result = walker.move_next(leader.timeline().unwrap());
        assert!(matches!(result, Err(JournalError::StaleWalker { .. })));

        let mut walker = TimelineWalker::new(leader.timeline().unwrap(), JournalPosition::EPOCH);
        leader.invalidate_ongoing_walks().unwrap();
        assert!(walker.move_next(leader.timeline().unwrap()).is_err());
    }

    #[test]
    fn walker_starts_mid_operation() {
        let mut leader = leader();
        leader.stage_tick().unwrap();
        leader.stage_action(TallyAction::Spread { parts: 2, amount: 1 }).unwrap();
        let timeline = leader.timeline().unwrap();
        let mut walker = TimelineWalker::new(timeline, JournalPosition::new(0, 1, 1));
        let first = walker.move_next(timeline).unwrap().unwrap();
        assert_eq!(first.position, JournalPosition::new(0, 1, 1));
        assert!(!first.is_first_step);
        assert_eq!(first.num_steps, 3);
        assert_eq!(first.action, Some(&TallyAction::Spread { parts: 2, amount: 1 }));
        let second = walker.move_next(timeline).unwrap().unwrap();
        assert_eq!(second.position, JournalPosition::new(0, 1, 2));
        assert!(walker.move_next(timeline).unwrap().is_none());
    }

    #[test]
    fn unsynchronized_block_mutates_staged_model() {
        let mut leader = leader();
        leader.stage_tick().unwrap();
        let value = leader
            .execute_unsynchronized(|model| {
                model.value = 77;
                model.value
            })
            .unwrap();
        assert_eq!(value, 77);
        assert_eq!(leader.staged_model().unwrap().value, 77);
        assert!(leader.stage_tick().is_ok());
    }

    #[test]
    fn replay_divergence_is_reported_once_then_suppressed() {
        let mut leader = leader();
        leader.stage_tick().unwrap();
        leader.stage_action(TallyAction::Unstable).unwrap();
        leader.commit(JournalPosition::after_action(0, 1).unwrap()).unwrap();

        let timeline = leader.timeline().unwrap();
        assert_eq!(timeline.first_divergence(), Some(JournalPosition::new(0, 1, 1)));
        assert_eq!(timeline.suppressed_divergences(), 0);
        assert_eq!(timeline.checkpoint_position(), JournalPosition::after_action(0, 1).unwrap());

        leader.stage_tick().unwrap();
        leader.stage_action(TallyAction::Unstable).unwrap();
        leader.commit(JournalPosition::after_action(1, 1).unwrap()).unwrap();

        let timeline = leader.timeline().unwrap();
        assert_eq!(timeline.first_divergence(), Some(JournalPosition::new(0, 1, 1)));
        assert_eq!(timeline.suppressed_divergences(), 1);
    }

    #[test]
    fn deterministic_replay_reports_no_divergence() {
        let mut leader = leader();
        leader.stage_tick().unwrap();
        leader.stage_action(TallyAction::Spread { parts: 3, amount: 2 }).unwrap();
        leader.commit(JournalPosition::after_action(0, 1).unwrap()).unwrap();
        assert_eq!(leader.timeline().unwrap().first_divergence(), None);
    }

    #[test]
    fn snapshot_capacity_evicts_oldest_first() {
        let config = JournalConfig {
            max_snapshots: 2,
            ..JournalConfig::default()
        };
        let mut leader = Leader::new(JsonSerializer, config);
        leader.setup(Tally::default(), JournalPosition::EPOCH, true).unwrap();
        leader.stage_tick().unwrap();
        leader.capture_snapshot().unwrap();
        leader.stage_action(TallyAction::Add(1)).unwrap();
        leader.capture_snapshot().unwrap();
        leader.capture_snapshot().unwrap();
        assert_eq!(leader.timeline().unwrap().snapshot_positions().count(), 2);

        leader.stage_action(TallyAction::Add(2)).unwrap();
        leader.capture_snapshot().unwrap();
        let kept: Vec<JournalPosition> = leader.timeline().unwrap().snapshot_positions().collect();
        assert_eq!(kept, vec![JournalPosition::new(0, 2, 0), JournalPosition::new(0, 3, 0)]);
    }

    #[test]
    fn step_limit_overflow_blocks_staging_until_rollback() {
        let mut leader = leader();
        leader.stage_tick().unwrap();
        leader.stage_action(TallyAction::Add(5)).unwrap();
        let staged = leader.timeline().unwrap().staged_position();

        let result = leader.stage_action(TallyAction::Flood(70_000));
        assert!(matches!(result, Err(JournalError::TooManySteps { .. })));
        assert_eq!(leader.timeline().unwrap().staged_position(), staged);
        assert_eq!(leader.timeline().unwrap().operations().len(), 2);
        assert_ne!(leader.staged_model().unwrap().value, 6);
        assert!(matches!(leader.stage_tick(), Err(JournalError::StagedStateLost { .. })));

        leader.rollback(staged).unwrap();
        assert_eq!(leader.staged_model().unwrap().value, 6);
        assert!(leader.stage_tick().is_ok());
    }

    #[test]
    fn rejected_targets_fire_no_hooks() {
        let log = crate::testing::HookLog::default();
        let mut leader = leader();
        leader.stage_tick().unwrap();
        leader.stage_action(TallyAction::Spread { parts: 3, amount: 1 }).unwrap();
        leader.add_listener(Box::new(crate::testing::Recorder::new("a", &log)));

        let inside = JournalPosition::new(0, 1, 2);
        assert!(matches!(leader.commit(inside), Err(JournalError::PartialCommit { .. })));
        assert!(matches!(leader.rollback(inside), Err(JournalError::PartialRollback { .. })));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn historic_copy_is_independent_of_staged_model() {
        let mut leader = leader();
        leader.stage_tick().unwrap();
        let after_tick = leader.timeline().unwrap().staged_position();
        leader.stage_action(TallyAction::Add(9)).unwrap();

        let copy = leader.create_historic_model_copy(after_tick).unwrap();
        assert_eq!(copy.value, 1);
        assert_eq!(leader.staged_model().unwrap().value, 10);

        let inside = leader.create_historic_model_copy(JournalPosition::new(0, 0, 1));
        assert!(matches!(inside, Err(JournalError::InsideOperation { .. })));
    }
}
