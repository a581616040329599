//! The replica role.
//!
//! A [`Follower`] executes the same operations as the leader but records
//! the leader's checksums instead of its own. Nothing is compared while
//! staging; the comparison happens at [`Follower::commit`], and a mismatch
//! triggers a replay from the checkpoint that pinpoints the first step at
//! which the two executions diverged.

use tracing::{debug, warn};

use crate::capture::{ConflictFinding, ConflictSearchContext, StateCapture};
use crate::commit::{CheckpointDrift, CommitConflict, CommitResult, SuspectOperation};
use crate::config::JournalConfig;
use crate::context::{Checksummer, ExpectedContext, run_operation};
use crate::error::JournalError;
use crate::leader::StageOutcome;
use crate::listener::{JournalListener, ListenerSet};
use crate::model::{ActionResult, JournalModel, Operation};
use crate::phase::StagingPhase;
use crate::position::JournalPosition;
use crate::serializer::{ModelSerializer, SnapshotBlob};
use crate::slot::{ExpectedStep, TimelineSlot};
use crate::timeline::{CommitPlan, HistoryTarget, StagedOperation, Timeline};

/// Replica journal role.
#[derive(Debug)]
pub struct Follower<M: JournalModel, S> {
    serializer: S,
    config: JournalConfig,
    timeline: Option<Timeline<M, ExpectedStep>>,
    listeners: ListenerSet<M>,
    phase: StagingPhase,
    scratch: Vec<u8>,
    capture: StateCapture,
}

impl<M, S> Follower<M, S>
where
    M: JournalModel,
    S: ModelSerializer<M>,
{
    /// Create a follower. It must be [set up](Self::setup) before use.
    pub fn new(serializer: S, config: JournalConfig) -> Self {
        Self {
            serializer,
            config,
            timeline: None,
            listeners: ListenerSet::default(),
            phase: StagingPhase::Idle,
            scratch: Vec::new(),
            capture: StateCapture::new(),
        }
    }

    /// Register a listener.
    pub fn add_listener(&mut self, listener: Box<dyn JournalListener<M>>) {
        self.listeners.add(listener);
    }

    /// Establish checkpoint and staged state at `position`. Calling it
    /// again resynchronizes the follower from a fresh model.
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
    pub fn timeline(&self) -> Result<&Timeline<M, ExpectedStep>, JournalError> {
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

    /// Execute the next tick, recording `expected` as the leader's
    /// per-step checksums.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::NotSetUp`], [`JournalError::ReentrantStaging`],
    /// or a position or serialization error.
    pub fn stage_tick(&mut self, expected: &[u32]) -> Result<TimelineSlot, JournalError> {
        self.phase.enter()?;
        let outcome = self.run(Operation::Tick, expected);
        self.phase.leave();
        Ok(outcome?.1)
    }

    /// Execute `action` as the next action of the current tick, recording
    /// `expected` as the leader's per-step checksums. The leader already
    /// accepted the action, so a local rejection is logged and the action
    /// stays staged; the divergence surfaces at commit.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::ActionBeforeFirstTick`] if no tick ran yet,
    /// [`JournalError::NotSetUp`], [`JournalError::ReentrantStaging`], or a
    /// position or serialization error.
    pub fn stage_action(&mut self, action: M::Action, expected: &[u32]) -> Result<StageOutcome, JournalError> {
        self.phase.enter()?;
        let outcome = self.run(Operation::Action(action), expected);
        self.phase.leave();
        let (result, slot) = outcome?;
        Ok(StageOutcome {
            result,
            slot: Some(slot),
        })
    }

    fn run(
        &mut self,
        operation: Operation<M::Action>,
        expected: &[u32],
    ) -> Result<(ActionResult, TimelineSlot), JournalError> {
        let timeline = self.timeline.as_mut().ok_or(JournalError::NotSetUp)?;
        let start = match &operation {
            Operation::Tick => timeline.next_tick_start()?,
            Operation::Action(_) => timeline.next_action_start()?,
        };
        match &operation {
            Operation::Tick => self.listeners.notify(|l| l.before_tick(start, timeline.staged())),
            Operation::Action(action) => self
                .listeners
                .notify(|l| l.before_action(start, action, timeline.staged())),
        }

        let observer = if timeline.has_checkpoint() {
            None
        } else {
            Some(Checksummer::new(
                &self.serializer,
                &mut self.scratch,
                self.config.serialization_version,
            ))
        };
        let mut ctx = ExpectedContext::new(expected, observer);
        let action = operation.action().cloned();
        let (result, slot) = timeline.stage(start, operation, &mut ctx)?;
        if !result.is_success() {
            warn!(%start, %result, "Leader-accepted action was rejected locally");
        }
        debug!(%start, steps = slot.num_steps(), supplied = expected.len(), "Operation staged");

        match &action {
            None => self.listeners.notify(|l| l.after_tick(&slot, timeline.staged())),
            Some(action) => self
                .listeners
                .notify(|l| l.after_action(&slot, action, &result, timeline.staged())),
        }
        Ok((result, slot))
    }

    /// Move the checkpoint to `target`, comparing the local state there
    /// with the checksum the leader supplied for the last absorbed step.
    /// With consistency checks enabled and a checkpoint available, every
    /// supplied step in the range is verified by replay, so a divergence
    /// that does not reach the boundary is still reported.
    ///
    /// The checkpoint advances to the locally observed state whatever the
    /// outcome; divergence is reported through the returned
    /// [`CommitResult`].
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::CommitOutOfRange`],
    /// [`JournalError::PartialCommit`], [`JournalError::NotSetUp`],
    /// [`JournalError::ReentrantStaging`], or a serialization error.
    pub fn commit(&mut self, target: JournalPosition) -> Result<CommitResult<M::Action>, JournalError> {
        if self.phase == StagingPhase::Executing {
            return Err(JournalError::ReentrantStaging);
        }
        let timeline = self.timeline.as_mut().ok_or(JournalError::NotSetUp)?;
        let plan = timeline.create_commit_plan(target)?;
        self.listeners.notify(|l| l.before_commit(target));

        let result = if plan.num_operations == 0 {
            timeline.commit_with_blob(plan, None)?;
            CommitResult::Ok
        } else if timeline.has_checkpoint() {
            let verify_steps = self.config.consistency_checks;
            commit_checkpointed(timeline, &self.serializer, &mut self.capture, plan, verify_steps)?
        } else {
            let result = compare_observed(timeline, &plan);
            timeline.commit_with_blob(plan, None)?;
            result
        };

        let checkpoint = timeline.checkpoint_position();
        self.listeners.notify(|l| l.after_commit(checkpoint));
        Ok(result)
    }

    /// Replay from the checkpoint up to `target` and report the first step
    /// whose checksum disagrees with the leader's, without committing.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::CheckpointingDisabled`],
    /// [`JournalError::CommitOutOfRange`], [`JournalError::PartialCommit`],
    /// [`JournalError::NotSetUp`], or a serialization error.
    pub fn find_commit_conflict(
        &mut self,
        target: JournalPosition,
    ) -> Result<Option<CommitConflict<M::Action>>, JournalError> {
        let timeline = self.timeline.as_ref().ok_or(JournalError::NotSetUp)?;
        let plan = timeline.create_commit_plan(target)?;
        search_conflict(timeline, &self.serializer, &mut self.capture, &plan)
    }

    /// Discard every operation at or after `target` and rebuild the staged
    /// model there.
    ///
    /// # Errors
    ///
    /// See [`Timeline::rollback`].
    pub fn rollback(&mut self, target: JournalPosition) -> Result<(), JournalError> {
        if self.phase == StagingPhase::Executing {
            return Err(JournalError::ReentrantStaging);
        }
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
    /// See [`Timeline::capture_stage_snapshot`].
    pub fn capture_snapshot(&mut self) -> Result<(), JournalError> {
        let timeline = self.timeline.as_mut().ok_or(JournalError::NotSetUp)?;
        timeline.capture_stage_snapshot(&self.serializer)
    }

    /// Edit the checkpoint and staged models directly.
    ///
    /// # Errors
    ///
    /// See [`Timeline::modify_history`].
    pub fn modify_history<F>(&mut self, modify: F) -> Result<(), JournalError>
    where
        F: FnMut(&mut M, HistoryTarget),
    {
        if self.phase == StagingPhase::Executing {
            return Err(JournalError::ReentrantStaging);
        }
        let timeline = self.timeline.as_mut().ok_or(JournalError::NotSetUp)?;
        self.listeners.notify(|l| l.before_history_modification());
        timeline.modify_history(&self.serializer, modify)?;
        self.listeners
            .notify(|l| l.after_history_modification(timeline.staged()));
        Ok(())
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

    /// Run `mutate` on the staged model outside of any operation.
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
}

/// Commit with a checkpoint: compute the actual state at the commit end,
/// compare, search for the conflict on mismatch (or whenever `verify_steps`
/// is set and the leader supplied any checksum), then adopt the state.
fn commit_checkpointed<M, S>(
    timeline: &mut Timeline<M, ExpectedStep>,
    serializer: &S,
    capture: &mut StateCapture,
    plan: CommitPlan,
    verify_steps: bool,
) -> Result<CommitResult<M::Action>, JournalError>
where
    M: JournalModel,
    S: ModelSerializer<M>,
{
    let expected = plan
        .last_step
        .and_then(|position| timeline.step(position))
        .map_or(0, |step| step.expected);
    let end = plan.end_of_operations;
    let version = timeline.serialization_version();

    let blob = if plan.snapshot_match {
        timeline.take_snapshot(end)
    } else {
        None
    };
    let blob = match blob {
        Some(blob) => blob,
        None if end == timeline.staged_position() => SnapshotBlob::capture(serializer, timeline.staged(), version)?,
        None => {
            let model = timeline.create_historic_model_copy(serializer, end)?;
            SnapshotBlob::capture(serializer, &model, version)?
        }
    };
    let actual = blob.checksum();

    let boundary_diverged = expected != 0 && expected != actual;
    let result = if !boundary_diverged && !(verify_steps && any_supplied(timeline, &plan)) {
        CommitResult::Ok
    } else {
        match search_conflict(timeline, serializer, capture, &plan)? {
            Some(conflict) => {
                warn!(
                    position = %conflict.step_position,
                    step = %conflict.step_name,
                    expected = conflict.expected_checksum,
                    actual = conflict.actual_checksum,
                    suspects = conflict.suspect_operations.len(),
                    "Commit conflict"
                );
                CommitResult::Conflict(Box::new(conflict))
            }
            None if !boundary_diverged => CommitResult::Ok,
            None => {
                warn!(%end, expected, actual, "Checkpoint drift; adopting commit target state");
                CommitResult::CheckpointDrift(CheckpointDrift {
                    position: plan.target,
                    expected_checksum: expected,
                    actual_checksum: actual,
                })
            }
        }
    };
    timeline.commit_with_blob(plan, Some(blob))?;
    Ok(result)
}

/// Whether the leader supplied a checksum for any step the plan absorbs.
fn any_supplied<M>(timeline: &Timeline<M, ExpectedStep>, plan: &CommitPlan) -> bool
where
    M: JournalModel,
{
    timeline
        .steps()
        .range(..plan.end_of_operations)
        .any(|(_, step)| step.expected != 0)
}

/// Without a checkpoint only the checksum observed while staging the last
/// operation is available; a mismatch implicates the whole batch.
fn compare_observed<M>(timeline: &Timeline<M, ExpectedStep>, plan: &CommitPlan) -> CommitResult<M::Action>
where
    M: JournalModel,
{
    let Some(last_step) = plan.last_step else {
        return CommitResult::Ok;
    };
    let Some(step) = timeline.step(last_step) else {
        return CommitResult::Ok;
    };
    let observed = step.observed.unwrap_or(0);
    if step.expected == 0 || step.expected == observed {
        return CommitResult::Ok;
    }

    let batch = absorbed(timeline, plan);
    warn!(
        position = %last_step,
        expected = step.expected,
        actual = observed,
        operations = batch.len(),
        "Commit conflict without checkpoint; whole batch is suspect"
    );
    CommitResult::Conflict(Box::new(CommitConflict {
        position: plan.end_of_operations,
        step_position: last_step,
        step_name: step.name.clone(),
        expected_checksum: step.expected,
        actual_checksum: observed,
        state_before: None,
        state_after: None,
        action: batch.last().and_then(|op| op.operation.action().cloned()),
        suspect_start: timeline.checkpoint_position(),
        suspect_operations: batch.iter().map(suspect).collect(),
        localized: false,
    }))
}

/// Replay the plan's operations from a copy of the checkpoint, checking
/// every step against the leader's checksums.
fn search_conflict<M, S>(
    timeline: &Timeline<M, ExpectedStep>,
    serializer: &S,
    capture: &mut StateCapture,
    plan: &CommitPlan,
) -> Result<Option<CommitConflict<M::Action>>, JournalError>
where
    M: JournalModel,
    S: ModelSerializer<M>,
{
    let version = timeline.serialization_version();
    let mut model = timeline.checkpoint_model_copy(serializer)?;
    let expected = timeline.recorded_checksums(plan.end_of_operations);
    let session = capture.begin(serializer, &model, version)?;
    let mut ctx = ConflictSearchContext::new(serializer, version, session, &expected, timeline.checkpoint_position());

    let batch = absorbed(timeline, plan);
    for op in batch {
        run_operation(&mut model, op.slot.start(), &op.operation, &mut ctx);
        if ctx.is_done() {
            break;
        }
    }
    let outcome = ctx.into_outcome();
    if let Some(e) = outcome.error {
        return Err(e.into());
    }
    let Some(finding) = outcome.finding else {
        debug!(target = %plan.target, "Replay reproduced no divergence");
        return Ok(None);
    };
    Ok(Some(conflict_from(batch, finding, outcome.last_verified)))
}

fn conflict_from<A: Clone>(
    batch: &[StagedOperation<A>],
    finding: ConflictFinding,
    last_verified: JournalPosition,
) -> CommitConflict<A> {
    let step = finding.step_position;
    let suspects: Vec<SuspectOperation<A>> = batch
        .iter()
        .filter(|op| op.slot.start() <= step && op.slot.position_after().is_ok_and(|after| after > last_verified))
        .map(suspect)
        .collect();
    let action = batch
        .iter()
        .find(|op| op.slot.start() <= step && op.slot.position_after().is_ok_and(|after| step < after))
        .and_then(|op| op.operation.action().cloned());
    CommitConflict {
        position: finding.position,
        step_position: step,
        step_name: finding.step_name,
        expected_checksum: finding.expected,
        actual_checksum: finding.actual,
        state_before: Some(finding.state_before),
        state_after: Some(finding.state_after),
        action,
        suspect_start: last_verified,
        suspect_operations: suspects,
        localized: true,
    }
}

fn absorbed<'t, M>(timeline: &'t Timeline<M, ExpectedStep>, plan: &CommitPlan) -> &'t [StagedOperation<M::Action>]
where
    M: JournalModel,
{
    timeline
        .operations()
        .get(..plan.num_operations)
        .unwrap_or_default()
}

fn suspect<A: Clone>(op: &StagedOperation<A>) -> SuspectOperation<A> {
    SuspectOperation {
        start: op.slot.start(),
        kind: op.slot.kind(),
        action: op.operation.action().cloned(),
    }
}
