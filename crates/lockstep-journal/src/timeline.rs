//! The timeline shared by leader and follower.
//!
//! A [`Timeline`] owns four pieces of state:
//!
//! 1. the **checkpoint**: the last known-good state at `checkpoint_position`
//!    (absent when checkpointing is disabled),
//! 2. the **staged model**: the speculative state at `staged_position`,
//! 3. the **staged operations** executed since the checkpoint, each with its
//!    [`TimelineSlot`], and the per-step records they produced,
//! 4. the **snapshots**: serialized copies of the staged model keyed by the
//!    position they were captured at, always within
//!    `(checkpoint_position, staged_position]`.
//!
//! Commit moves the checkpoint forward over a prefix of the staged
//! operations. Rollback discards a suffix and rebuilds the staged model.
//! Every structural mutation bumps [`Timeline::version`] so outstanding
//! walkers and commit plans fail fast.

use std::collections::BTreeMap;
use std::ops::Bound;

use tracing::{debug, error, info, warn};

use crate::checkpoint::Checkpoint;
use crate::config::JournalConfig;
use crate::context::{Checksummer, OperationContext, ProbeContext, RecordingContext, StepMismatch, run_operation};
use crate::error::JournalError;
use crate::model::{ActionResult, JournalModel, NullStepContext, Operation, SideEffects};
use crate::position::JournalPosition;
use crate::serializer::{ModelSerializer, SnapshotBlob, checksum_model, copy_model};
use crate::slot::{StepRecord, TimelineSlot};

/// One executed operation kept until it is committed or rolled back.
#[derive(Debug, Clone)]
pub struct StagedOperation<A> {
    /// Where the operation sits and how many steps it produced.
    pub slot: TimelineSlot,
    /// The tick marker or action payload.
    pub operation: Operation<A>,
}

/// Which model a history modification is being applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryTarget {
    /// The checkpoint model.
    Checkpoint,
    /// The staged model.
    Staged,
}

/// What a commit to a given position would do.
///
/// Plans are tied to the timeline version they were built at; applying a
/// plan after any structural change fails with [`JournalError::StalePlan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitPlan {
    /// The requested commit target; becomes the checkpoint position.
    pub target: JournalPosition,
    /// Number of leading staged operations absorbed by the commit.
    pub num_operations: usize,
    /// Position right after the last absorbed operation (the checkpoint
    /// position when nothing is absorbed).
    pub end_of_operations: JournalPosition,
    /// Whether a snapshot exists at `end_of_operations` and can replace
    /// replay.
    pub snapshot_match: bool,
    /// Start of the last absorbed step.
    pub last_step: Option<JournalPosition>,
    /// Timeline version the plan was built at.
    pub version: u64,
}

/// Checkpoint, staged model, staged operations and snapshots.
///
/// `R` is the per-step record type: computed checksums on the leader,
/// expected checksums on the follower.
#[derive(Debug)]
pub struct Timeline<M: JournalModel, R> {
    checkpoint: Option<Checkpoint<M>>,
    checkpoint_position: JournalPosition,
    staged: M,
    staged_position: JournalPosition,
    operations: Vec<StagedOperation<M::Action>>,
    steps: BTreeMap<JournalPosition, R>,
    snapshots: BTreeMap<JournalPosition, SnapshotBlob>,
    context: M::Context,
    version: u64,
    serialization_version: u32,
    compute_checksums: bool,
    max_snapshots: usize,
    first_divergence: Option<JournalPosition>,
    suppressed_divergences: u32,
    staged_lost: bool,
}

impl<M, R> Timeline<M, R>
where
    M: JournalModel,
    R: StepRecord,
{
    /// Establish checkpoint and staged state at `position` from `model`.
    ///
    /// The model moves into the timeline and becomes the staged model. With
    /// checkpointing enabled it is also serialized as the checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Serialization`] if the checkpoint cannot be
    /// serialized.
    pub fn setup<S>(
        serializer: &S,
        model: M,
        position: JournalPosition,
        checkpointing: bool,
        config: &JournalConfig,
    ) -> Result<Self, JournalError>
    where
        S: ModelSerializer<M>,
    {
        let version = config.serialization_version;
        let checkpoint = if checkpointing {
            let blob = SnapshotBlob::capture(serializer, &model, version)?;
            let checksum = if config.compute_checksums {
                blob.checksum()
            } else {
                0
            };
            Some(Checkpoint::from_blob(blob, checksum))
        } else {
            None
        };
        info!(%position, checkpointing, "Timeline set up");
        Ok(Self {
            checkpoint,
            checkpoint_position: position,
            context: model.resolution_context(),
            staged: model,
            staged_position: position,
            operations: Vec::new(),
            steps: BTreeMap::new(),
            snapshots: BTreeMap::new(),
            version: 0,
            serialization_version: version,
            compute_checksums: config.compute_checksums,
            max_snapshots: config.max_snapshots,
            first_divergence: None,
            suppressed_divergences: 0,
            staged_lost: false,
        })
    }

    /// Position of the checkpoint.
    pub const fn checkpoint_position(&self) -> JournalPosition {
        self.checkpoint_position
    }

    /// Position right after the last staged operation.
    pub const fn staged_position(&self) -> JournalPosition {
        self.staged_position
    }

    /// The staged model.
    pub const fn staged(&self) -> &M {
        &self.staged
    }

    pub(crate) const fn staged_mut(&mut self) -> &mut M {
        &mut self.staged
    }

    /// Whether checkpointing is enabled.
    pub const fn has_checkpoint(&self) -> bool {
        self.checkpoint.is_some()
    }

    /// The checkpoint, if checkpointing is enabled.
    pub const fn checkpoint(&self) -> Option<&Checkpoint<M>> {
        self.checkpoint.as_ref()
    }

    /// Staged operations in execution order.
    pub fn operations(&self) -> &[StagedOperation<M::Action>] {
        &self.operations
    }

    /// The record of the step starting at `position`.
    pub fn step(&self, position: JournalPosition) -> Option<&R> {
        self.steps.get(&position)
    }

    pub(crate) fn step_mut(&mut self, position: JournalPosition) -> Option<&mut R> {
        self.steps.get_mut(&position)
    }

    /// All staged step records, keyed by start position.
    pub const fn steps(&self) -> &BTreeMap<JournalPosition, R> {
        &self.steps
    }

    /// Positions of retained snapshots.
    pub fn snapshot_positions(&self) -> impl Iterator<Item = JournalPosition> + '_ {
        self.snapshots.keys().copied()
    }

    /// Structural version; bumped by every mutation of operations, steps or
    /// positions.
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Serializer version in use.
    pub const fn serialization_version(&self) -> u32 {
        self.serialization_version
    }

    /// Checksums recorded for steps starting before `until`.
    pub fn recorded_checksums(&self, until: JournalPosition) -> BTreeMap<JournalPosition, u32> {
        self.steps
            .range(..until)
            .map(|(position, record)| (*position, record.checksum()))
            .collect()
    }

    /// Poison every outstanding walker and commit plan.
    pub const fn invalidate_ongoing_walks(&mut self) {
        self.version = self.version.wrapping_add(1);
    }

    /// Where the next tick starts: the staged position if it already is a
    /// tick boundary, otherwise the start of the following tick.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Position`] if the tick counter is exhausted
    /// and [`JournalError::StagedStateLost`] after a failed staging.
    pub fn next_tick_start(&self) -> Result<JournalPosition, JournalError> {
        self.ensure_staged_intact()?;
        let staged = self.staged_position;
        if staged == JournalPosition::before_tick(staged.tick()) {
            Ok(staged)
        } else {
            Ok(JournalPosition::next_tick(staged)?)
        }
    }

    /// Where the next action starts.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::ActionBeforeFirstTick`] if the staged
    /// position has no tick before it and [`JournalError::StagedStateLost`]
    /// after a failed staging.
    pub fn next_action_start(&self) -> Result<JournalPosition, JournalError> {
        self.ensure_staged_intact()?;
        let staged = self.staged_position;
        if staged.operation() == 0 {
            return Err(JournalError::ActionBeforeFirstTick { staged });
        }
        Ok(JournalPosition::before_action(staged.tick(), staged.operation())?)
    }

    /// Execute `operation` on the staged model at `start` and append it.
    ///
    /// The operation is recorded even if the context reports a
    /// serialization failure; the failure is returned afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::TooManySteps`] if the operation produced
    /// more steps than a position can address, [`JournalError::Position`]
    /// if the operation counter is exhausted, or
    /// [`JournalError::Serialization`] from the context.
    ///
    /// On the first two the operation already ran on the staged model but
    /// nothing was recorded. The timeline refuses further staging until
    /// [`rollback`](Self::rollback) rebuilds the staged model from the
    /// checkpoint, or the journal is set up again.
    pub fn stage<C>(
        &mut self,
        start: JournalPosition,
        operation: Operation<M::Action>,
        ctx: &mut C,
    ) -> Result<(ActionResult, TimelineSlot), JournalError>
    where
        C: RecordingContext<M, R>,
    {
        let result = run_operation(&mut self.staged, start, &operation, ctx);
        let records = ctx.take_records();
        let Ok(num_steps) = u16::try_from(records.len()) else {
            self.staged_lost = true;
            warn!(
                %start,
                steps = records.len(),
                "Operation exceeded the step limit; staged model lost"
            );
            return Err(JournalError::TooManySteps { start });
        };
        let slot = TimelineSlot::new(operation.kind(), start, num_steps);
        let after = match slot.position_after() {
            Ok(after) => after,
            Err(e) => {
                self.staged_lost = true;
                return Err(e.into());
            }
        };

        for (step, record) in (0..=u16::MAX).zip(records) {
            self.steps
                .insert(JournalPosition::new(start.tick(), start.operation(), step), record);
        }
        self.operations.push(StagedOperation { slot, operation });
        self.staged_position = after;
        self.version = self.version.wrapping_add(1);

        match ctx.take_error() {
            Some(e) => Err(e.into()),
            None => Ok((result, slot)),
        }
    }

    /// Plan a commit of every staged operation that ends at or before
    /// `target`.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::CommitOutOfRange`] if `target` is outside
    /// `[checkpoint, staged]` and [`JournalError::PartialCommit`] if it
    /// falls inside an operation.
    pub fn create_commit_plan(&self, target: JournalPosition) -> Result<CommitPlan, JournalError> {
        if target < self.checkpoint_position || target > self.staged_position {
            return Err(JournalError::CommitOutOfRange {
                target,
                checkpoint: self.checkpoint_position,
                staged: self.staged_position,
            });
        }
        let num_operations = self
            .operations
            .iter()
            .take_while(|op| op.slot.position_after().is_ok_and(|after| after <= target))
            .count();
        if let Some(next) = self.operations.get(num_operations)
            && next.slot.start() < target
        {
            return Err(JournalError::PartialCommit {
                target,
                operation_start: next.slot.start(),
            });
        }
        let last = num_operations
            .checked_sub(1)
            .and_then(|index| self.operations.get(index));
        let end_of_operations = match last {
            Some(op) => op.slot.position_after()?,
            None => self.checkpoint_position,
        };
        Ok(CommitPlan {
            target,
            num_operations,
            end_of_operations,
            snapshot_match: num_operations > 0
                && self.checkpoint.is_some()
                && self.snapshots.contains_key(&end_of_operations),
            last_step: last.map(|op| op.slot.last_step_start()),
            version: self.version,
        })
    }

    fn check_plan(&self, plan: &CommitPlan) -> Result<(), JournalError> {
        if plan.version == self.version {
            Ok(())
        } else {
            Err(JournalError::StalePlan {
                expected: plan.version,
                actual: self.version,
            })
        }
    }

    /// Apply `plan` by bringing the checkpoint to the plan's end: swap in
    /// the matching snapshot if there is one, otherwise replay the absorbed
    /// operations onto the live checkpoint under `ctx`.
    ///
    /// Without checkpointing the absorbed operations are simply dropped.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::StalePlan`] for an outdated plan, or
    /// [`JournalError::Serialization`] if the checkpoint cannot be
    /// materialized or checksummed.
    pub fn commit_operation_range<S, C>(
        &mut self,
        serializer: &S,
        plan: CommitPlan,
        ctx: &mut C,
    ) -> Result<(), JournalError>
    where
        S: ModelSerializer<M>,
        C: OperationContext<M>,
    {
        self.check_plan(&plan)?;
        let version = self.serialization_version;
        if let Some(checkpoint) = self.checkpoint.as_mut() {
            let swapped = if plan.snapshot_match {
                self.snapshots.remove(&plan.end_of_operations)
            } else {
                None
            };
            if let Some(blob) = swapped {
                let checksum = if self.compute_checksums { blob.checksum() } else { 0 };
                checkpoint.replace(blob, checksum);
                debug!(position = %plan.end_of_operations, "Checkpoint replaced by snapshot");
            } else if plan.num_operations > 0 {
                let runtime = self.staged.runtime_data();
                let model = checkpoint.materialize(serializer, &self.context, version, &runtime)?;
                let absorbed = self.operations.get(..plan.num_operations).unwrap_or_default();
                for op in absorbed {
                    run_operation(model, op.slot.start(), &op.operation, ctx);
                }
                let mut scratch = Vec::new();
                checkpoint.refresh_checksum(serializer, version, self.compute_checksums, &mut scratch)?;
                debug!(operations = plan.num_operations, "Checkpoint advanced by replay");
            }
        }
        self.finish_commit(&plan);
        Ok(())
    }

    /// Apply `plan` by adopting `blob` as the new checkpoint state. `None`
    /// keeps the current checkpoint, which is only correct when the plan
    /// absorbs no operations or checkpointing is disabled.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::StalePlan`] for an outdated plan.
    pub fn commit_with_blob(&mut self, plan: CommitPlan, blob: Option<SnapshotBlob>) -> Result<(), JournalError> {
        self.check_plan(&plan)?;
        if let (Some(checkpoint), Some(blob)) = (self.checkpoint.as_mut(), blob) {
            let checksum = if self.compute_checksums { blob.checksum() } else { 0 };
            checkpoint.replace(blob, checksum);
        }
        self.finish_commit(&plan);
        Ok(())
    }

    fn finish_commit(&mut self, plan: &CommitPlan) {
        let keep = self.operations.len().saturating_sub(plan.num_operations);
        let absorbed = self.operations.len().saturating_sub(keep);
        self.operations.drain(..absorbed);
        self.steps = self.steps.split_off(&plan.end_of_operations);
        self.checkpoint_position = plan.target;
        self.remove_expired_snapshots();
        self.version = self.version.wrapping_add(1);
        info!(
            checkpoint = %self.checkpoint_position,
            operations = absorbed,
            remaining = self.operations.len(),
            "Committed"
        );
    }

    /// Take the snapshot at `position` out of the table.
    pub(crate) fn take_snapshot(&mut self, position: JournalPosition) -> Option<SnapshotBlob> {
        self.snapshots.remove(&position)
    }

    /// Discard every operation starting at or after `target` and rebuild the
    /// staged model at `target`.
    ///
    /// The rebuild starts from the latest snapshot in
    /// `(checkpoint, target]`, or from the checkpoint. The staged model's
    /// runtime data is carried over; side effects are suppressed during
    /// replay and enabled afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::CheckpointingDisabled`] without a
    /// checkpoint, [`JournalError::RollbackOutOfRange`] or
    /// [`JournalError::PartialRollback`] for an invalid target, and
    /// [`JournalError::Serialization`] if the rebuild fails.
    pub fn rollback<S>(&mut self, serializer: &S, target: JournalPosition) -> Result<(), JournalError>
    where
        S: ModelSerializer<M>,
    {
        let keep = self.validate_rollback(target)?;
        let discarded = self.operations.len().saturating_sub(keep);
        self.operations.truncate(keep);
        drop(self.steps.split_off(&target));
        self.snapshots.retain(|position, _| *position <= target);

        let runtime = self.staged.runtime_data();
        let (base, mut model) = self.base_model(serializer, target)?;
        model.attach_runtime_data(&runtime, SideEffects::Suppressed);
        replay(&self.operations, &mut model, base, target, &mut NullStepContext);
        model.attach_runtime_data(&runtime, SideEffects::Enabled);

        self.staged = model;
        self.staged_position = target;
        self.staged_lost = false;
        self.remove_expired_snapshots();
        self.version = self.version.wrapping_add(1);
        info!(%target, from = %base, discarded, "Rolled back");
        Ok(())
    }

    /// Check a rollback target and return how many operations survive it.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::CheckpointingDisabled`] without a
    /// checkpoint, and [`JournalError::RollbackOutOfRange`] or
    /// [`JournalError::PartialRollback`] for an invalid target.
    pub fn validate_rollback(&self, target: JournalPosition) -> Result<usize, JournalError> {
        if self.checkpoint.is_none() {
            return Err(JournalError::CheckpointingDisabled);
        }
        if target < self.checkpoint_position || target > self.staged_position {
            return Err(JournalError::RollbackOutOfRange {
                target,
                checkpoint: self.checkpoint_position,
                staged: self.staged_position,
            });
        }
        let keep = self
            .operations
            .iter()
            .take_while(|op| op.slot.start() < target)
            .count();
        let straddled = keep
            .checked_sub(1)
            .and_then(|index| self.operations.get(index))
            .filter(|op| op.slot.straddles(target));
        if let Some(op) = straddled {
            return Err(JournalError::PartialRollback {
                target,
                operation_start: op.slot.start(),
            });
        }
        Ok(keep)
    }

    /// Serialize the staged model as a snapshot at the staged position,
    /// replacing any snapshot already there.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::CheckpointingDisabled`] without a checkpoint
    /// or [`JournalError::Serialization`] if serialization fails.
    pub fn capture_stage_snapshot<S>(&mut self, serializer: &S) -> Result<(), JournalError>
    where
        S: ModelSerializer<M>,
    {
        if self.checkpoint.is_none() {
            return Err(JournalError::CheckpointingDisabled);
        }
        let blob = SnapshotBlob::capture(serializer, &self.staged, self.serialization_version)?;
        debug!(position = %self.staged_position, bytes = blob.len(), "Snapshot captured");
        self.snapshots.insert(self.staged_position, blob);
        while self.snapshots.len() > self.max_snapshots {
            if let Some((evicted, _)) = self.snapshots.pop_first() {
                debug!(position = %evicted, "Snapshot evicted");
            }
        }
        self.remove_expired_snapshots();
        Ok(())
    }

    /// Drop snapshots outside `(checkpoint, staged]`.
    pub fn remove_expired_snapshots(&mut self) {
        let (low, high) = (self.checkpoint_position, self.staged_position);
        let before = self.snapshots.len();
        self.snapshots.retain(|position, _| *position > low && *position <= high);
        let removed = before.saturating_sub(self.snapshots.len());
        if removed > 0 {
            debug!(removed, %low, %high, "Expired snapshots removed");
        }
    }

    /// Apply `modify` to the checkpoint model (if any) and then to the
    /// staged model, without recording anything.
    ///
    /// The checkpoint checksum is recomputed and every snapshot is dropped.
    /// Recorded step checksums are left as they are: after an edit they may
    /// no longer be reproducible.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Serialization`] if the checkpoint cannot be
    /// materialized or checksummed.
    pub fn modify_history<S, F>(&mut self, serializer: &S, mut modify: F) -> Result<(), JournalError>
    where
        S: ModelSerializer<M>,
        F: FnMut(&mut M, HistoryTarget),
    {
        let version = self.serialization_version;
        if let Some(checkpoint) = self.checkpoint.as_mut() {
            let runtime = self.staged.runtime_data();
            let model = checkpoint.materialize(serializer, &self.context, version, &runtime)?;
            modify(model, HistoryTarget::Checkpoint);
            let mut scratch = Vec::new();
            checkpoint.refresh_checksum(serializer, version, self.compute_checksums, &mut scratch)?;
        }
        modify(&mut self.staged, HistoryTarget::Staged);
        let dropped = self.snapshots.len();
        self.snapshots.clear();
        self.version = self.version.wrapping_add(1);
        info!(dropped_snapshots = dropped, "History modified");
        Ok(())
    }

    /// An owned copy of the model as it was at `position`, which must be an
    /// operation boundary in `[checkpoint, staged]`. The copy has the
    /// staged runtime data attached with side effects suppressed.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::PositionOutOfRange`],
    /// [`JournalError::InsideOperation`],
    /// [`JournalError::CheckpointingDisabled`] when replay would be needed
    /// without a checkpoint, or [`JournalError::Serialization`].
    pub fn create_historic_model_copy<S>(&self, serializer: &S, position: JournalPosition) -> Result<M, JournalError>
    where
        S: ModelSerializer<M>,
    {
        if position < self.checkpoint_position || position > self.staged_position {
            return Err(JournalError::PositionOutOfRange {
                position,
                checkpoint: self.checkpoint_position,
                staged: self.staged_position,
            });
        }
        if let Some(op) = self.operations.iter().find(|op| op.slot.straddles(position)) {
            return Err(JournalError::InsideOperation {
                position,
                operation_start: op.slot.start(),
            });
        }
        let mut model = if position == self.staged_position {
            copy_model(serializer, &self.staged, self.serialization_version)?
        } else {
            let (base, mut model) = self.base_model(serializer, position)?;
            replay(&self.operations, &mut model, base, position, &mut NullStepContext);
            model
        };
        model.attach_runtime_data(&self.staged.runtime_data(), SideEffects::Suppressed);
        Ok(model)
    }

    /// An owned copy of the checkpoint model with side effects suppressed.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::CheckpointingDisabled`] without a checkpoint
    /// or [`JournalError::Serialization`] if the copy fails.
    pub fn checkpoint_model_copy<S>(&self, serializer: &S) -> Result<M, JournalError>
    where
        S: ModelSerializer<M>,
    {
        let checkpoint = self.checkpoint.as_ref().ok_or(JournalError::CheckpointingDisabled)?;
        let mut model = checkpoint.copy(serializer, &self.context, self.serialization_version)?;
        model.attach_runtime_data(&self.staged.runtime_data(), SideEffects::Suppressed);
        Ok(model)
    }

    /// Recompute the checksum at the end of the step starting at
    /// `step_position` by replaying up to it.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::UnknownStep`] if no staged step starts there,
    /// [`JournalError::CheckpointingDisabled`] if replay is needed without a
    /// checkpoint, or [`JournalError::Serialization`].
    pub fn probe_checksum<S>(
        &self,
        serializer: &S,
        step_position: JournalPosition,
        scratch: &mut Vec<u8>,
    ) -> Result<u32, JournalError>
    where
        S: ModelSerializer<M>,
    {
        let unknown = JournalError::UnknownStep(step_position);
        if !self.steps.contains_key(&step_position) {
            return Err(unknown);
        }
        let index = self
            .operations
            .iter()
            .position(|op| {
                let start = op.slot.start();
                start.tick() == step_position.tick() && start.operation() == step_position.operation()
            })
            .ok_or(unknown)?;
        let op = self
            .operations
            .get(index)
            .ok_or(JournalError::UnknownStep(step_position))?;
        let is_final_step = index.saturating_add(1) == self.operations.len()
            && step_position == op.slot.last_step_start();
        if is_final_step {
            return Ok(checksum_model(serializer, &self.staged, self.serialization_version, scratch)?);
        }
        if self.checkpoint.is_none() {
            return Err(JournalError::CheckpointingDisabled);
        }

        let (base, mut model) = self.base_model(serializer, op.slot.start())?;
        model.attach_runtime_data(&self.staged.runtime_data(), SideEffects::Suppressed);
        let mut ctx = ProbeContext::new(
            Checksummer::new(serializer, scratch, self.serialization_version),
            step_position,
        );
        replay(&self.operations, &mut model, base, op.slot.position_after()?, &mut ctx);
        let checksum = ctx
            .into_result()
            .ok_or(JournalError::UnknownStep(step_position))??;
        Ok(checksum)
    }

    /// Start of the first step at which a leader commit replay diverged
    /// from the recorded checksums.
    pub const fn first_divergence(&self) -> Option<JournalPosition> {
        self.first_divergence
    }

    /// Divergences detected after the first one and not logged as errors.
    pub const fn suppressed_divergences(&self) -> u32 {
        self.suppressed_divergences
    }

    fn ensure_staged_intact(&self) -> Result<(), JournalError> {
        if self.staged_lost {
            Err(JournalError::StagedStateLost {
                staged: self.staged_position,
            })
        } else {
            Ok(())
        }
    }

    /// Report a leader replay divergence: logged as an error the first time
    /// for this timeline, at debug level afterwards.
    pub(crate) fn report_divergence(&mut self, mismatch: &StepMismatch) {
        if self.first_divergence.is_some() {
            self.suppressed_divergences = self.suppressed_divergences.saturating_add(1);
            debug!(
                position = %mismatch.position,
                step = %mismatch.name,
                "Further checkpoint divergence suppressed"
            );
            return;
        }
        self.first_divergence = Some(mismatch.position);
        error!(
            position = %mismatch.position,
            step = %mismatch.name,
            recorded = mismatch.recorded,
            actual = mismatch.actual,
            "Checkpoint replay diverged from recorded checksums"
        );
    }

    /// The newest state at or before `position` that replay can start
    /// from: a snapshot in `(checkpoint, position]` or the checkpoint.
    fn base_model<S>(&self, serializer: &S, position: JournalPosition) -> Result<(JournalPosition, M), JournalError>
    where
        S: ModelSerializer<M>,
    {
        let checkpoint = self.checkpoint.as_ref().ok_or(JournalError::CheckpointingDisabled)?;
        let version = self.serialization_version;
        let snapshot = self
            .snapshots
            .range((Bound::Excluded(self.checkpoint_position), Bound::Included(position)))
            .next_back();
        match snapshot {
            Some((at, blob)) => Ok((*at, serializer.deserialize(blob.as_bytes(), &self.context, version)?)),
            None => Ok((
                self.checkpoint_position,
                checkpoint.copy(serializer, &self.context, version)?,
            )),
        }
    }
}

/// Re-execute the operations starting in `[from, until)` on `model`.
pub(crate) fn replay<M, C>(
    operations: &[StagedOperation<M::Action>],
    model: &mut M,
    from: JournalPosition,
    until: JournalPosition,
    ctx: &mut C,
) where
    M: JournalModel,
    C: OperationContext<M>,
{
    for op in operations
        .iter()
        .filter(|op| op.slot.start() >= from && op.slot.start() < until)
    {
        run_operation(model, op.slot.start(), &op.operation, ctx);
    }
}
