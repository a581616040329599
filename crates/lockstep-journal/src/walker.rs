//! Forward-only cursor over staged steps.
//!
//! A [`TimelineWalker`] does not borrow the timeline. It remembers the
//! timeline version it was created at, and every [`TimelineWalker::move_next`]
//! call re-checks it, so a walker that outlives a mutation fails with
//! [`JournalError::StaleWalker`] instead of walking reused state.

use crate::error::JournalError;
use crate::model::JournalModel;
use crate::position::JournalPosition;
use crate::slot::{OperationKind, StepRecord};
use crate::timeline::Timeline;

/// One step yielded by a walker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkStep<'t, A> {
    /// Start position of the step.
    pub position: JournalPosition,
    /// Whether this is the first step of its tick or action.
    pub is_first_step: bool,
    /// Total number of steps in the operation.
    pub num_steps: u16,
    /// Tick or action.
    pub kind: OperationKind,
    /// The action payload, for action steps.
    pub action: Option<&'t A>,
}

/// Cursor over the steps of a timeline's staged operations.
#[derive(Debug, Clone)]
pub struct TimelineWalker {
    operation_index: usize,
    step: u16,
    version: u64,
}

impl TimelineWalker {
    /// Position a walker on the first step at or after `start`.
    pub fn new<M, R>(timeline: &Timeline<M, R>, start: JournalPosition) -> Self
    where
        M: JournalModel,
        R: StepRecord,
    {
        let operations = timeline.operations();
        let operation_index = operations
            .iter()
            .take_while(|op| op.slot.position_after().is_ok_and(|after| after <= start))
            .count();
        let step = operations
            .get(operation_index)
            .filter(|op| op.slot.start() < start)
            .map_or(0, |op| {
                (0..op.slot.num_steps())
                    .find(|step| JournalPosition::new(op.slot.start().tick(), op.slot.start().operation(), *step) >= start)
                    .unwrap_or_else(|| op.slot.num_steps())
            });
        Self {
            operation_index,
            step,
            version: timeline.version(),
        }
    }

    /// Timeline version the walker is bound to.
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Advance to the next step, or `None` once the staged steps are
    /// exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::StaleWalker`] if `timeline` changed since the
    /// walker was created.
    pub fn move_next<'t, M, R>(
        &mut self,
        timeline: &'t Timeline<M, R>,
    ) -> Result<Option<WalkStep<'t, M::Action>>, JournalError>
    where
        M: JournalModel,
        R: StepRecord,
    {
        if timeline.version() != self.version {
            return Err(JournalError::StaleWalker {
                expected: self.version,
                actual: timeline.version(),
            });
        }
        while let Some(op) = timeline.operations().get(self.operation_index) {
            let slot = op.slot;
            if self.step < slot.num_steps() {
                let step = self.step;
                self.step = step.saturating_add(1);
                return Ok(Some(WalkStep {
                    position: JournalPosition::new(slot.start().tick(), slot.start().operation(), step),
                    is_first_step: step == 0,
                    num_steps: slot.num_steps(),
                    kind: slot.kind(),
                    action: op.operation.action(),
                }));
            }
            self.operation_index = self.operation_index.saturating_add(1);
            self.step = 0;
        }
        Ok(None)
    }
}
