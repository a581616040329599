//! Per-operation footprint and per-step checksum records.
//!
//! A [`TimelineSlot`] describes where one executed operation sits on the
//! timeline and how many checksum steps it produced. Step records are keyed
//! by the *starting* position of each step and carry the checksum of the
//! state at the end of that step. The last step of every operation is the
//! synthetic end step recorded by the journal itself.

use serde::{Deserialize, Serialize};

use crate::position::{JournalPosition, PositionError};

/// Name given to the synthetic step closing a tick.
pub const TICK_END_STEP: &str = "end of tick";

/// Name given to the synthetic step closing an action.
pub const ACTION_END_STEP: &str = "end of action";

/// Kind of a staged operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// The tick's own execution (operation 0).
    Tick,
    /// An action applied after a tick (operation >= 1).
    Action,
}

impl OperationKind {
    /// Name of the synthetic end step for this kind of operation.
    pub const fn end_step_name(self) -> &'static str {
        match self {
            Self::Tick => TICK_END_STEP,
            Self::Action => ACTION_END_STEP,
        }
    }
}

/// One executed operation's footprint on the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineSlot {
    kind: OperationKind,
    start: JournalPosition,
    num_steps: u16,
}

impl TimelineSlot {
    /// Describe an operation starting at `start` that produced `num_steps`
    /// steps (including the end step, so always at least 1).
    pub const fn new(kind: OperationKind, start: JournalPosition, num_steps: u16) -> Self {
        Self {
            kind,
            start,
            num_steps,
        }
    }

    /// Tick or action.
    pub const fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Position of the operation's first step.
    pub const fn start(&self) -> JournalPosition {
        self.start
    }

    /// Number of steps, including the synthetic end step.
    pub const fn num_steps(&self) -> u16 {
        self.num_steps
    }

    /// Start position of the last (end) step.
    pub const fn last_step_start(&self) -> JournalPosition {
        JournalPosition::new(
            self.start.tick(),
            self.start.operation(),
            self.num_steps.saturating_sub(1),
        )
    }

    /// Position immediately after the operation.
    ///
    /// # Errors
    ///
    /// Returns [`PositionError::Overflow`] if the operation counter is
    /// exhausted.
    pub fn position_after(&self) -> Result<JournalPosition, PositionError> {
        JournalPosition::next_action(self.start)
    }

    /// Whether `position` lies strictly inside the operation, i.e. after its
    /// start and before the position following it.
    pub fn straddles(&self, position: JournalPosition) -> bool {
        self.start < position && self.position_after().is_ok_and(|after| position < after)
    }
}

/// A checksum-and-name record for one executed step.
pub trait StepRecord: Clone + core::fmt::Debug {
    /// Human-readable step name supplied by the model (or the end step name).
    fn name(&self) -> &str;

    /// The checksum this record stands for: computed on the leader,
    /// expected on the follower. Zero means "not available".
    fn checksum(&self) -> u32;
}

/// A step whose checksum was computed locally (leader side).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedStep {
    /// Step name.
    pub name: String,
    /// Checksum of the state at the end of the step.
    pub checksum: u32,
}

impl StepRecord for ComputedStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn checksum(&self) -> u32 {
        self.checksum
    }
}

/// A step whose checksum was supplied externally (follower side).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedStep {
    /// Step name.
    pub name: String,
    /// Checksum the leader claims for the end of this step; 0 when the
    /// leader did not supply one.
    pub expected: u32,
    /// Checksum observed locally at staging time. Only recorded for end
    /// steps when checkpointing is disabled, since no replay is possible
    /// afterwards.
    pub observed: Option<u32>,
}

impl StepRecord for ExpectedStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn checksum(&self) -> u32 {
        self.expected
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn slot_derives_last_step_and_following_position() {
        let slot = TimelineSlot::new(OperationKind::Action, JournalPosition::new(5, 2, 0), 4);
        assert_eq!(slot.last_step_start(), JournalPosition::new(5, 2, 3));
        assert_eq!(slot.position_after().unwrap(), JournalPosition::new(5, 3, 0));
    }

    #[test]
    fn tick_slot_ends_before_first_action() {
        let slot = TimelineSlot::new(OperationKind::Tick, JournalPosition::before_tick(9), 1);
        assert_eq!(slot.position_after().unwrap(), JournalPosition::after_tick(9));
    }

    #[test]
    fn straddles_excludes_boundaries() {
        let slot = TimelineSlot::new(OperationKind::Tick, JournalPosition::before_tick(1), 3);
        assert!(!slot.straddles(JournalPosition::before_tick(1)));
        assert!(slot.straddles(JournalPosition::new(1, 0, 2)));
        assert!(!slot.straddles(JournalPosition::after_tick(1)));
    }

    #[test]
    fn end_step_names_differ_by_kind() {
        assert_eq!(OperationKind::Tick.end_step_name(), TICK_END_STEP);
        assert_eq!(OperationKind::Action.end_step_name(), ACTION_END_STEP);
    }
}
