//! Follower commit outcomes.
//!
//! A follower commit always advances the checkpoint. Divergence from the
//! leader is reported through [`CommitResult`], never as an error, and it
//! is up to the caller to decide on remediation (typically a resync).

use core::fmt;

use crate::position::JournalPosition;
use crate::slot::OperationKind;

/// An operation that may have introduced a divergence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuspectOperation<A> {
    /// Start position of the operation.
    pub start: JournalPosition,
    /// Tick or action.
    pub kind: OperationKind,
    /// The action payload, for actions.
    pub action: Option<A>,
}

/// Diagnostic for the first step at which local state disagreed with the
/// leader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitConflict<A> {
    /// Position immediately after the diverging step.
    pub position: JournalPosition,
    /// Start position of the diverging step.
    pub step_position: JournalPosition,
    /// Name of the diverging step.
    pub step_name: String,
    /// Checksum the leader supplied.
    pub expected_checksum: u32,
    /// Checksum observed locally.
    pub actual_checksum: u32,
    /// Serialized state before the step, when the step was localized.
    pub state_before: Option<Vec<u8>>,
    /// Serialized state after the step, when the step was localized.
    pub state_after: Option<Vec<u8>>,
    /// The action being executed, if the step belongs to one.
    pub action: Option<A>,
    /// Start of the suspect range.
    pub suspect_start: JournalPosition,
    /// Operations from `suspect_start` through the diverging one.
    pub suspect_operations: Vec<SuspectOperation<A>>,
    /// Whether replay pinpointed the step. Without checkpointing the
    /// whole committed batch is reported instead.
    pub localized: bool,
}

/// The checkpoint no longer reproduces the leader's checksums, yet replay
/// from it reproduces none of the divergence: the checkpoint itself changed
/// outside of operation execution. The commit-target state was adopted as
/// the new checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointDrift {
    /// The commit target.
    pub position: JournalPosition,
    /// Checksum the leader supplied.
    pub expected_checksum: u32,
    /// Checksum observed at the commit target.
    pub actual_checksum: u32,
}

/// Outcome of a follower commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitResult<A> {
    /// Checksums agreed.
    Ok,
    /// A diverging step was found.
    Conflict(Box<CommitConflict<A>>),
    /// The checkpoint drifted; see [`CheckpointDrift`].
    CheckpointDrift(CheckpointDrift),
}

impl<A> CommitResult<A> {
    /// Whether the commit reported any divergence.
    pub const fn has_conflict(&self) -> bool {
        !matches!(self, Self::Ok)
    }

    /// The conflict diagnostic, if any.
    pub fn conflict(&self) -> Option<&CommitConflict<A>> {
        match self {
            Self::Conflict(conflict) => Some(conflict),
            Self::Ok | Self::CheckpointDrift(_) => None,
        }
    }
}

impl<A> fmt::Display for CommitResult<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Conflict(conflict) => write!(
                f,
                "conflict at {} in step '{}' (expected {:#010x}, actual {:#010x})",
                conflict.step_position, conflict.step_name, conflict.expected_checksum, conflict.actual_checksum
            ),
            Self::CheckpointDrift(drift) => write!(
                f,
                "checkpoint drift at {} (expected {:#010x}, actual {:#010x})",
                drift.position, drift.expected_checksum, drift.actual_checksum
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drift_counts_as_conflict() {
        let drift: CommitResult<()> = CommitResult::CheckpointDrift(CheckpointDrift {
            position: JournalPosition::after_tick(3),
            expected_checksum: 1,
            actual_checksum: 2,
        });
        assert!(drift.has_conflict());
        assert!(drift.conflict().is_none());
        assert!(!CommitResult::<()>::Ok.has_conflict());
    }

    #[test]
    fn display_names_the_step() {
        let result = CommitResult::Conflict(Box::new(CommitConflict::<u8> {
            position: JournalPosition::new(2, 1, 3),
            step_position: JournalPosition::new(2, 1, 2),
            step_name: "lay foundation".to_owned(),
            expected_checksum: 0xAB,
            actual_checksum: 0xCD,
            state_before: None,
            state_after: None,
            action: Some(4),
            suspect_start: JournalPosition::after_tick(2),
            suspect_operations: Vec::new(),
            localized: true,
        }));
        let text = result.to_string();
        assert!(text.contains("lay foundation"));
        assert!(text.contains("0x000000ab"));
    }
}
