//! Staging phase guard.

use crate::error::JournalError;

/// Whether a role is currently executing an operation.
///
/// The phase is entered before an operation runs and left after it
/// returns. A model panic unwinds past `leave`, so the role stays in
/// `Executing` and refuses further staging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StagingPhase {
    /// Ready to stage.
    #[default]
    Idle,
    /// An operation is running.
    Executing,
}

impl StagingPhase {
    /// Move to `Executing`.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::ReentrantStaging`] if already executing.
    pub fn enter(&mut self) -> Result<(), JournalError> {
        match self {
            Self::Idle => {
                *self = Self::Executing;
                Ok(())
            }
            Self::Executing => Err(JournalError::ReentrantStaging),
        }
    }

    /// Return to `Idle`.
    pub const fn leave(&mut self) {
        *self = Self::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_enter_is_rejected_until_leave() {
        let mut phase = StagingPhase::default();
        assert!(phase.enter().is_ok());
        assert!(matches!(phase.enter(), Err(JournalError::ReentrantStaging)));
        phase.leave();
        assert!(phase.enter().is_ok());
    }
}
