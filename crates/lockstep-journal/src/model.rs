//! The contract a simulation model fulfils to be journaled.
//!
//! The journal never looks inside a model. It only asks it to execute ticks
//! and actions, to report its data-resolution context (needed to rebuild a
//! model from bytes) and to hand over and re-accept its runtime companion
//! data, which holds the side-effect hooks that are never serialized.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::slot::OperationKind;

/// Result code reported by an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionResult {
    /// The action applied.
    Success,
    /// The action was refused; the string is a machine-readable reason code.
    Rejected(String),
}

impl ActionResult {
    /// Whether the action applied.
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for ActionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Rejected(reason) => write!(f, "rejected: {reason}"),
        }
    }
}

/// Whether a model's runtime hooks may fire side effects.
///
/// The checkpoint model and replay copies never run side effects; only the
/// staged model does, and only outside of replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffects {
    /// Hooks are live.
    Enabled,
    /// Hooks are attached but muted.
    Suppressed,
}

/// Callback surface a model uses mid-operation to request a checksum step.
///
/// Each call to [`StepContext::step`] closes one step of the running
/// operation. Depending on the journal role the context computes a real
/// checksum, echoes an externally supplied one, compares against a recorded
/// one, or does nothing at all.
pub trait StepContext<M> {
    /// Close the current step. `model` is the state at the end of the step.
    fn step(&mut self, model: &M, name: &str);
}

/// A model that can be driven by the journal.
pub trait JournalModel: Sized {
    /// Action payload type.
    type Action: Clone + fmt::Debug;

    /// Non-serialized companion data carrying side-effect hooks.
    type RuntimeData;

    /// Data-resolution context needed to rebuild a model from bytes.
    type Context: Clone + fmt::Debug;

    /// Advance the model by one tick.
    fn tick(&mut self, ctx: &mut dyn StepContext<Self>);

    /// Apply an action.
    fn execute_action(
        &mut self,
        action: &Self::Action,
        ctx: &mut dyn StepContext<Self>,
    ) -> ActionResult;

    /// Check whether an action would apply, without mutating anything.
    fn dry_run_action(&self, action: &Self::Action) -> ActionResult;

    /// The data-resolution context of this model.
    fn resolution_context(&self) -> Self::Context;

    /// Re-attach a data-resolution context after reconstruction from bytes.
    fn attach_context(&mut self, context: &Self::Context);

    /// Extract the runtime companion data.
    fn runtime_data(&self) -> Self::RuntimeData;

    /// Re-wire runtime hooks onto this model.
    fn attach_runtime_data(&mut self, data: &Self::RuntimeData, side_effects: SideEffects);
}

/// An operation on the timeline: a tick or an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation<A> {
    /// The tick's own execution.
    Tick,
    /// An action payload.
    Action(A),
}

impl<A> Operation<A> {
    /// Tick or action.
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::Tick => OperationKind::Tick,
            Self::Action(_) => OperationKind::Action,
        }
    }

    /// The action payload, if any.
    pub const fn action(&self) -> Option<&A> {
        match self {
            Self::Tick => None,
            Self::Action(action) => Some(action),
        }
    }
}

/// Step context that ignores every step. Used for pure replay.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStepContext;

impl<M> StepContext<M> for NullStepContext {
    fn step(&mut self, _model: &M, _name: &str) {}
}
