//! Journal listeners.
//!
//! Listeners observe a journal synchronously, in registration order. They
//! only ever receive shared references, so a callback can inspect the
//! staged model but cannot call back into the journal that invoked it.

use crate::model::{ActionResult, JournalModel};
use crate::position::JournalPosition;
use crate::slot::TimelineSlot;

/// Before/after hooks around every journal mutation. All methods default
/// to doing nothing.
#[allow(unused_variables)]
pub trait JournalListener<M: JournalModel> {
    /// Setup is about to establish state at `position`.
    fn before_setup(&mut self, position: JournalPosition) {}

    /// Setup finished.
    fn after_setup(&mut self, position: JournalPosition, model: &M) {}

    /// A tick starting at `start` is about to run.
    fn before_tick(&mut self, start: JournalPosition, model: &M) {}

    /// A tick was staged.
    fn after_tick(&mut self, slot: &TimelineSlot, model: &M) {}

    /// An action starting at `start` is about to run.
    fn before_action(&mut self, start: JournalPosition, action: &M::Action, model: &M) {}

    /// An action was staged.
    fn after_action(&mut self, slot: &TimelineSlot, action: &M::Action, result: &ActionResult, model: &M) {}

    /// A commit to `target` is about to run.
    fn before_commit(&mut self, target: JournalPosition) {}

    /// The checkpoint moved to `checkpoint`.
    fn after_commit(&mut self, checkpoint: JournalPosition) {}

    /// A rollback to `target` is about to run.
    fn before_rollback(&mut self, target: JournalPosition) {}

    /// The staged model was rebuilt at `position`.
    fn after_rollback(&mut self, position: JournalPosition, model: &M) {}

    /// History is about to be edited directly.
    fn before_history_modification(&mut self) {}

    /// History was edited.
    fn after_history_modification(&mut self, model: &M) {}

    /// The staged model is about to be mutated outside of any operation.
    fn begin_unsynchronized_actions(&mut self, model: &M) {}

    /// Unsynchronized mutation finished.
    fn end_unsynchronized_actions(&mut self, model: &M) {}
}

/// Registered listeners, notified in registration order.
pub struct ListenerSet<M: JournalModel> {
    listeners: Vec<Box<dyn JournalListener<M>>>,
}

impl<M: JournalModel> Default for ListenerSet<M> {
    fn default() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }
}

impl<M: JournalModel> core::fmt::Debug for ListenerSet<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("len", &self.listeners.len())
            .finish()
    }
}

impl<M: JournalModel> ListenerSet<M> {
    /// Register a listener.
    pub fn add(&mut self, listener: Box<dyn JournalListener<M>>) {
        self.listeners.push(listener);
    }

    /// Invoke `notify` on every listener in order.
    pub fn notify(&mut self, mut notify: impl FnMut(&mut dyn JournalListener<M>)) {
        for listener in &mut self.listeners {
            notify(listener.as_mut());
        }
    }
}
