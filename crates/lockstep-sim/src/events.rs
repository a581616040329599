//! Side-effect events emitted by the staged colony.
//!
//! The event sink is the colony's runtime companion data: it is never
//! serialized, and only the staged model outside of replay writes to it.
//! Replay and checkpoint copies carry the same sink with side effects
//! suppressed, so no event is ever emitted twice.

use std::cell::RefCell;
use std::rc::Rc;

use crate::ids::{AgentId, LocationId};
use crate::resource::Resource;

/// Something observable that happened in the colony.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColonyEvent {
    /// An agent took resources from a stockpile.
    Gathered {
        /// The gatherer.
        agent: AgentId,
        /// What was gathered.
        resource: Resource,
        /// How much.
        quantity: u32,
    },
    /// Resources changed hands.
    Transferred {
        /// Giver.
        from: AgentId,
        /// Receiver.
        to: AgentId,
        /// What was given.
        resource: Resource,
        /// How much.
        quantity: u32,
    },
    /// An agent rested.
    Rested {
        /// The agent.
        agent: AgentId,
        /// Energy after resting.
        energy: u32,
    },
    /// An agent moved.
    Moved {
        /// The agent.
        agent: AgentId,
        /// Destination.
        to: LocationId,
    },
    /// A structure was completed.
    Built {
        /// The builder.
        agent: AgentId,
        /// Where.
        location: LocationId,
    },
    /// An agent ate carried food.
    Ate {
        /// The agent.
        agent: AgentId,
    },
    /// An agent ran out of energy and stopped acting.
    Exhausted {
        /// The agent.
        agent: AgentId,
    },
}

/// Shared, append-only event log.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    events: Rc<RefCell<Vec<ColonyEvent>>>,
}

impl EventSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event.
    pub fn push(&self, event: ColonyEvent) {
        self.events.borrow_mut().push(event);
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }

    /// Remove and return every recorded event.
    pub fn drain(&self) -> Vec<ColonyEvent> {
        std::mem::take(&mut *self.events.borrow_mut())
    }
}
