//! A deterministic colony simulation driven by the lockstep journal.
//!
//! The colony implements [`lockstep_journal::JournalModel`]: ticks
//! regenerate stockpiles and advance hunger, actions let agents gather,
//! trade, rest, move and build. All randomness comes from a generator held
//! in the serialized state, which keeps replays bit-exact.
//!
//! # Modules
//!
//! - [`colony`] -- The [`Colony`] model and its journal contract.
//! - [`action`] -- [`ColonyAction`] and rejection reason codes.
//! - [`events`] -- Side-effect events and the runtime [`EventSink`].
//! - [`ledger`] -- [`ResourceLedger`], per-resource flow totals.
//! - [`rules`] -- [`ColonyRules`], the shared resolution context.
//! - [`spawner`] -- Seeded colony creation.
//! - [`ids`], [`resource`], [`rng`] -- Small value types.
//! - [`error`] -- [`SimError`].
//!
//! [`Colony`]: colony::Colony
//! [`ColonyAction`]: action::ColonyAction
//! [`EventSink`]: events::EventSink
//! [`ColonyRules`]: rules::ColonyRules
//! [`SimError`]: error::SimError
//! [`ResourceLedger`]: ledger::ResourceLedger

pub mod action;
pub mod colony;
pub mod error;
pub mod events;
pub mod ids;
pub mod ledger;
pub mod resource;
pub mod rng;
pub mod rules;
pub mod spawner;

pub use action::ColonyAction;
pub use colony::{Agent, Colony, Location};
pub use error::SimError;
pub use events::{ColonyEvent, EventSink};
pub use ids::{AgentId, LocationId};
pub use ledger::{Flow, FlowTotals, ResourceLedger};
pub use resource::Resource;
pub use rules::ColonyRules;
pub use spawner::spawn_colony;
