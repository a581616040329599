//! Colony actions and their rejection reasons.

use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, LocationId};
use crate::resource::Resource;

/// An action applied to the colony after a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ColonyAction {
    /// Take resources from the agent's location stockpile.
    Gather {
        /// The gatherer.
        agent: AgentId,
        /// What to gather.
        resource: Resource,
    },
    /// Give carried resources to another agent at the same location.
    Transfer {
        /// Giver.
        from: AgentId,
        /// Receiver.
        to: AgentId,
        /// What to give.
        resource: Resource,
        /// How much.
        quantity: u32,
    },
    /// Recover energy.
    Rest {
        /// The agent.
        agent: AgentId,
    },
    /// Walk to another location.
    Move {
        /// The agent.
        agent: AgentId,
        /// Destination.
        to: LocationId,
    },
    /// Build a structure at the agent's location. Runs as four steps:
    /// clearing the site, laying the foundation, raising the frame and
    /// roofing.
    Build {
        /// The builder.
        agent: AgentId,
    },
}

impl ColonyAction {
    /// The agent performing the action.
    pub const fn actor(&self) -> AgentId {
        match self {
            Self::Gather { agent, .. }
            | Self::Rest { agent }
            | Self::Move { agent, .. }
            | Self::Build { agent } => *agent,
            Self::Transfer { from, .. } => *from,
        }
    }
}

/// Machine-readable rejection reasons.
pub mod reason {
    /// The agent does not exist.
    pub const UNKNOWN_AGENT: &str = "unknown_agent";
    /// The location does not exist.
    pub const UNKNOWN_LOCATION: &str = "unknown_location";
    /// The agent is exhausted and cannot act.
    pub const AGENT_EXHAUSTED: &str = "agent_exhausted";
    /// Not enough energy.
    pub const INSUFFICIENT_ENERGY: &str = "insufficient_energy";
    /// The stockpile is empty.
    pub const INSUFFICIENT_STOCK: &str = "insufficient_stock";
    /// The agent does not carry enough.
    pub const INSUFFICIENT_INVENTORY: &str = "insufficient_inventory";
    /// Giver and receiver are at different locations.
    pub const NOT_CO_LOCATED: &str = "not_co_located";
    /// Giver and receiver are the same agent.
    pub const SELF_TRANSFER: &str = "self_transfer";
    /// A transfer of nothing.
    pub const ZERO_QUANTITY: &str = "zero_quantity";
    /// The agent already is at the destination.
    pub const ALREADY_THERE: &str = "already_there";
}
