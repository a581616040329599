//! Resource flow ledger.
//!
//! Every unit that enters or leaves the colony is counted here, so the
//! conservation law can be checked at any time:
//!
//! ```text
//! held(R) == opening(R) + regenerated(R) - eaten(R) - built(R)
//! ```
//!
//! Gathering and transfers move units around without changing the total;
//! they are counted for reporting only.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::resource::Resource;

/// Kind of resource movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// World to stockpile.
    Regenerated,
    /// Stockpile to agent.
    Gathered,
    /// Agent to agent.
    Transferred,
    /// Agent to nowhere, by eating.
    Eaten,
    /// Agent to structure.
    Built,
}

/// Running totals for one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowTotals {
    /// Units held when the ledger was opened.
    pub opening: u64,
    /// Units added by regeneration.
    pub regenerated: u64,
    /// Units gathered from stockpiles.
    pub gathered: u64,
    /// Units handed between agents.
    pub transferred: u64,
    /// Units eaten.
    pub eaten: u64,
    /// Units consumed by construction.
    pub built: u64,
}

impl FlowTotals {
    /// What the colony should hold according to the recorded flows.
    pub const fn expected_balance(&self) -> u64 {
        self.opening
            .saturating_add(self.regenerated)
            .saturating_sub(self.eaten)
            .saturating_sub(self.built)
    }
}

/// Per-resource flow totals plus a transfer counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLedger {
    flows: BTreeMap<Resource, FlowTotals>,
    transfers: u64,
}

impl ResourceLedger {
    /// Open a ledger with the given starting balances.
    pub fn open(balances: impl IntoIterator<Item = (Resource, u64)>) -> Self {
        let flows = balances
            .into_iter()
            .map(|(resource, opening)| {
                (
                    resource,
                    FlowTotals {
                        opening,
                        ..FlowTotals::default()
                    },
                )
            })
            .collect();
        Self { flows, transfers: 0 }
    }

    /// Count `quantity` units of `resource` moving as `flow`.
    pub fn record(&mut self, resource: Resource, flow: Flow, quantity: u32) {
        let totals = self.flows.entry(resource).or_default();
        let quantity = u64::from(quantity);
        let counter = match flow {
            Flow::Regenerated => &mut totals.regenerated,
            Flow::Gathered => &mut totals.gathered,
            Flow::Transferred => &mut totals.transferred,
            Flow::Eaten => &mut totals.eaten,
            Flow::Built => &mut totals.built,
        };
        *counter = counter.saturating_add(quantity);
        if flow == Flow::Transferred {
            self.transfers = self.transfers.saturating_add(1);
        }
    }

    /// Totals for `resource`.
    pub fn flows(&self, resource: Resource) -> FlowTotals {
        self.flows.get(&resource).cloned().unwrap_or_default()
    }

    /// Number of completed transfers.
    pub const fn transfers(&self) -> u64 {
        self.transfers
    }
}
