//! Random action proposals for the leader.
//!
//! The planner only reads the leader's staged colony. Its choices are
//! shipped to the follower as data, so the planner itself never needs to
//! be deterministic across peers.

use lockstep_sim::{Agent, AgentId, Colony, ColonyAction, Resource};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Proposes plausible actions for living agents.
#[derive(Debug)]
pub struct ActionPlanner {
    rng: StdRng,
}

impl ActionPlanner {
    /// Create a planner seeded with `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Propose an action for a random living agent, or `None` when every
    /// agent is exhausted.
    pub fn propose(&mut self, colony: &Colony) -> Option<ColonyAction> {
        let living: Vec<&Agent> = colony.living_agents().collect();
        if living.is_empty() {
            return None;
        }
        let actor = *living.get(self.rng.random_range(0..living.len()))?;
        let rules = colony.rules();

        if actor.energy < rules.gather_cost.max(rules.move_cost) {
            return Some(ColonyAction::Rest { agent: actor.id });
        }
        if actor.energy >= rules.build_energy
            && actor.held(Resource::Wood) >= rules.build_wood
            && actor.held(Resource::Stone) >= rules.build_stone
        {
            return Some(ColonyAction::Build { agent: actor.id });
        }

        match self.rng.random_range(0..10_u8) {
            0 => self.wander(colony, actor),
            1 => self.share(&living, actor),
            _ => {
                let resource = *Resource::ALL.get(self.rng.random_range(0..Resource::ALL.len()))?;
                Some(ColonyAction::Gather {
                    agent: actor.id,
                    resource,
                })
            }
        }
    }

    fn wander(&mut self, colony: &Colony, actor: &Agent) -> Option<ColonyAction> {
        let agent = actor.id;
        let elsewhere: Vec<_> = colony
            .locations()
            .keys()
            .copied()
            .filter(|id| *id != actor.location)
            .collect();
        if elsewhere.is_empty() {
            return Some(ColonyAction::Rest { agent });
        }
        let to = *elsewhere.get(self.rng.random_range(0..elsewhere.len()))?;
        Some(ColonyAction::Move { agent, to })
    }

    fn share(&mut self, living: &[&Agent], actor: &Agent) -> Option<ColonyAction> {
        let neighbours: Vec<AgentId> = living
            .iter()
            .filter(|other| other.id != actor.id && other.location == actor.location)
            .map(|other| other.id)
            .collect();
        let carried = Resource::ALL
            .into_iter()
            .find(|resource| actor.held(*resource) > 0);
        let rest = Some(ColonyAction::Rest { agent: actor.id });
        let Some(resource) = carried else {
            return rest;
        };
        if neighbours.is_empty() {
            return rest;
        }
        let to = *neighbours.get(self.rng.random_range(0..neighbours.len()))?;
        let quantity = self.rng.random_range(1..=actor.held(resource));
        Some(ColonyAction::Transfer {
            from: actor.id,
            to,
            resource,
            quantity,
        })
    }
}
