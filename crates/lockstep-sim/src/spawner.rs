//! Seeded colony spawning.
//!
//! Spawning draws from a seeded [`StdRng`], so every peer that spawns with
//! the same rules, seed and agent count starts from the same colony.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::colony::{Agent, Colony, Location, Stock};
use crate::error::SimError;
use crate::ids::{AgentId, LocationId};
use crate::resource::Resource;
use crate::rules::ColonyRules;

/// Spawn a colony of `agent_count` agents spread over the rule's locations.
///
/// # Errors
///
/// Returns [`SimError::InvalidRules`] if the rules fail validation or
/// list more locations than identifiers allow.
pub fn spawn_colony(rules: ColonyRules, seed: u64, agent_count: u32) -> Result<Colony, SimError> {
    rules.validate()?;
    let mut rng = StdRng::seed_from_u64(seed);

    let mut locations = Vec::with_capacity(rules.locations.len());
    for (index, name) in rules.locations.iter().enumerate() {
        let Ok(raw) = u32::try_from(index) else {
            return Err(SimError::InvalidRules {
                reason: format!("too many locations: {}", rules.locations.len()),
            });
        };
        let stockpile: Stock = Resource::ALL
            .into_iter()
            .map(|resource| (resource, rules.initial_stock))
            .collect();
        locations.push(Location {
            id: LocationId(raw),
            name: name.clone(),
            stockpile,
            structures: 0,
        });
    }

    let Ok(location_count) = u32::try_from(locations.len()) else {
        return Err(SimError::InvalidRules {
            reason: "location count does not fit an identifier".to_owned(),
        });
    };

    let floor = rules.max_energy.checked_div(2).unwrap_or(0);
    let peckish = rules.eat_threshold.checked_div(2).unwrap_or(0);
    let agents: Vec<Agent> = (0..agent_count)
        .map(|raw| Agent {
            id: AgentId(raw),
            location: LocationId(raw.checked_rem(location_count).unwrap_or(0)),
            energy: rng.random_range(floor..=rules.max_energy),
            hunger: rng.random_range(0..=peckish),
            alive: true,
            inventory: Stock::new(),
            structures_built: 0,
        })
        .collect();

    let model_seed: u64 = rng.random();
    info!(
        seed,
        agents = agent_count,
        locations = location_count,
        "Colony spawned"
    );
    Ok(Colony::from_parts(Arc::new(rules), model_seed, agents, locations))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_spawns_identical_colonies() {
        let a = spawn_colony(ColonyRules::default(), 11, 6).unwrap();
        let b = spawn_colony(ColonyRules::default(), 11, 6).unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn agents_are_spread_round_robin() {
        let colony = spawn_colony(ColonyRules::default(), 3, 5).unwrap();
        let homes: Vec<u32> = colony
            .agents()
            .values()
            .map(|agent| agent.location.into_inner())
            .collect();
        assert_eq!(homes, [0, 1, 2, 0, 1]);
        assert!(colony.agents().values().all(|agent| agent.energy >= 50));
    }

    #[test]
    fn invalid_rules_are_refused() {
        let rules = ColonyRules {
            locations: Vec::new(),
            ..ColonyRules::default()
        };
        assert!(matches!(
            spawn_colony(rules, 0, 1),
            Err(SimError::InvalidRules { .. })
        ));
    }
}
