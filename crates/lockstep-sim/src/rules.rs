//! Colony rules: the constants every copy of a colony must agree on.
//!
//! Rules are not part of the serialized colony state. They are the
//! data-resolution context handed back to a colony rebuilt from bytes.

use std::path::Path;

use serde::Deserialize;

use crate::error::SimError;

/// Tunable constants of the colony model.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ColonyRules {
    /// Location names; one location is created per entry.
    #[serde(default = "default_locations")]
    pub locations: Vec<String>,

    /// Initial units of each resource per location.
    #[serde(default = "default_initial_stock")]
    pub initial_stock: u32,

    /// Upper bound of a stockpile.
    #[serde(default = "default_stockpile_cap")]
    pub stockpile_cap: u32,

    /// Each tick every stockpile grows by a random amount in
    /// `0..=regen_max`.
    #[serde(default = "default_regen_max")]
    pub regen_max: u32,

    /// Hunger added per tick.
    #[serde(default = "default_hunger_rate")]
    pub hunger_rate: u32,

    /// Hunger at or above which an agent eats carried food.
    #[serde(default = "default_eat_threshold")]
    pub eat_threshold: u32,

    /// Hunger removed by one unit of food.
    #[serde(default = "default_food_value")]
    pub food_value: u32,

    /// Hunger at or above which an agent loses energy every tick.
    #[serde(default = "default_starvation_threshold")]
    pub starvation_threshold: u32,

    /// Energy lost per starving tick.
    #[serde(default = "default_starvation_damage")]
    pub starvation_damage: u32,

    /// Maximum energy.
    #[serde(default = "default_max_energy")]
    pub max_energy: u32,

    /// Energy spent by a gather action.
    #[serde(default = "default_gather_cost")]
    pub gather_cost: u32,

    /// A gather yields a random amount in `1..=gather_yield`.
    #[serde(default = "default_gather_yield")]
    pub gather_yield: u32,

    /// Energy restored by resting.
    #[serde(default = "default_rest_gain")]
    pub rest_gain: u32,

    /// Energy spent moving between locations.
    #[serde(default = "default_move_cost")]
    pub move_cost: u32,

    /// Wood consumed by a build.
    #[serde(default = "default_build_wood")]
    pub build_wood: u32,

    /// Stone consumed by a build.
    #[serde(default = "default_build_stone")]
    pub build_stone: u32,

    /// Energy consumed by a build.
    #[serde(default = "default_build_energy")]
    pub build_energy: u32,
}

impl Default for ColonyRules {
    fn default() -> Self {
        Self {
            locations: default_locations(),
            initial_stock: default_initial_stock(),
            stockpile_cap: default_stockpile_cap(),
            regen_max: default_regen_max(),
            hunger_rate: default_hunger_rate(),
            eat_threshold: default_eat_threshold(),
            food_value: default_food_value(),
            starvation_threshold: default_starvation_threshold(),
            starvation_damage: default_starvation_damage(),
            max_energy: default_max_energy(),
            gather_cost: default_gather_cost(),
            gather_yield: default_gather_yield(),
            rest_gain: default_rest_gain(),
            move_cost: default_move_cost(),
            build_wood: default_build_wood(),
            build_stone: default_build_stone(),
            build_energy: default_build_energy(),
        }
    }
}

impl ColonyRules {
    /// Load rules from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Io`] if the file cannot be read,
    /// [`SimError::Yaml`] if it is not valid YAML, or
    /// [`SimError::InvalidRules`] if the rules are inconsistent.
    pub fn from_file(path: &Path) -> Result<Self, SimError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate rules from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Yaml`] or [`SimError::InvalidRules`].
    pub fn parse(yaml: &str) -> Result<Self, SimError> {
        let rules: Self = serde_yml::from_str(yaml)?;
        rules.validate()?;
        Ok(rules)
    }

    /// Check internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidRules`] describing the first problem.
    pub fn validate(&self) -> Result<(), SimError> {
        if self.locations.is_empty() {
            return Err(SimError::InvalidRules {
                reason: "at least one location is required".to_owned(),
            });
        }
        if self.initial_stock > self.stockpile_cap {
            return Err(SimError::InvalidRules {
                reason: format!(
                    "initial_stock {} exceeds stockpile_cap {}",
                    self.initial_stock, self.stockpile_cap
                ),
            });
        }
        if self.max_energy == 0 {
            return Err(SimError::InvalidRules {
                reason: "max_energy must be positive".to_owned(),
            });
        }
        Ok(())
    }
}

fn default_locations() -> Vec<String> {
    vec![
        "Riverbank".to_owned(),
        "Quarry".to_owned(),
        "Pinewood".to_owned(),
    ]
}

const fn default_initial_stock() -> u32 {
    20
}

const fn default_stockpile_cap() -> u32 {
    60
}

const fn default_regen_max() -> u32 {
    3
}

const fn default_hunger_rate() -> u32 {
    4
}

const fn default_eat_threshold() -> u32 {
    40
}

const fn default_food_value() -> u32 {
    25
}

const fn default_starvation_threshold() -> u32 {
    80
}

const fn default_starvation_damage() -> u32 {
    10
}

const fn default_max_energy() -> u32 {
    100
}

const fn default_gather_cost() -> u32 {
    6
}

const fn default_gather_yield() -> u32 {
    4
}

const fn default_rest_gain() -> u32 {
    15
}

const fn default_move_cost() -> u32 {
    8
}

const fn default_build_wood() -> u32 {
    5
}

const fn default_build_stone() -> u32 {
    3
}

const fn default_build_energy() -> u32 {
    20
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_yields_defaults() {
        assert_eq!(ColonyRules::parse("{}").unwrap(), ColonyRules::default());
    }

    #[test]
    fn overrides_apply() {
        let rules = ColonyRules::parse("hunger_rate: 9\nlocations: [Ford]\n").unwrap();
        assert_eq!(rules.hunger_rate, 9);
        assert_eq!(rules.locations, vec!["Ford".to_owned()]);
        assert_eq!(rules.max_energy, 100);
    }

    #[test]
    fn inconsistent_rules_are_rejected() {
        let result = ColonyRules::parse("initial_stock: 99\nstockpile_cap: 10\n");
        assert!(matches!(result, Err(SimError::InvalidRules { .. })));
        let result = ColonyRules::parse("locations: []\n");
        assert!(matches!(result, Err(SimError::InvalidRules { .. })));
    }
}
