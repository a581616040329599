//! Resources held in stockpiles and inventories.

use serde::{Deserialize, Serialize};

/// A kind of resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    /// Eaten to reduce hunger.
    Food,
    /// Building material.
    Wood,
    /// Building material.
    Stone,
}

impl Resource {
    /// Every resource, in stockpile order.
    pub const ALL: [Self; 3] = [Self::Food, Self::Wood, Self::Stone];
}

impl core::fmt::Display for Resource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Food => "food",
            Self::Wood => "wood",
            Self::Stone => "stone",
        };
        f.write_str(name)
    }
}
