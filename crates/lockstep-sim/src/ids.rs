//! Typed identifiers for colony entities.
//!
//! Identifiers are small dense integers assigned at spawn time, so that
//! two independently spawned colonies with the same seed agree on them.

use serde::{Deserialize, Serialize};

/// Generate a newtype identifier over `u32`.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident, $prefix:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            /// Return the inner index.
            pub const fn into_inner(self) -> u32 {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }
    };
}

define_id! {
    /// Identifier of a colonist.
    AgentId, "agent"
}

define_id! {
    /// Identifier of a location.
    LocationId, "location"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_display_with_prefix() {
        assert_eq!(AgentId(3).to_string(), "agent-3");
        assert_eq!(LocationId::from(7).to_string(), "location-7");
    }

    #[test]
    fn ids_serialize_as_plain_numbers() {
        assert_eq!(serde_json::to_string(&AgentId(12)).ok(), Some("12".to_owned()));
    }
}
