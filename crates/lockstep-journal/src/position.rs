//! Positional addressing into the journal timeline.
//!
//! A [`JournalPosition`] names a point on the append-only timeline as a
//! `(tick, operation, step)` triple:
//!
//! - **tick** groups one simulation frame.
//! - **operation** 0 is the tick's own execution; operations `>= 1` address
//!   the N-th action applied after that tick.
//! - **step** addresses a checksum step inside an operation.
//!
//! The triple is packed into a single `u64` key (`tick << 32 | operation << 16
//! | step`) so ordering and equality are plain integer comparisons and always
//! agree with lexicographic order on the components.
//!
//! The boundary constructors ([`JournalPosition::before_tick`],
//! [`JournalPosition::after_action`], ...) produce *abstract* positions that
//! need not coincide with any executed step. Commit and rollback targets are
//! expressed with them.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Bit offset of the tick component inside the packed key.
const TICK_SHIFT: u32 = 32;

/// Bit offset of the operation component inside the packed key.
const OPERATION_SHIFT: u32 = 16;

/// Mask selecting a 16-bit component.
const COMPONENT_MASK: u64 = 0xFFFF;

/// Errors produced when constructing or deriving positions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PositionError {
    /// A component was negative.
    #[error("negative {component} component: {value}")]
    Negative {
        /// Name of the offending component.
        component: &'static str,
        /// The rejected value.
        value: i64,
    },

    /// A component does not fit its packed width.
    #[error("{component} component {value} exceeds maximum {max}")]
    Overflow {
        /// Name of the offending component.
        component: &'static str,
        /// The rejected value.
        value: u64,
        /// Largest accepted value.
        max: u64,
    },

    /// Action positions start at operation 1.
    #[error("operation 0 is reserved for the tick itself")]
    ReservedOperation,
}

/// An immutable, totally ordered address into the timeline.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct JournalPosition(u64);

impl JournalPosition {
    /// The very first position: before tick 0.
    pub const EPOCH: Self = Self(0);

    /// Pack components into a position.
    pub const fn new(tick: u32, operation: u16, step: u16) -> Self {
        // Widening casts only; u64::from is not const.
        #[allow(clippy::cast_lossless)]
        let key = ((tick as u64) << TICK_SHIFT)
            | ((operation as u64) << OPERATION_SHIFT)
            | (step as u64);
        Self(key)
    }

    /// Build a position from signed components, rejecting negative or
    /// overflowing values.
    ///
    /// # Errors
    ///
    /// Returns [`PositionError::Negative`] or [`PositionError::Overflow`].
    pub fn from_components(tick: i64, operation: i64, step: i64) -> Result<Self, PositionError> {
        let tick = checked_u32("tick", tick)?;
        let operation = checked_u16("operation", operation)?;
        let step = checked_u16("step", step)?;
        Ok(Self::new(tick, operation, step))
    }

    /// Rebuild a position from its packed key.
    pub const fn from_key(key: u64) -> Self {
        Self(key)
    }

    /// The packed comparable key.
    pub const fn key(self) -> u64 {
        self.0
    }

    /// The tick component.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn tick(self) -> u32 {
        (self.0 >> TICK_SHIFT) as u32
    }

    /// The operation component.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn operation(self) -> u16 {
        ((self.0 >> OPERATION_SHIFT) & COMPONENT_MASK) as u16
    }

    /// The step component.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn step(self) -> u16 {
        (self.0 & COMPONENT_MASK) as u16
    }

    /// Position just before `tick` executes.
    pub const fn before_tick(tick: u32) -> Self {
        Self::new(tick, 0, 0)
    }

    /// Position just after `tick` executed, before its first action.
    pub const fn after_tick(tick: u32) -> Self {
        Self::new(tick, 1, 0)
    }

    /// Position just before the tick following `position`'s tick.
    ///
    /// # Errors
    ///
    /// Returns [`PositionError::Overflow`] if the tick counter is exhausted.
    pub fn next_tick(position: Self) -> Result<Self, PositionError> {
        let tick = position
            .tick()
            .checked_add(1)
            .ok_or_else(|| overflow("tick", u64::from(position.tick()), u64::from(u32::MAX)))?;
        Ok(Self::before_tick(tick))
    }

    /// Position just before the action at `operation` (1-based) of `tick`.
    ///
    /// # Errors
    ///
    /// Returns [`PositionError::ReservedOperation`] for operation 0.
    pub const fn before_action(tick: u32, operation: u16) -> Result<Self, PositionError> {
        if operation == 0 {
            return Err(PositionError::ReservedOperation);
        }
        Ok(Self::new(tick, operation, 0))
    }

    /// Position just after the action at `operation` (1-based) of `tick`.
    ///
    /// # Errors
    ///
    /// Returns [`PositionError::ReservedOperation`] for operation 0 or
    /// [`PositionError::Overflow`] if no further operation fits.
    pub fn after_action(tick: u32, operation: u16) -> Result<Self, PositionError> {
        let before = Self::before_action(tick, operation)?;
        Self::next_action(before)
    }

    /// Position of the operation following `position`'s operation.
    ///
    /// # Errors
    ///
    /// Returns [`PositionError::Overflow`] if the operation counter is
    /// exhausted.
    pub fn next_action(position: Self) -> Result<Self, PositionError> {
        let operation = position.operation().checked_add(1).ok_or_else(|| {
            overflow(
                "operation",
                u64::from(position.operation()),
                u64::from(u16::MAX),
            )
        })?;
        Ok(Self::new(position.tick(), operation, 0))
    }

    /// Position of the step following `position` within the same operation.
    ///
    /// # Errors
    ///
    /// Returns [`PositionError::Overflow`] if the step counter is exhausted.
    pub fn after_step(position: Self) -> Result<Self, PositionError> {
        let step = position
            .step()
            .checked_add(1)
            .ok_or_else(|| overflow("step", u64::from(position.step()), u64::from(u16::MAX)))?;
        Ok(Self::new(position.tick(), position.operation(), step))
    }

    /// The least step position strictly greater than `position`.
    ///
    /// # Errors
    ///
    /// Returns [`PositionError::Overflow`] if the step counter is exhausted.
    pub fn next_after(position: Self) -> Result<Self, PositionError> {
        Self::after_step(position)
    }

    /// Whether this position sits on a tick boundary (`(t, 0, 0)`).
    pub const fn is_tick_boundary(self) -> bool {
        self.operation() == 0 && self.step() == 0
    }
}

impl fmt::Display for JournalPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}.{}", self.tick(), self.operation(), self.step())
    }
}

fn overflow(component: &'static str, current: u64, max: u64) -> PositionError {
    PositionError::Overflow {
        component,
        value: current.saturating_add(1),
        max,
    }
}

fn checked_u32(component: &'static str, value: i64) -> Result<u32, PositionError> {
    if value < 0 {
        return Err(PositionError::Negative { component, value });
    }
    u32::try_from(value).map_err(|_err| PositionError::Overflow {
        component,
        value: value.unsigned_abs(),
        max: u64::from(u32::MAX),
    })
}

fn checked_u16(component: &'static str, value: i64) -> Result<u16, PositionError> {
    if value < 0 {
        return Err(PositionError::Negative { component, value });
    }
    u16::try_from(value).map_err(|_err| PositionError::Overflow {
        component,
        value: value.unsigned_abs(),
        max: u64::from(u16::MAX),
    })
}
