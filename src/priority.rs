//! Priority levels and the aging rule used by queue arbitration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lowest priority a message can carry.
pub const P_MIN: u8 = 0;
/// Highest priority a message can carry (and the aging ceiling).
pub const P_MAX: u8 = 9;

/// Message priority in `[P_MIN, P_MAX]`; higher values are served first.
///
/// The base priority stored in a message never changes. Aging produces an *effective*
/// priority on demand via [`Priority::effective`], so the queue never has to rewrite slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Priority(u8);

impl Priority {
    pub const MIN: Priority = Priority(P_MIN);
    pub const MAX: Priority = Priority(P_MAX);

    /// Build a priority, rejecting values above [`P_MAX`].
    pub const fn new(value: u8) -> Option<Priority> {
        if value > P_MAX {
            None
        } else {
            Some(Priority(value))
        }
    }

    /// Build a priority, clamping values above [`P_MAX`] to the ceiling.
    pub const fn saturating(value: u8) -> Priority {
        if value > P_MAX {
            Priority(P_MAX)
        } else {
            Priority(value)
        }
    }

    /// Raw numeric level.
    pub const fn value(self) -> u8 {
        self.0
    }

    /// Effective priority after waiting `waited` in the queue.
    ///
    /// Every full `aging_interval` of waiting adds one level, capped at [`P_MAX`]:
    /// `min(P_MAX, base + floor(waited / aging_interval))`. A zero interval disables aging
    /// and returns the base priority unchanged.
    ///
    /// # Arguments
    /// * `waited` - Time the message has spent in the queue so far
    /// * `aging_interval` - Wait time that earns one priority level (`Duration::ZERO` = off)
    ///
    /// # Returns
    /// The priority the arbitration scan should compare with
    pub fn effective(self, waited: Duration, aging_interval: Duration) -> Priority {
        if aging_interval.is_zero() {
            return self;
        }
        let boost = waited.as_nanos() / aging_interval.as_nanos();
        let boosted = u128::from(self.0).saturating_add(boost);
        Priority(boosted.min(u128::from(P_MAX)) as u8)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u8> for Priority {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Priority::new(value).ok_or(value)
    }
}
