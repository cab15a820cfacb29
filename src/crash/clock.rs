//! Multiplier growth
//!
//! The clock is a pure function of the tick count: every tick applies
//! `next = current + base_increment + current * growth_rate` starting from
//! 1.00x. Wall time only decides when the next tick is due.

use crate::config::ClockConfig;
use crate::money::{Multiplier, Ratio};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiplierClock {
    base_increment: Multiplier,
    growth_rate: Ratio,
}

impl MultiplierClock {
    pub fn new(config: &ClockConfig) -> Self {
        Self {
            base_increment: config.base_increment,
            growth_rate: config.growth_rate,
        }
    }

    /// Multiplier at tick zero
    pub const fn start(&self) -> Multiplier {
        Multiplier::ONE
    }

    /// Value after one more tick
    pub fn advance(&self, current: Multiplier) -> Multiplier {
        current
            .saturating_add(self.base_increment)
            .saturating_add(current.scale(self.growth_rate))
    }

    /// Value after `ticks` ticks from the start, for replay and audit
    pub fn value_at(&self, ticks: u64) -> Multiplier {
        (0..ticks).fold(self.start(), |value, _| self.advance(value))
    }

    /// Ticks needed to reach `target`, bounded by `limit`
    pub fn ticks_to_reach(&self, target: Multiplier, limit: u64) -> Option<u64> {
        let mut value = self.start();
        for tick in 0..=limit {
            if value >= target {
                return Some(tick);
            }
            value = self.advance(value);
        }
        None
    }
}

impl Default for MultiplierClock {
    fn default() -> Self {
        Self::new(&ClockConfig::default())
    }
}
