//! Crash point generation
//!
//! `raw = (1 - house_edge) / u` with `u` uniform in (0, 1], clamped to the
//! configured bounds, occasionally replaced by a jackpot, then rounded to
//! 0.01x. All arithmetic is integer: `u = k / 2^32` with `k` in `[1, 2^32]`,
//! so `u` is never zero.

use crate::config::GameConfig;
use crate::money::Multiplier;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

const UNIFORM_BITS: u32 = 32;
const PPM: u64 = 1_000_000;

/// Supplies one crash point per round
pub trait CrashPointSource: Send + Sync {
    fn next_crash_point(&self) -> Multiplier;
}

/// House-edge adjusted random crash points
pub struct CrashPointGenerator {
    config: GameConfig,
    rng: Mutex<StdRng>,
}

impl CrashPointGenerator {
    pub fn new(config: GameConfig) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => {
                tracing::warn!("Crash point generator seeded with {}; outcomes are predictable", seed);
                StdRng::seed_from_u64(seed)
            }
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            rng: Mutex::new(rng),
        }
    }

    pub fn generate(&self) -> Multiplier {
        let mut rng = self.rng.lock();
        self.generate_with(&mut *rng)
    }

    /// Draw a crash point from an explicit random source
    pub fn generate_with<R: Rng>(&self, rng: &mut R) -> Multiplier {
        let cfg = &self.config;

        let k: u64 = rng.gen_range(1..=(1u64 << UNIFORM_BITS));
        let numerator = (cfg.house_edge.complement().ppm() as u128) << UNIFORM_BITS;
        let raw = u64::try_from(numerator / k as u128).unwrap_or(u64::MAX);

        let mut crash_point = Multiplier::from_micros(raw).clamp_to(cfg.min_multiplier, cfg.max_multiplier);

        // The jackpot roll is drawn every round so the stream of draws does not
        // depend on the base value.
        let jackpot_roll = rng.gen_range(0..PPM);
        if jackpot_roll < cfg.jackpot_probability.ppm() && crash_point < cfg.jackpot_threshold {
            let low = cfg.jackpot_min.micros();
            let high = cfg.jackpot_max.micros().max(low);
            crash_point = Multiplier::from_micros(rng.gen_range(low..=high));
        }

        crash_point
            .round_cents()
            .clamp_to(cfg.min_multiplier, cfg.max_multiplier)
    }
}

impl CrashPointSource for CrashPointGenerator {
    fn next_crash_point(&self) -> Multiplier {
        self.generate()
    }
}

/// Predetermined crash points. The last one repeats once the rest are used.
pub struct FixedCrashPoints {
    points: Mutex<VecDeque<Multiplier>>,
}

impl FixedCrashPoints {
    pub fn new(points: impl IntoIterator<Item = Multiplier>) -> Self {
        Self {
            points: Mutex::new(points.into_iter().collect()),
        }
    }

    pub fn always(point: Multiplier) -> Self {
        Self::new([point])
    }

    pub fn push(&self, point: Multiplier) {
        self.points.lock().push_back(point);
    }
}

impl CrashPointSource for FixedCrashPoints {
    fn next_crash_point(&self) -> Multiplier {
        let mut points = self.points.lock();
        if points.len() > 1 {
            points.pop_front().unwrap_or(Multiplier::ONE)
        } else {
            points.front().copied().unwrap_or(Multiplier::ONE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Ratio;

    fn no_jackpot() -> GameConfig {
        GameConfig {
            jackpot_probability: Ratio::ZERO,
            rng_seed: Some(7),
            ..GameConfig::default()
        }
    }

    #[test]
    fn test_crash_points_within_bounds() {
        let config = GameConfig {
            rng_seed: Some(11),
            ..GameConfig::default()
        };
        let generator = CrashPointGenerator::new(config.clone());
        for _ in 0..20_000 {
            let point = generator.generate();
            assert!(point >= config.min_multiplier, "{} below minimum", point);
            assert!(point <= config.max_multiplier, "{} above maximum", point);
            assert_eq!(point, point.truncate_cents(), "{} not rounded to 2 places", point);
        }
    }

    #[test]
    fn test_house_edge_distribution() {
        const TRIALS: usize = 100_000;
        let generator = CrashPointGenerator::new(no_jackpot());
        let points: Vec<Multiplier> = (0..TRIALS).map(|_| generator.generate()).collect();

        // P(crash >= x) ~ (1 - edge) / x
        for cents in [150u64, 200, 300, 500, 1_000] {
            let x = Multiplier::from_cents(cents);
            let hits = points.iter().filter(|p| **p >= x).count();
            let observed = hits as f64 / TRIALS as f64;
            let expected = 0.97 / (cents as f64 / 100.0);
            assert!(
                (observed - expected).abs() < 0.01,
                "P(crash >= {}) = {:.4}, expected ~{:.4}",
                x,
                observed,
                expected
            );
        }
    }

    #[test]
    fn test_jackpot_only_below_threshold() {
        let config = GameConfig {
            jackpot_probability: Ratio::ONE,
            rng_seed: Some(3),
            ..GameConfig::default()
        };
        let generator = CrashPointGenerator::new(config.clone());
        for _ in 0..2_000 {
            let point = generator.generate();
            assert!(point >= config.jackpot_min && point <= config.jackpot_max, "{} outside jackpot range", point);
        }
    }

    #[test]
    fn test_seeded_generators_agree() {
        let a = CrashPointGenerator::new(no_jackpot());
        let b = CrashPointGenerator::new(no_jackpot());
        let first: Vec<_> = (0..100).map(|_| a.generate()).collect();
        let second: Vec<_> = (0..100).map(|_| b.generate()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_fixed_points_repeat_last() {
        let fixed = FixedCrashPoints::new([Multiplier::from_cents(250), Multiplier::from_cents(120)]);
        assert_eq!(fixed.next_crash_point(), Multiplier::from_cents(250));
        assert_eq!(fixed.next_crash_point(), Multiplier::from_cents(120));
        assert_eq!(fixed.next_crash_point(), Multiplier::from_cents(120));

        fixed.push(Multiplier::from_cents(300));
        assert_eq!(fixed.next_crash_point(), Multiplier::from_cents(120));
        assert_eq!(fixed.next_crash_point(), Multiplier::from_cents(300));
    }
}
