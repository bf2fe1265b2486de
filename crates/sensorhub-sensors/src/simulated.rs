//! Bounded random-walk value source shared by the drivers.
//!
//! Each physical quantity drifts by a small step per poll and is clamped to
//! the device's measurement range, which keeps consecutive samples
//! plausible instead of jumping uniformly across the range.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A quantity that drifts within `[min, max]`.
#[derive(Debug, Clone)]
pub struct Walk {
    value: f64,
    min: f64,
    max: f64,
    step: f64,
}

impl Walk {
    /// Start at `start`, moving at most `step` per sample.
    pub const fn new(start: f64, min: f64, max: f64, step: f64) -> Self {
        Self {
            value: start,
            min,
            max,
            step,
        }
    }

    /// Advance one sample and return the new value.
    pub fn next(&mut self, rng: &mut StdRng) -> f64 {
        let delta = rng.random_range(-self.step..=self.step);
        self.value = (self.value + delta).clamp(self.min, self.max);
        self.value
    }
}

/// Random source for a driver: seeded for reproducible runs, otherwise from
/// the OS.
pub fn rng(seed: Option<u64>) -> StdRng {
    seed.map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64)
}

/// Round to the device's reporting resolution.
pub fn quantize(value: f64, resolution: f64) -> f64 {
    (value / resolution).round() * resolution
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_stays_in_range() {
        let mut rng = rng(Some(1));
        let mut walk = Walk::new(0.5, 0.0, 1.0, 0.4);
        for _ in 0..1_000 {
            let v = walk.next(&mut rng);
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn seeded_sources_repeat() {
        let mut a = rng(Some(42));
        let mut b = rng(Some(42));
        let mut walk_a = Walk::new(20.0, 0.0, 40.0, 1.0);
        let mut walk_b = walk_a.clone();
        for _ in 0..10 {
            assert!((walk_a.next(&mut a) - walk_b.next(&mut b)).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn quantize_rounds_to_resolution() {
        assert!((quantize(21.46, 0.1) - 21.5).abs() < 1e-9);
        assert!((quantize(1013.254, 0.01) - 1013.25).abs() < 1e-9);
    }
}
