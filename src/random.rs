//! Random Value Generators
//!
//! Weights are initialized by drawing one value per element from a
//! [`RandomGenerator`]. Two generators are provided:
//!
//! - **FixedRangeRandom**: uniform in `[-radius, radius]`
//! - **GaussianDistributedRandom**: normal with mean `0` and a given variance
//!
//! Both are backed by a seedable `StdRng` so that initialization can be
//! reproduced exactly.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// Source of values used by `Tensor::randomize`
pub trait RandomGenerator {
    fn next_value(&mut self) -> f64;
}

/// Uniform values in `[-radius, radius]`
pub struct FixedRangeRandom {
    radius: f64,
    rng: StdRng,
}

impl FixedRangeRandom {
    pub fn new(radius: f64, seed: u64) -> Self {
        Self {
            radius,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Radius scaled to the fan-in and fan-out of a weight matrix (Glorot)
    pub fn glorot(fan_in: usize, fan_out: usize, seed: u64) -> Self {
        let radius = (6.0 / (fan_in + fan_out) as f64).sqrt();
        Self::new(radius, seed)
    }
}

impl RandomGenerator for FixedRangeRandom {
    fn next_value(&mut self) -> f64 {
        if self.radius == 0.0 {
            return 0.0;
        }
        self.rng.gen_range(-self.radius..=self.radius)
    }
}

/// Normally distributed values with mean `0`
pub struct GaussianDistributedRandom {
    std_dev: f64,
    rng: StdRng,
}

impl GaussianDistributedRandom {
    pub fn new(variance: f64, seed: u64) -> Self {
        Self {
            std_dev: variance.sqrt(),
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl RandomGenerator for GaussianDistributedRandom {
    fn next_value(&mut self) -> f64 {
        // A non-finite or negative std_dev can only come from a negative variance
        match Normal::new(0.0, self.std_dev) {
            Ok(normal) => normal.sample(&mut self.rng),
            Err(_) => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_range_stays_in_range() {
        let mut gen = FixedRangeRandom::new(0.08, 42);
        for _ in 0..1000 {
            let v = gen.next_value();
            assert!((-0.08..=0.08).contains(&v));
        }
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let mut a = GaussianDistributedRandom::new(0.5, 7);
        let mut b = GaussianDistributedRandom::new(0.5, 7);
        for _ in 0..10 {
            assert_eq!(a.next_value(), b.next_value());
        }
    }

    #[test]
    fn test_gaussian_sample_variance() {
        let mut gen = GaussianDistributedRandom::new(0.25, 1);
        let n = 20_000;
        let samples: Vec<f64> = (0..n).map(|_| gen.next_value()).collect();
        let mean = samples.iter().sum::<f64>() / n as f64;
        let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.02);
        assert!((var - 0.25).abs() < 0.02);
    }
}
