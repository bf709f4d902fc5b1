use std::fmt::Debug;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::Uniform;

/// Source of the initial weight values of freshly built layers.
///
/// `fan_in` and `fan_out` are the number of inputs and outputs contributing to each weight,
/// for a convolution those already include the receptive field size.
pub trait Initializer: Debug {
    fn get(&mut self, fan_in: usize, fan_out: usize) -> f32;

    fn fill(&mut self, fan_in: usize, fan_out: usize, len: usize) -> Vec<f32> {
        (0..len).map(|_| self.get(fan_in, fan_out)).collect()
    }
}

/// Glorot (Xavier) uniform initialization.
/// Weights are sampled from `[-limit, limit]` with `limit = sqrt(6 / (fan_in + fan_out))`.
#[derive(Debug, Clone)]
pub struct GlorotUniform {
    rng: SmallRng,
}

impl GlorotUniform {
    pub fn new(seed: u64) -> Self {
        GlorotUniform {
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl Initializer for GlorotUniform {
    fn get(&mut self, fan_in: usize, fan_out: usize) -> f32 {
        let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
        self.rng.sample(Uniform::new_inclusive(-limit, limit))
    }

    fn fill(&mut self, fan_in: usize, fan_out: usize, len: usize) -> Vec<f32> {
        let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
        let distr = Uniform::new_inclusive(-limit, limit);
        (&mut self.rng).sample_iter(distr).take(len).collect()
    }
}

/// Always returns the same value, useful to build deterministic graphs in tests.
#[derive(Debug, Copy, Clone)]
pub struct ConstantInit(pub f32);

impl Initializer for ConstantInit {
    fn get(&mut self, _: usize, _: usize) -> f32 {
        self.0
    }
}
