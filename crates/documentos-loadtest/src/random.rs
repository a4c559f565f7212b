//! Random sources for request sampling and think-time

use std::ops::Range;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Source of uniform randomness owned by one virtual user
pub trait RandomSource: Send {
    /// Uniform index in `0..len`; `len` must be non-zero
    fn index(&mut self, len: usize) -> usize;

    /// Uniform value in `[0, 1)`
    fn unit(&mut self) -> f64;

    /// Uniform duration in `[range.start, range.end)`
    fn duration_in(&mut self, range: &Range<Duration>) -> Duration {
        let span = range.end.saturating_sub(range.start).as_nanos() as u64;
        if span == 0 {
            return range.start;
        }
        let offset = ((span as f64 * self.unit()) as u64).min(span - 1);
        range.start + Duration::from_nanos(offset)
    }
}

/// Reproducible source for tests and `--seed` runs
pub struct SeededRandom(ChaCha8Rng);

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self(ChaCha8Rng::seed_from_u64(seed))
    }
}

impl RandomSource for SeededRandom {
    fn index(&mut self, len: usize) -> usize {
        self.0.gen_range(0..len)
    }

    fn unit(&mut self) -> f64 {
        self.0.gen::<f64>()
    }
}

/// Entropy-seeded source
pub struct EntropyRandom(StdRng);

impl EntropyRandom {
    pub fn new() -> Self {
        Self(StdRng::from_entropy())
    }
}

impl Default for EntropyRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomSource for EntropyRandom {
    fn index(&mut self, len: usize) -> usize {
        self.0.gen_range(0..len)
    }

    fn unit(&mut self) -> f64 {
        self.0.gen::<f64>()
    }
}

/// Hands each virtual user its own source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RandomFactory {
    Entropy,
    /// Virtual user `n` is seeded with `seed + n`
    Seeded(u64),
}

impl RandomFactory {
    pub fn from_seed(seed: Option<u64>) -> Self {
        seed.map_or(Self::Entropy, Self::Seeded)
    }

    pub fn for_vu(&self, vu_id: u64) -> Box<dyn RandomSource> {
        match self {
            Self::Entropy => Box::new(EntropyRandom::new()),
            Self::Seeded(seed) => Box::new(SeededRandom::new(seed.wrapping_add(vu_id))),
        }
    }
}
