use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// ============================================================================
// Injected Randomness
// ============================================================================
//
// Every probabilistic decision in the transition engine and the refund
// computer goes through this trait, so tests can script exact draw
// sequences and runs can be reproduced from a seed.
//
// ============================================================================

/// Source of the random draws the simulation consumes.
pub trait RandomSource: Send {
    /// Bernoulli draw: true with the given probability.
    fn chance(&mut self, probability: f64) -> bool;

    /// Uniform integer in the inclusive range `[lo, hi]`.
    fn int_between(&mut self, lo: i64, hi: i64) -> i64;

    /// Uniform index in `[0, len)`. `len` must be non-zero.
    fn index(&mut self, len: usize) -> usize;

    /// `k` distinct indices drawn from `[0, len)`, in draw order.
    /// `k` must not exceed `len`.
    fn sample(&mut self, len: usize, k: usize) -> Vec<usize>;
}

/// Production source backed by `StdRng`.
pub struct StdRandom {
    rng: StdRng,
}

impl StdRandom {
    /// OS-seeded source for normal runs.
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Explicitly seeded source for reproducible histories.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for StdRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomSource for StdRandom {
    fn chance(&mut self, probability: f64) -> bool {
        self.rng.random::<f64>() < probability
    }

    fn int_between(&mut self, lo: i64, hi: i64) -> i64 {
        self.rng.random_range(lo..=hi)
    }

    fn index(&mut self, len: usize) -> usize {
        self.rng.random_range(0..len)
    }

    fn sample(&mut self, len: usize, k: usize) -> Vec<usize> {
        rand::seq::index::sample(&mut self.rng, len, k).into_vec()
    }
}

/// Deterministic source for tests: queued draws are consumed in order, and
/// an exhausted queue falls back to the least-eventful answer (`chance` →
/// false, `int_between` → lo, `index` → 0, `sample` → first `k` indices).
#[derive(Default)]
pub struct ScriptedRandom {
    chances: std::collections::VecDeque<bool>,
    ints: std::collections::VecDeque<i64>,
    indices: std::collections::VecDeque<usize>,
}

impl ScriptedRandom {
    /// Source that always answers with minimums and never takes a
    /// probability branch.
    pub fn minimums() -> Self {
        Self::default()
    }

    pub fn push_chance(&mut self, outcome: bool) -> &mut Self {
        self.chances.push_back(outcome);
        self
    }

    pub fn push_int(&mut self, value: i64) -> &mut Self {
        self.ints.push_back(value);
        self
    }

    pub fn push_index(&mut self, value: usize) -> &mut Self {
        self.indices.push_back(value);
        self
    }
}

impl RandomSource for ScriptedRandom {
    fn chance(&mut self, _probability: f64) -> bool {
        self.chances.pop_front().unwrap_or(false)
    }

    fn int_between(&mut self, lo: i64, hi: i64) -> i64 {
        self.ints.pop_front().unwrap_or(lo).clamp(lo, hi)
    }

    fn index(&mut self, len: usize) -> usize {
        self.indices.pop_front().unwrap_or(0).min(len - 1)
    }

    fn sample(&mut self, _len: usize, k: usize) -> Vec<usize> {
        (0..k).collect()
    }
}
