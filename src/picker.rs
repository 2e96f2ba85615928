//! Uniform word selection
//!
//! Each execution unit owns its own [`WordPicker`]. Seeds are derived from
//! the run seed and the unit id so no two units draw from the same stream.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::dataset::WordList;

pub struct WordPicker {
    rng: StdRng,
    unit: u64,
}

impl WordPicker {
    /// Picker for unit `unit` of a run seeded with `run_seed`
    pub fn for_unit(run_seed: u64, unit: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(mix_seed(run_seed, unit)),
            unit,
        }
    }

    /// Picker seeded from OS entropy
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            unit: 0,
        }
    }

    /// Execution unit this picker belongs to
    pub fn unit(&self) -> u64 {
        self.unit
    }

    /// Uniform index in `[0, len)`. `len` must be non-zero.
    pub fn index(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len)
    }

    pub fn pick<'a>(&mut self, words: &'a WordList) -> (usize, &'a str) {
        let index = self.index(words.len());
        (index, &words[index])
    }
}

/// SplitMix64 finalizer over seed and unit id
fn mix_seed(run_seed: u64, unit: u64) -> u64 {
    let mut z = run_seed ^ unit.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
