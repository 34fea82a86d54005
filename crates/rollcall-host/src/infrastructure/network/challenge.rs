//! Challenge value generators.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::application::handshake::ChallengeSource;

/// Smallest challenge value issued.
pub const CHALLENGE_MIN: u32 = 1;
/// One past the largest challenge value issued.
pub const CHALLENGE_MAX_EXCLUSIVE: u32 = 100_000;

/// Draws challenges from the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomChallenges;

impl ChallengeSource for RandomChallenges {
    fn next_challenge(&self) -> u32 {
        rand::thread_rng().gen_range(CHALLENGE_MIN..CHALLENGE_MAX_EXCLUSIVE)
    }
}

/// Reproducible challenge sequence from a fixed seed.
#[derive(Debug)]
pub struct SeededChallenges {
    rng: Mutex<StdRng>,
}

impl SeededChallenges {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl ChallengeSource for SeededChallenges {
    fn next_challenge(&self) -> u32 {
        let mut rng = self.rng.lock().unwrap_or_else(|p| p.into_inner());
        rng.gen_range(CHALLENGE_MIN..CHALLENGE_MAX_EXCLUSIVE)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
