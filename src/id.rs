use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

/// Random bytes per identifier. Ten hex characters give an identifier space
/// of 2^40 per kind.
pub const ID_BYTES: usize = 5;

/// Attempts at finding a free identifier before a create gives up.
pub const MAX_ID_ATTEMPTS: usize = 8;

/// Process-wide identifier source, seeded once from the operating system.
pub struct IdGenerator {
    rng: Mutex<StdRng>,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Deterministic generator for tests.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn next_id(&self) -> String {
        let mut buf = [0u8; ID_BYTES];
        // a poisoned lock still holds a usable rng
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        rng.fill_bytes(&mut buf);
        hex::encode(buf)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
