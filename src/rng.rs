//! Randomness sources for the key-agreement simulation.
//!
//! Two domains are kept strictly apart:
//!
//! - **Simulation**: a seeded `ChaCha8Rng`.  Its output stream is fixed for a
//!   given seed on every platform, so runs are reproducible and regression
//!   tests can pin exact values.
//! - **Cryptographic**: a `StdRng` seeded from the operating system.  Used
//!   whenever a session models a real key.
//!
//! Symmetric IVs, RSA padding and key generation never go through this type;
//! they draw from the thread-local CSPRNG or the OS directly.

use rand::seq::index;
use rand::{Rng as _, RngCore, SeedableRng as _};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::bits::Basis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RngDomain {
    Simulation,
    Cryptographic,
}

impl std::fmt::Display for RngDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simulation => write!(f, "simulation"),
            Self::Cryptographic => write!(f, "cryptographic"),
        }
    }
}

enum Engine {
    Simulation(ChaCha8Rng),
    Cryptographic(rand::rngs::StdRng),
}

/// An owned, injectable bit/basis generator.
///
/// Each session owns its own instance, so concurrent sessions never share
/// randomness state.
pub struct RandomSource {
    engine: Engine,
    seed: Option<u64>,
}

impl std::fmt::Debug for RandomSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RandomSource")
            .field("domain", &self.domain())
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

impl RandomSource {
    /// Reproducible simulation source.
    pub fn seeded(seed: u64) -> Self {
        Self {
            engine: Engine::Simulation(ChaCha8Rng::seed_from_u64(seed)),
            seed: Some(seed),
        }
    }

    /// Fresh source seeded from operating-system entropy.
    pub fn cryptographic() -> Self {
        Self {
            engine: Engine::Cryptographic(rand::rngs::StdRng::from_os_rng()),
            seed: None,
        }
    }

    /// Seeded when `seed` is given, cryptographic otherwise.
    pub fn from_seed_option(seed: Option<u64>) -> Self {
        seed.map_or_else(Self::cryptographic, Self::seeded)
    }

    pub fn domain(&self) -> RngDomain {
        match self.engine {
            Engine::Simulation(_) => RngDomain::Simulation,
            Engine::Cryptographic(_) => RngDomain::Cryptographic,
        }
    }

    pub fn is_reproducible(&self) -> bool {
        self.domain() == RngDomain::Simulation
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// One uniform bit (0 or 1).
    pub fn bit(&mut self) -> u8 {
        u8::from(self.random::<bool>())
    }

    /// One uniform basis choice.
    pub fn basis(&mut self) -> Basis {
        if self.random::<bool>() {
            Basis::X
        } else {
            Basis::Z
        }
    }

    pub fn bits(&mut self, n: usize) -> Vec<u8> {
        (0..n).map(|_| self.bit()).collect()
    }

    pub fn bases(&mut self, n: usize) -> Vec<Basis> {
        (0..n).map(|_| self.basis()).collect()
    }

    /// `true` with probability `p`; `p` must already be validated to [0, 1].
    pub fn chance(&mut self, p: f64) -> bool {
        self.random_bool(p)
    }

    /// `k` distinct indices from `0..len`, in ascending order.
    pub fn sample_indices(&mut self, len: usize, k: usize) -> Vec<usize> {
        let mut picked = index::sample(self, len, k.min(len)).into_vec();
        picked.sort_unstable();
        picked
    }
}

impl RngCore for RandomSource {
    fn next_u32(&mut self) -> u32 {
        match &mut self.engine {
            Engine::Simulation(rng) => rng.next_u32(),
            Engine::Cryptographic(rng) => rng.next_u32(),
        }
    }

    fn next_u64(&mut self) -> u64 {
        match &mut self.engine {
            Engine::Simulation(rng) => rng.next_u64(),
            Engine::Cryptographic(rng) => rng.next_u64(),
        }
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        match &mut self.engine {
            Engine::Simulation(rng) => rng.fill_bytes(dst),
            Engine::Cryptographic(rng) => rng.fill_bytes(dst),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
