//! Privacy amplification with a Toeplitz-matrix universal hash.
//!
//! An `m × n` Toeplitz matrix is fixed by its first row and column, i.e. by
//! `n + m - 1` random bits.  The family is 2-universal, so by the leftover
//! hash lemma the output is close to uniform as long as `m` stays below the
//! min-entropy the adversary has not learned (reconciled length minus leaked
//! bits minus a security margin).  The seed is public.

use rand::Rng;

use crate::error::{QscError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToeplitzHash {
    seed: Vec<u8>,
    input_bits: usize,
    output_bits: usize,
}

impl ToeplitzHash {
    pub fn seed_len(input_bits: usize, output_bits: usize) -> usize {
        input_bits + output_bits - 1
    }

    pub fn new(seed: Vec<u8>, input_bits: usize, output_bits: usize) -> Result<Self> {
        if input_bits == 0 || output_bits == 0 {
            return Err(QscError::InvalidConfiguration(
                "Toeplitz hash dimensions must be positive".into(),
            ));
        }
        if output_bits > input_bits {
            return Err(QscError::KeyTooShort {
                available: input_bits,
                requested: output_bits,
            });
        }
        let expected = Self::seed_len(input_bits, output_bits);
        if seed.len() != expected {
            return Err(QscError::Validation(format!(
                "Toeplitz seed has {} bits, expected {expected}",
                seed.len()
            )));
        }
        if seed.iter().any(|b| *b > 1) {
            return Err(QscError::Validation("Toeplitz seed must be bits".into()));
        }
        Ok(Self {
            seed,
            input_bits,
            output_bits,
        })
    }

    /// Draw a fresh public seed.
    pub fn random<R: Rng + ?Sized>(
        input_bits: usize,
        output_bits: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if input_bits == 0 || output_bits == 0 {
            return Err(QscError::InvalidConfiguration(
                "Toeplitz hash dimensions must be positive".into(),
            ));
        }
        let seed = (0..Self::seed_len(input_bits, output_bits))
            .map(|_| u8::from(rng.random::<bool>()))
            .collect();
        Self::new(seed, input_bits, output_bits)
    }

    pub fn input_bits(&self) -> usize {
        self.input_bits
    }

    pub fn output_bits(&self) -> usize {
        self.output_bits
    }

    /// `out[i] = XOR_j T[i][j] & x[j]` with `T[i][j] = seed[i - j + n - 1]`.
    pub fn hash(&self, input: &[u8]) -> Result<Vec<u8>> {
        if input.len() != self.input_bits {
            return Err(QscError::Validation(format!(
                "Toeplitz input has {} bits, expected {}",
                input.len(),
                self.input_bits
            )));
        }
        let n = self.input_bits;
        let out = (0..self.output_bits)
            .map(|i| {
                input.iter().enumerate().fold(0u8, |acc, (j, x)| {
                    acc ^ (self.seed[i + n - 1 - j] & x & 1)
                })
            })
            .collect();
        Ok(out)
    }
}

/// Largest admissible output length: `reconciled - leaked - margin`.
pub fn max_output_bits(reconciled_bits: usize, leaked_bits: usize, security_margin: usize) -> usize {
    reconciled_bits
        .saturating_sub(leaked_bits)
        .saturating_sub(security_margin)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
