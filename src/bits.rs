//! Bit and basis representations shared by the key-agreement stages.
//!
//! Bits are stored one per `u8` (always 0 or 1) so that partial key material
//! can be wiped with `zeroize` when a session aborts.

use serde::{Deserialize, Serialize};

/// Measurement basis: rectilinear (`Z`) or diagonal (`X`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Basis {
    Z,
    X,
}

impl std::fmt::Display for Basis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Z => write!(f, "Z"),
            Self::X => write!(f, "X"),
        }
    }
}

/// XOR of all bits in `bits`.
pub fn parity(bits: &[u8]) -> u8 {
    bits.iter().fold(0, |acc, b| acc ^ (b & 1))
}

/// XOR of `bits[i]` over the given positions.
pub fn parity_at(bits: &[u8], positions: &[usize]) -> u8 {
    positions.iter().fold(0, |acc, &i| acc ^ (bits[i] & 1))
}

/// Number of positions where the two sequences differ.
pub fn hamming_distance(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).filter(|(x, y)| x != y).count()
}

/// Pack bits MSB-first. A trailing partial byte is padded with zero bits.
pub fn pack_bits(bits: &[u8]) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u8, |byte, (i, b)| byte | ((b & 1) << (7 - i)))
        })
        .collect()
}
