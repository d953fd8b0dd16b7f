//! Cascade-style information reconciliation.
//!
//! The receiver's sifted key is corrected against the sender's using only
//! parity disclosures:
//!
//! 1. Pass 0 splits the key into contiguous blocks of `block_size` bits.
//!    Pass `p` doubles the block size and partitions a shared random
//!    permutation of the positions.
//! 2. Every block parity the sender announces leaks one bit.  A block whose
//!    parities disagree holds an odd number of errors; binary search over
//!    half-block parities (one leaked bit per step) finds and flips one.
//! 3. A flip changes the parity of the block containing that bit in every
//!    other pass, so those blocks are re-examined (the cascade).
//! 4. After the last pass, `verify_rounds` random-subset parities confirm the
//!    keys agree.  Each round misses residual errors with probability 1/2.

use rand::seq::SliceRandom as _;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::bits::parity_at;
use crate::error::{QscError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeParams {
    pub block_size: usize,
    pub passes: usize,
    pub verify_rounds: usize,
    pub max_bisections: usize,
}

impl Default for CascadeParams {
    fn default() -> Self {
        Self {
            block_size: 16,
            passes: 4,
            verify_rounds: 16,
            max_bisections: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    /// Bits flipped in the receiver's key.
    pub corrected: usize,
    /// Parity bits disclosed on the public channel.
    pub leaked_bits: usize,
    pub passes: usize,
    pub bisections: usize,
}

struct Pass {
    order: Vec<usize>,
    /// Inverse of `order`: where each key position sits in this pass.
    position: Vec<usize>,
    block_size: usize,
}

impl Pass {
    fn new(order: Vec<usize>, block_size: usize) -> Self {
        let mut position = vec![0; order.len()];
        for (slot, &bit) in order.iter().enumerate() {
            position[bit] = slot;
        }
        Self {
            order,
            position,
            block_size,
        }
    }

    fn block_count(&self) -> usize {
        self.order.len().div_ceil(self.block_size)
    }

    fn block(&self, b: usize) -> &[usize] {
        let start = b * self.block_size;
        let end = (start + self.block_size).min(self.order.len());
        &self.order[start..end]
    }

    fn block_of(&self, bit: usize) -> usize {
        self.position[bit] / self.block_size
    }
}

/// Correct `noisy` in place so that it matches `reference`.
///
/// `rng` supplies the public permutations and verification subsets; both
/// parties are assumed to share its output.
pub fn reconcile<R: Rng + ?Sized>(
    reference: &[u8],
    noisy: &mut [u8],
    params: &CascadeParams,
    rng: &mut R,
) -> Result<ReconcileOutcome> {
    validate_params(params)?;
    let n = reference.len();
    if n == 0 {
        return Err(QscError::ReconciliationFailure("key is empty".into()));
    }
    if noisy.len() != n {
        return Err(QscError::ReconciliationFailure(format!(
            "key length mismatch: {} vs {}",
            n,
            noisy.len()
        )));
    }

    let mut out = ReconcileOutcome::default();
    let mut passes: Vec<Pass> = Vec::with_capacity(params.passes);

    for p in 0..params.passes {
        let scale = u32::try_from(p)
            .ok()
            .and_then(|shift| 1usize.checked_shl(shift))
            .unwrap_or(usize::MAX);
        let block_size = params.block_size.saturating_mul(scale).min(n);
        let order: Vec<usize> = if p == 0 {
            (0..n).collect()
        } else {
            let mut order: Vec<usize> = (0..n).collect();
            order.shuffle(rng);
            order
        };
        passes.push(Pass::new(order, block_size));
        let current = passes.len() - 1;

        let mut pending: Vec<(usize, usize)> = Vec::new();
        for b in 0..passes[current].block_count() {
            out.leaked_bits += 1;
            let block = passes[current].block(b);
            if parity_at(reference, block) != parity_at(noisy, block) {
                pending.push((current, b));
            }
        }

        while let Some((q, b)) = pending.pop() {
            let block = passes[q].block(b);
            // Parities already disclosed; re-checking leaks nothing new.
            if parity_at(reference, block) == parity_at(noisy, block) {
                continue;
            }
            if out.bisections >= params.max_bisections {
                return Err(QscError::ReconciliationFailure(format!(
                    "bisection budget of {} exhausted in pass {p}",
                    params.max_bisections
                )));
            }
            out.bisections += 1;

            let (bit, leaked) = bisect(reference, noisy, block);
            out.leaked_bits += leaked;
            noisy[bit] ^= 1;
            out.corrected += 1;

            for (r, pass) in passes.iter().enumerate() {
                if r != q {
                    pending.push((r, pass.block_of(bit)));
                }
            }
        }
        out.passes = p + 1;
    }

    for round in 0..params.verify_rounds {
        let subset: Vec<usize> = (0..n).filter(|_| rng.random::<bool>()).collect();
        out.leaked_bits += 1;
        if parity_at(reference, &subset) != parity_at(noisy, &subset) {
            return Err(QscError::ReconciliationFailure(format!(
                "residual errors detected in verification round {} after {} passes",
                round + 1,
                params.passes
            )));
        }
    }

    Ok(out)
}

/// Locate one erroneous position inside a block with odd error count.
/// Returns the position and the number of parity bits disclosed.
fn bisect(reference: &[u8], noisy: &[u8], block: &[usize]) -> (usize, usize) {
    let mut span = block;
    let mut leaked = 0;
    while span.len() > 1 {
        let (left, right) = span.split_at(span.len() / 2);
        leaked += 1;
        span = if parity_at(reference, left) != parity_at(noisy, left) {
            left
        } else {
            right
        };
    }
    (span[0], leaked)
}

fn validate_params(params: &CascadeParams) -> Result<()> {
    if params.block_size < 2 {
        return Err(QscError::InvalidConfiguration(format!(
            "cascade block size {} must be at least 2",
            params.block_size
        )));
    }
    if params.passes == 0 {
        return Err(QscError::InvalidConfiguration(
            "cascade needs at least one pass".into(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
