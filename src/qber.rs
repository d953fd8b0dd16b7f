//! Quantum bit error rate estimation over a disclosed sample.

use serde::{Deserialize, Serialize};

use crate::error::{QscError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QberEstimate {
    pub sample_size: usize,
    pub errors: usize,
    pub qber: f64,
    pub threshold: f64,
    pub passed: bool,
}

/// Compare the two parties' bits at the disclosed `positions`:
///   QBER = errors / sample_size
///
/// The estimate passes when QBER <= threshold.  Returns an error if the
/// sample is empty, a position is out of range, or the threshold is invalid.
pub fn estimate(
    sender: &[u8],
    receiver: &[u8],
    positions: &[usize],
    threshold: f64,
) -> Result<QberEstimate> {
    crate::util::validate_qber_threshold(threshold)?;

    if sender.len() != receiver.len() {
        return Err(QscError::Validation(format!(
            "key length mismatch: {} vs {}",
            sender.len(),
            receiver.len()
        )));
    }
    if positions.is_empty() {
        return Err(QscError::InvalidConfiguration(
            "QBER sample is empty".into(),
        ));
    }
    if let Some(bad) = positions.iter().find(|&&i| i >= sender.len()) {
        return Err(QscError::Validation(format!(
            "sample position {bad} out of range for key of {} bits",
            sender.len()
        )));
    }

    let errors = positions
        .iter()
        .filter(|&&i| sender[i] != receiver[i])
        .count();
    let qber = errors as f64 / positions.len() as f64;
    Ok(QberEstimate {
        sample_size: positions.len(),
        errors,
        qber,
        threshold,
        passed: qber <= threshold,
    })
}

/// Sample size for a disclosure fraction: at least one bit, never the
/// whole key unless the key is a single bit.
pub fn sample_size(key_len: usize, fraction: f64) -> usize {
    let k = (key_len as f64 * fraction).ceil() as usize;
    let upper = if key_len > 1 { key_len - 1 } else { 1 };
    k.clamp(1, upper)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_channel_passes() {
        let key = vec![0, 1, 1, 0, 1, 0, 0, 1];
        let res = estimate(&key, &key, &[0, 2, 4, 6], 0.11).unwrap();
        assert_eq!(res.errors, 0);
        assert_eq!(res.qber, 0.0);
        assert!(res.passed);
    }

    #[test]
    fn noisy_sample_fails() {
        let a = vec![0, 0, 0, 0];
        let b = vec![1, 0, 1, 0];
        let res = estimate(&a, &b, &[0, 1, 2, 3], 0.11).unwrap();
        assert_eq!(res.errors, 2);
        assert!((res.qber - 0.5).abs() < f64::EPSILON);
        assert!(!res.passed);
    }

    #[test]
    fn threshold_boundary_value() {
        // 1 error in 4 = 0.25; passes at exactly 0.25 (<=)
        let a = vec![0, 0, 0, 0];
        let b = vec![1, 0, 0, 0];
        let res = estimate(&a, &b, &[0, 1, 2, 3], 0.25).unwrap();
        assert!(res.passed);
    }

    #[test]
    fn invalid_inputs_rejected() {
        let key = vec![0, 1];
        assert!(estimate(&key, &key, &[], 0.11).is_err());
        assert!(estimate(&key, &key, &[5], 0.11).is_err());
        assert!(estimate(&key, &[0], &[0], 0.11).is_err());
        assert!(estimate(&key, &key, &[0], 0.9).is_err());
    }

    #[test]
    fn sample_size_bounds() {
        assert_eq!(sample_size(100, 0.1), 10);
        assert_eq!(sample_size(5, 0.01), 1);
        assert_eq!(sample_size(101, 0.1), 11);
        assert_eq!(sample_size(1, 0.5), 1);
    }

    #[test]
    fn sample_leaves_at_least_one_bit() {
        assert_eq!(sample_size(2, 0.99), 1);
        assert_eq!(sample_size(10, 1.0), 9);
        assert_eq!(sample_size(0, 0.5), 1);
    }
}
