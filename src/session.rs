//! The BB84 key-agreement session.
//!
//! One [`KeyAgreementSession`] simulates both parties of a single run:
//!
//! ```text
//! Idle → BitsGenerated → ReceiverSimulated → Sifted → Reconciled → Amplified → Finalized
//!                                    (any failing stage) ↘ Aborted
//! ```
//!
//! Each operation requires the state its predecessor leaves behind.  Calling
//! one out of order is a [`QscError::Sequence`] and changes nothing.  A stage
//! that fails for any other reason aborts the session, which zeroizes every
//! bit vector it holds.  Errors are wrapped in [`QscError::Stage`] with the
//! name of the operation that produced them.

use secrecy::{ExposeSecret as _, SecretSlice};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::{Zeroize as _, Zeroizing};

use crate::amplify::{self, ToeplitzHash};
use crate::bits::{pack_bits, Basis};
use crate::cascade::{self, ReconcileOutcome};
use crate::config::SessionConfig;
use crate::error::{QscError, Result};
use crate::qber::{self, QberEstimate};
use crate::rng::{RandomSource, RngDomain};
use crate::util;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    BitsGenerated,
    ReceiverSimulated,
    Sifted,
    Reconciled,
    Amplified,
    Finalized,
    Aborted,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "Idle",
            Self::BitsGenerated => "BitsGenerated",
            Self::ReceiverSimulated => "ReceiverSimulated",
            Self::Sifted => "Sifted",
            Self::Reconciled => "Reconciled",
            Self::Amplified => "Amplified",
            Self::Finalized => "Finalized",
            Self::Aborted => "Aborted",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Final key
// ---------------------------------------------------------------------------

/// The agreed secret.  Zeroized on drop and never printed.
pub struct FinalKey {
    bytes: SecretSlice<u8>,
    bits: usize,
    fingerprint: String,
}

impl FinalKey {
    fn seal(bits: &[u8]) -> Self {
        let packed = pack_bits(bits);
        let fingerprint = util::sha256_hex(&packed);
        Self {
            bytes: SecretSlice::from(packed),
            bits: bits.len(),
            fingerprint,
        }
    }

    /// Packed key bytes, MSB-first.
    pub fn expose_secret(&self) -> &[u8] {
        self.bytes.expose_secret()
    }

    pub fn bits(&self) -> usize {
        self.bits
    }

    /// SHA-256 hex of the packed key.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl std::fmt::Debug for FinalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinalKey")
            .field("bits", &self.bits)
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Serializable summary of a run.  Never contains key bits.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub started_at_utc: String,
    pub state: SessionState,
    pub rng_domain: RngDomain,
    pub seed: Option<u64>,
    pub raw_bits: usize,
    pub sifted_bits: usize,
    pub disclosed_bits: usize,
    pub qber: Option<QberEstimate>,
    pub reconciled_bits: usize,
    pub corrected_bits: usize,
    pub leaked_bits: usize,
    pub intercepted: usize,
    pub final_key_bits: usize,
    pub key_fingerprint: Option<String>,
}

/// What [`run_session`] hands back.
#[derive(Debug)]
pub struct SessionOutcome {
    pub key: FinalKey,
    pub report: SessionReport,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub struct KeyAgreementSession {
    id: Uuid,
    started_at_utc: String,
    config: SessionConfig,
    rng: RandomSource,
    state: SessionState,

    sender_bits: Zeroizing<Vec<u8>>,
    sender_bases: Vec<Basis>,
    receiver_bases: Vec<Basis>,
    receiver_bits: Zeroizing<Vec<u8>>,
    intercepted: usize,

    sifted_sender: Zeroizing<Vec<u8>>,
    sifted_receiver: Zeroizing<Vec<u8>>,
    sifted_len: usize,
    qber: Option<QberEstimate>,

    outcome: Option<ReconcileOutcome>,
    reconciled_len: usize,

    amplified_sender: Zeroizing<Vec<u8>>,
    amplified_receiver: Zeroizing<Vec<u8>>,

    final_key: Option<FinalKey>,
}

impl std::fmt::Debug for KeyAgreementSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyAgreementSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("rng", &self.rng)
            .finish_non_exhaustive()
    }
}

impl KeyAgreementSession {
    /// New session; the RNG is seeded when `config.seed` is set and
    /// cryptographic otherwise.
    pub fn new(config: SessionConfig) -> Result<Self> {
        let rng = RandomSource::from_seed_option(config.seed);
        Self::with_rng(config, rng)
    }

    /// New session drawing from an injected source.
    pub fn with_rng(config: SessionConfig, rng: RandomSource) -> Result<Self> {
        config.validate()?;
        let id = Uuid::new_v4();
        debug!(session_id = %id, rng = %rng.domain(), "session created");
        Ok(Self {
            id,
            started_at_utc: util::now_utc_rfc3339(),
            config,
            rng,
            state: SessionState::Idle,
            sender_bits: Zeroizing::new(Vec::new()),
            sender_bases: Vec::new(),
            receiver_bases: Vec::new(),
            receiver_bits: Zeroizing::new(Vec::new()),
            intercepted: 0,
            sifted_sender: Zeroizing::new(Vec::new()),
            sifted_receiver: Zeroizing::new(Vec::new()),
            sifted_len: 0,
            qber: None,
            outcome: None,
            reconciled_len: 0,
            amplified_sender: Zeroizing::new(Vec::new()),
            amplified_receiver: Zeroizing::new(Vec::new()),
            final_key: None,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // -- simulation inspection ------------------------------------------------

    pub fn sender_bits(&self) -> &[u8] {
        &self.sender_bits
    }

    pub fn sender_bases(&self) -> &[Basis] {
        &self.sender_bases
    }

    pub fn receiver_bits(&self) -> &[u8] {
        &self.receiver_bits
    }

    pub fn receiver_bases(&self) -> &[Basis] {
        &self.receiver_bases
    }

    /// Sender's view of the sifted (later reconciled) key.
    pub fn sifted_key(&self) -> &[u8] {
        &self.sifted_sender
    }

    /// Receiver's view of the sifted (later reconciled) key.
    pub fn receiver_sifted_key(&self) -> &[u8] {
        &self.sifted_receiver
    }

    pub fn qber(&self) -> Option<&QberEstimate> {
        self.qber.as_ref()
    }

    pub fn reconcile_outcome(&self) -> Option<&ReconcileOutcome> {
        self.outcome.as_ref()
    }

    // -- pipeline ---------------------------------------------------------------

    /// Draw `n` sender bits, then `n` sender bases.
    pub fn generate_sender_bits(&mut self, n: usize) -> Result<()> {
        const OP: &str = "generate_sender_bits";
        self.require(OP, SessionState::Idle)?;
        if n == 0 {
            return Err(self.abort(
                OP,
                QscError::InvalidConfiguration("bit count must be positive".into()),
            ));
        }
        self.sender_bits = Zeroizing::new(self.rng.bits(n));
        self.sender_bases = self.rng.bases(n);
        self.state = SessionState::BitsGenerated;
        debug!(session_id = %self.id, raw_bits = n, "sender bits generated");
        Ok(())
    }

    /// Measure every qubit in a random basis.  A matching basis reproduces
    /// the sender's bit; a mismatched one yields a uniform random bit.
    ///
    /// With `eavesdrop_rate > 0` an intercept-resend adversary measures a
    /// qubit in her own random basis first and re-prepares it in that basis.
    pub fn simulate_receiver(&mut self) -> Result<()> {
        const OP: &str = "simulate_receiver";
        self.require(OP, SessionState::BitsGenerated)?;
        let n = self.sender_bits.len();
        self.receiver_bases = self.rng.bases(n);

        let rate = self.config.eavesdrop_rate;
        let mut received = Zeroizing::new(Vec::with_capacity(n));
        let mut intercepted = 0;
        for i in 0..n {
            let (mut basis, mut bit) = (self.sender_bases[i], self.sender_bits[i]);
            if rate > 0.0 && self.rng.chance(rate) {
                intercepted += 1;
                let eve_basis = self.rng.basis();
                if eve_basis != basis {
                    bit = self.rng.bit();
                }
                basis = eve_basis;
            }
            received.push(if self.receiver_bases[i] == basis {
                bit
            } else {
                self.rng.bit()
            });
        }
        self.receiver_bits = received;
        self.intercepted = intercepted;
        self.state = SessionState::ReceiverSimulated;
        debug!(session_id = %self.id, intercepted, "receiver measurements simulated");
        Ok(())
    }

    /// Keep the positions where the bases agree, in index order.
    /// Returns the sifted length.
    pub fn sift_key(&mut self) -> Result<usize> {
        const OP: &str = "sift_key";
        self.require(OP, SessionState::ReceiverSimulated)?;
        let matching: Vec<usize> = self
            .sender_bases
            .iter()
            .zip(&self.receiver_bases)
            .enumerate()
            .filter_map(|(i, (a, b))| (a == b).then_some(i))
            .collect();
        if matching.is_empty() {
            return Err(self.abort(OP, QscError::BasisMismatchExhausted));
        }
        self.sifted_sender = Zeroizing::new(matching.iter().map(|&i| self.sender_bits[i]).collect());
        self.sifted_receiver =
            Zeroizing::new(matching.iter().map(|&i| self.receiver_bits[i]).collect());
        self.sifted_len = matching.len();
        self.state = SessionState::Sifted;
        debug!(
            session_id = %self.id,
            raw_bits = self.sender_bits.len(),
            sifted_bits = self.sifted_len,
            "key sifted"
        );
        Ok(self.sifted_len)
    }

    /// Disclose a random sample of the sifted key, compare it, and drop the
    /// disclosed positions from both views.  Allowed once, in `Sifted`.
    pub fn estimate_qber(&mut self, sample_fraction: f64) -> Result<QberEstimate> {
        const OP: &str = "estimate_qber";
        self.require(OP, SessionState::Sifted)?;
        if self.qber.is_some() {
            return Err(QscError::Sequence {
                op: OP,
                state: format!("{} (estimate already taken)", self.state),
            }
            .at_stage(OP));
        }
        if let Err(e) = util::validate_fraction(sample_fraction, "sample fraction", true) {
            return Err(self.abort(OP, e));
        }

        let len = self.sifted_sender.len();
        let k = qber::sample_size(len, sample_fraction);
        let positions = self.rng.sample_indices(len, k);
        let estimate = match qber::estimate(
            &self.sifted_sender,
            &self.sifted_receiver,
            &positions,
            self.config.qber_threshold,
        ) {
            Ok(est) => est,
            Err(e) => return Err(self.abort(OP, e)),
        };

        let mut disclosed = positions.iter().copied().peekable();
        let keep: Vec<bool> = (0..len)
            .map(|i| {
                if disclosed.peek() == Some(&i) {
                    disclosed.next();
                    false
                } else {
                    true
                }
            })
            .collect();
        retain_by_mask(&mut self.sifted_sender, &keep);
        retain_by_mask(&mut self.sifted_receiver, &keep);
        self.qber = Some(estimate.clone());

        debug!(
            session_id = %self.id,
            sample = estimate.sample_size,
            errors = estimate.errors,
            qber = estimate.qber,
            "QBER estimated"
        );
        if !estimate.passed {
            return Err(self.abort(
                OP,
                QscError::EavesdroppingSuspected {
                    qber: estimate.qber,
                    threshold: estimate.threshold,
                },
            ));
        }
        if self.sifted_sender.is_empty() {
            return Err(self.abort(
                OP,
                QscError::KeyTooShort {
                    available: 0,
                    requested: 1,
                },
            ));
        }
        Ok(estimate)
    }

    /// Run Cascade over the sifted key.
    pub fn reconcile(&mut self) -> Result<ReconcileOutcome> {
        const OP: &str = "reconcile";
        self.require(OP, SessionState::Sifted)?;
        let params = self.config.cascade_params();
        let outcome = match cascade::reconcile(
            &self.sifted_sender,
            &mut self.sifted_receiver,
            &params,
            &mut self.rng,
        ) {
            Ok(out) => out,
            Err(e) => return Err(self.abort(OP, e)),
        };
        self.reconciled_len = self.sifted_sender.len();
        self.outcome = Some(outcome);
        self.state = SessionState::Reconciled;
        debug!(
            session_id = %self.id,
            reconciled_bits = self.reconciled_len,
            corrected = outcome.corrected,
            leaked_bits = outcome.leaked_bits,
            "key reconciled"
        );
        Ok(outcome)
    }

    /// Largest output length privacy amplification will accept.  Zero until
    /// the key has been reconciled.
    pub fn max_output_bits(&self) -> usize {
        match self.outcome {
            Some(out) => amplify::max_output_bits(
                self.reconciled_len,
                out.leaked_bits,
                self.config.security_margin,
            ),
            None => 0,
        }
    }

    /// Compress both reconciled keys to `output_bits` with a fresh public
    /// Toeplitz seed.
    pub fn privacy_amplify(&mut self, output_bits: usize) -> Result<()> {
        const OP: &str = "privacy_amplify";
        self.require(OP, SessionState::Reconciled)?;
        let bound = self.max_output_bits();
        if output_bits == 0 || output_bits > bound {
            return Err(self.abort(
                OP,
                QscError::KeyTooShort {
                    available: bound,
                    requested: output_bits,
                },
            ));
        }
        let hashed = ToeplitzHash::random(self.reconciled_len, output_bits, &mut self.rng)
            .and_then(|h| Ok((h.hash(&self.sifted_sender)?, h.hash(&self.sifted_receiver)?)));
        let (sender, receiver) = match hashed {
            Ok(pair) => pair,
            Err(e) => return Err(self.abort(OP, e)),
        };
        self.amplified_sender = Zeroizing::new(sender);
        self.amplified_receiver = Zeroizing::new(receiver);
        self.state = SessionState::Amplified;
        debug!(session_id = %self.id, output_bits, bound, "privacy amplified");
        Ok(())
    }

    /// Key confirmation: both amplified keys must hash to the same digest.
    pub fn finalize(&mut self) -> Result<&FinalKey> {
        const OP: &str = "finalize";
        self.require(OP, SessionState::Amplified)?;
        let ours = util::sha256(&pack_bits(&self.amplified_sender));
        let theirs = util::sha256(&pack_bits(&self.amplified_receiver));
        if ours != theirs {
            return Err(self.abort(
                OP,
                QscError::ReconciliationFailure("key confirmation digests differ".into()),
            ));
        }
        let key = FinalKey::seal(&self.amplified_sender);
        self.amplified_receiver.zeroize();
        self.state = SessionState::Finalized;
        info!(
            session_id = %self.id,
            final_key_bits = key.bits(),
            fingerprint = %key.fingerprint(),
            "session finalized"
        );
        Ok(&*self.final_key.insert(key))
    }

    /// The agreed key.  Only available once the session is `Finalized`.
    pub fn get_key(&self) -> Result<&FinalKey> {
        const OP: &str = "get_key";
        match (&self.state, &self.final_key) {
            (SessionState::Finalized, Some(key)) => Ok(key),
            (SessionState::Aborted, _) => Err(self.sequence_error(OP)),
            _ => Err(QscError::NotReady(self.state.to_string()).at_stage(OP)),
        }
    }

    /// Consume the session and take the key out of it.
    pub fn into_key(mut self) -> Result<FinalKey> {
        self.get_key()?;
        self.final_key
            .take()
            .ok_or_else(|| QscError::NotReady(self.state.to_string()).at_stage("get_key"))
    }

    pub fn report(&self) -> SessionReport {
        let outcome = self.outcome.unwrap_or_default();
        SessionReport {
            session_id: self.id,
            started_at_utc: self.started_at_utc.clone(),
            state: self.state,
            rng_domain: self.rng.domain(),
            seed: self.rng.seed(),
            raw_bits: self.sender_bases.len(),
            sifted_bits: self.sifted_len,
            disclosed_bits: self.qber.as_ref().map_or(0, |q| q.sample_size),
            qber: self.qber.clone(),
            reconciled_bits: self.reconciled_len,
            corrected_bits: outcome.corrected,
            leaked_bits: outcome.leaked_bits,
            intercepted: self.intercepted,
            final_key_bits: self.final_key.as_ref().map_or(0, FinalKey::bits),
            key_fingerprint: self.final_key.as_ref().map(|k| k.fingerprint().to_string()),
        }
    }

    // -- internals ------------------------------------------------------------

    fn require(&self, op: &'static str, expected: SessionState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(self.sequence_error(op))
        }
    }

    fn sequence_error(&self, op: &'static str) -> QscError {
        QscError::Sequence {
            op,
            state: self.state.to_string(),
        }
        .at_stage(op)
    }

    fn abort(&mut self, stage: &'static str, err: QscError) -> QscError {
        warn!(session_id = %self.id, stage, error = %err, "session aborted");
        self.sender_bits.zeroize();
        self.receiver_bits.zeroize();
        self.sender_bases.clear();
        self.receiver_bases.clear();
        self.sifted_sender.zeroize();
        self.sifted_receiver.zeroize();
        self.amplified_sender.zeroize();
        self.amplified_receiver.zeroize();
        self.final_key = None;
        self.state = SessionState::Aborted;
        err.at_stage(stage)
    }
}

fn retain_by_mask(bits: &mut Vec<u8>, keep: &[bool]) {
    let mut mask = keep.iter();
    bits.retain(|_| mask.next().copied().unwrap_or(false));
}

// ---------------------------------------------------------------------------
// One-shot driver
// ---------------------------------------------------------------------------

/// Run the whole pipeline with the RNG chosen by `config.seed`.
pub fn run_session(config: &SessionConfig) -> Result<SessionOutcome> {
    run_session_with(config, RandomSource::from_seed_option(config.seed))
}

pub fn run_session_with(config: &SessionConfig, rng: RandomSource) -> Result<SessionOutcome> {
    let mut session = KeyAgreementSession::with_rng(config.clone(), rng)?;
    session.generate_sender_bits(config.bit_count)?;
    session.simulate_receiver()?;
    session.sift_key()?;
    if let Some(fraction) = config.qber_sample_fraction {
        session.estimate_qber(fraction)?;
    }
    session.reconcile()?;
    session.privacy_amplify(config.output_bits)?;
    session.finalize()?;
    let report = session.report();
    let key = session.into_key()?;
    Ok(SessionOutcome { key, report })
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn seeded(seed: u64) -> SessionConfig {
        SessionConfig {
            seed: Some(seed),
            ..SessionConfig::default()
        }
    }

    #[test]
    fn seed_42_ten_bits_regression() {
        let mut s = KeyAgreementSession::new(seeded(42)).unwrap();
        s.generate_sender_bits(10).unwrap();
        assert_eq!(s.sender_bits(), &[0, 1, 0, 1, 1, 0, 0, 1, 1, 0]);
        use Basis::{X, Z};
        assert_eq!(s.sender_bases(), &[X, Z, Z, Z, Z, X, X, X, X, Z]);
        assert_eq!(s.state(), SessionState::BitsGenerated);
    }

    #[test]
    fn same_seed_same_key() {
        let a = run_session(&seeded(5)).unwrap();
        let b = run_session(&seeded(5)).unwrap();
        assert_eq!(a.key.expose_secret(), b.key.expose_secret());
        assert_eq!(a.report.sifted_bits, b.report.sifted_bits);
        let c = run_session(&seeded(6)).unwrap();
        assert_ne!(a.key.expose_secret(), c.key.expose_secret());
    }

    #[test]
    fn sifted_length_matches_basis_agreement() {
        let mut s = KeyAgreementSession::new(seeded(11)).unwrap();
        s.generate_sender_bits(4096).unwrap();
        s.simulate_receiver().unwrap();
        let matching = s
            .sender_bases()
            .iter()
            .zip(s.receiver_bases())
            .filter(|(a, b)| a == b)
            .count();
        let sifted = s.sift_key().unwrap();
        assert_eq!(sifted, matching);
        // Binomial(4096, 1/2) has sd 32; allow six of them.
        assert!((2048 - 192..=2048 + 192).contains(&sifted));
        // Without noise or an adversary both views agree exactly.
        assert_eq!(s.sifted_key(), s.receiver_sifted_key());
    }

    #[test]
    fn out_of_order_calls_are_sequence_errors() {
        let mut s = KeyAgreementSession::new(seeded(1)).unwrap();
        let err = s.sift_key().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SequenceError);
        assert_eq!(err.stage(), Some("sift_key"));
        assert_eq!(s.state(), SessionState::Idle);

        assert_eq!(s.get_key().unwrap_err().kind(), ErrorKind::NotReadyError);
        assert_eq!(s.state(), SessionState::Idle);

        s.generate_sender_bits(64).unwrap();
        assert_eq!(
            s.generate_sender_bits(64).unwrap_err().kind(),
            ErrorKind::SequenceError
        );
        assert_eq!(s.reconcile().unwrap_err().kind(), ErrorKind::SequenceError);
        assert_eq!(s.state(), SessionState::BitsGenerated);
    }

    #[test]
    fn qber_estimate_only_once() {
        let mut s = KeyAgreementSession::new(seeded(2)).unwrap();
        s.generate_sender_bits(1024).unwrap();
        s.simulate_receiver().unwrap();
        let before = s.sift_key().unwrap();
        let est = s.estimate_qber(0.1).unwrap();
        assert_eq!(est.errors, 0);
        assert_eq!(s.sifted_key().len(), before - est.sample_size);
        assert_eq!(s.receiver_sifted_key().len(), before - est.sample_size);
        let err = s.estimate_qber(0.1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SequenceError);
        assert_eq!(s.state(), SessionState::Sifted);
    }

    #[test]
    fn zero_bits_aborts() {
        let mut s = KeyAgreementSession::new(seeded(3)).unwrap();
        let err = s.generate_sender_bits(0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
        assert_eq!(s.state(), SessionState::Aborted);
        // Everything afterwards is a sequencing error.
        assert_eq!(
            s.generate_sender_bits(8).unwrap_err().kind(),
            ErrorKind::SequenceError
        );
        assert_eq!(s.get_key().unwrap_err().kind(), ErrorKind::SequenceError);
    }

    #[test]
    fn full_interception_is_detected() {
        let cfg = SessionConfig {
            eavesdrop_rate: 1.0,
            ..seeded(4)
        };
        let mut s = KeyAgreementSession::new(cfg).unwrap();
        s.generate_sender_bits(4096).unwrap();
        s.simulate_receiver().unwrap();
        s.sift_key().unwrap();
        let err = s.estimate_qber(0.1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EavesdroppingSuspected);
        assert_eq!(err.stage(), Some("estimate_qber"));
        assert_eq!(s.state(), SessionState::Aborted);
        assert!(s.sender_bits().is_empty());
        assert!(s.sifted_key().is_empty());
        assert_eq!(s.report().intercepted, 4096);
    }

    #[test]
    fn partial_interception_is_reconciled() {
        let cfg = SessionConfig {
            eavesdrop_rate: 0.2,
            ..seeded(8)
        };
        let out = run_session(&cfg).unwrap();
        assert!(out.report.corrected_bits > 0);
        assert!(out.report.intercepted > 0);
        assert_eq!(out.key.bits(), cfg.output_bits);
    }

    #[test]
    fn length_bounds_hold() {
        let mut s = KeyAgreementSession::new(seeded(9)).unwrap();
        s.generate_sender_bits(4096).unwrap();
        s.simulate_receiver().unwrap();
        let sifted = s.sift_key().unwrap();
        s.estimate_qber(0.1).unwrap();
        let out = s.reconcile().unwrap();
        let reconciled = s.sifted_key().len();
        assert!(reconciled <= sifted);
        let max = s.max_output_bits();
        assert!(max <= reconciled - out.leaked_bits);
        s.privacy_amplify(256).unwrap();
        let key = s.finalize().unwrap();
        assert_eq!(key.bits(), 256);
        assert_eq!(key.expose_secret().len(), 32);
        assert!(key.bits() <= reconciled - out.leaked_bits);
    }

    #[test]
    fn amplify_beyond_bound_aborts() {
        let mut s = KeyAgreementSession::new(seeded(10)).unwrap();
        s.generate_sender_bits(512).unwrap();
        s.simulate_receiver().unwrap();
        s.sift_key().unwrap();
        s.reconcile().unwrap();
        let bound = s.max_output_bits();
        let err = s.privacy_amplify(bound + 1).unwrap_err();
        assert!(matches!(
            err.root(),
            QscError::KeyTooShort { available, .. } if *available == bound
        ));
        assert_eq!(s.state(), SessionState::Aborted);
    }

    #[test]
    fn report_never_contains_key() {
        let out = run_session(&seeded(12)).unwrap();
        let json = serde_json::to_string(&out.report).unwrap();
        assert!(json.contains(&out.report.session_id.to_string()));
        assert!(json.contains(out.key.fingerprint()));
        assert_eq!(out.report.state, SessionState::Finalized);
        assert_eq!(out.report.final_key_bits, 256);
        assert!(!format!("{:?}", out.key).contains("bytes"));
    }

    #[test]
    fn cryptographic_sessions_differ() {
        let cfg = SessionConfig::default();
        let a = run_session(&cfg).unwrap();
        let b = run_session(&cfg).unwrap();
        assert_eq!(a.report.rng_domain, RngDomain::Cryptographic);
        assert_ne!(a.key.expose_secret(), b.key.expose_secret());
    }

    #[test]
    fn sessions_run_on_separate_threads() {
        let keys: Vec<String> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|i| s.spawn(move || run_session(&seeded(100 + i)).unwrap()))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap().key.fingerprint().to_string())
                .collect()
        });
        for (i, fp) in keys.iter().enumerate() {
            assert_eq!(
                fp,
                run_session(&seeded(100 + i as u64)).unwrap().key.fingerprint()
            );
        }
    }
}
