//! Signature creation and verification.
//!
//! Signing goes through the [`Signer`] trait so other key stores can sit
//! behind the same boundary.  Verification is a pure function that returns a
//! [`Verification`] value: a wrong or tampered signature is an answer, not
//! an error.

use std::path::Path;

use rsa::pss::{BlindedSigningKey, Signature, VerifyingKey};
use rsa::rand_core::OsRng;
use rsa::signature::{RandomizedSigner as _, SignatureEncoding as _, Verifier as _};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::asymmetric::{self, KeyPair};
use crate::error::{QscError, Result, ResultExt as _};
use crate::util;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerDescriptor {
    /// Stable signer identifier: SHA-256 hex of the SPKI DER public key.
    pub key_id: String,
    /// Human-readable descriptor (e.g., "rsa-pss-sha256/pkcs8-pem").
    pub kind: String,
}

/// Trait boundary for all signer implementations.
pub trait Signer {
    fn descriptor(&self) -> &SignerDescriptor;
    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verification {
    Valid,
    Invalid,
}

impl Verification {
    pub fn is_valid(self) -> bool {
        self == Self::Valid
    }
}

impl std::fmt::Display for Verification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Valid => write!(f, "valid"),
            Self::Invalid => write!(f, "invalid"),
        }
    }
}

// ---------------------------------------------------------------------------
// RSA-PSS signer
// ---------------------------------------------------------------------------

/// RSA-PSS over SHA-256 with a random salt and blinded private operations.
pub struct RsaPssSigner {
    signing_key: BlindedSigningKey<Sha256>,
    descriptor: SignerDescriptor,
}

impl std::fmt::Debug for RsaPssSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaPssSigner")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl RsaPssSigner {
    pub fn new(private: RsaPrivateKey) -> Result<Self> {
        let key_id = asymmetric::key_id(&RsaPublicKey::from(&private))?;
        Ok(Self {
            signing_key: BlindedSigningKey::<Sha256>::new(private),
            descriptor: SignerDescriptor {
                key_id,
                kind: "rsa-pss-sha256/pkcs8-pem".to_string(),
            },
        })
    }

    pub fn from_key_pair(pair: &KeyPair) -> Result<Self> {
        Self::new(pair.private_key().clone())
    }

    pub fn from_private_key_pem_file(key_pem_path: &Path) -> Result<Self> {
        let key_pem = Zeroizing::new(
            std::fs::read_to_string(key_pem_path)
                // Keep key paths out of error strings.
                .map_err(|e| QscError::Signing(format!("read key pem failed: {e}")))?,
        );
        let pair = KeyPair::from_private_key_pem(&key_pem)
            .map_err(|e| QscError::Signing(format!("parse RSA PKCS#8 private key: {e}")))?;
        Self::from_key_pair(&pair)
    }
}

impl Signer for RsaPssSigner {
    fn descriptor(&self) -> &SignerDescriptor {
        &self.descriptor
    }

    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>> {
        let sig = self
            .signing_key
            .try_sign_with_rng(&mut OsRng, msg)
            .ctx_signing("RSA-PSS sign")?;
        Ok(sig.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Standalone verification
// ---------------------------------------------------------------------------

/// Check an RSA-PSS/SHA-256 signature.  Deterministic and side-effect free.
pub fn verify(message: &[u8], signature: &[u8], public: &RsaPublicKey) -> Verification {
    let Ok(sig) = Signature::try_from(signature) else {
        return Verification::Invalid;
    };
    let vk = VerifyingKey::<Sha256>::new(public.clone());
    if vk.verify(message, &sig).is_ok() {
        Verification::Valid
    } else {
        Verification::Invalid
    }
}

/// Verify with a base64 signature and a PEM public key.  Only malformed
/// inputs are errors.
pub fn verify_b64_pem(message: &[u8], signature_b64: &str, public_pem: &str) -> Result<Verification> {
    let public = asymmetric::public_key_from_pem(public_pem)?;
    let signature = util::b64_decode(signature_b64)?;
    Ok(verify(message, &signature, &public))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
