//! RSA key management: generation, OAEP encryption, PEM import/export and
//! symmetric key transport.
//!
//! Padding is always OAEP with SHA-256.  Decryption failures of any kind
//! collapse into one opaque [`QscError::Decryption`] so a caller cannot
//! learn which check rejected a ciphertext.

use std::path::{Path, PathBuf};

use rsa::pkcs1::DecodeRsaPublicKey as _;
use rsa::pkcs8::{DecodePrivateKey as _, DecodePublicKey as _, EncodePrivateKey as _};
use rsa::pkcs8::{EncodePublicKey as _, LineEnding};
use rsa::rand_core::OsRng;
use rsa::traits::PublicKeyParts as _;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use secrecy::SecretString;
use sha2::Sha256;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::channel::{ChannelMode, SymmetricChannel};
use crate::error::{QscError, Result, ResultExt as _};
use crate::util;

pub const MIN_MODULUS_BITS: usize = 2048;
pub const DEFAULT_MODULUS_BITS: usize = 3072;

/// OAEP overhead: two SHA-256 digests plus two bytes.
const OAEP_OVERHEAD: usize = 2 * 32 + 2;

pub const PRIVATE_KEY_FILE: &str = "private_key.pem";
pub const PUBLIC_KEY_FILE: &str = "public_key.pem";

// ---------------------------------------------------------------------------
// Key pair
// ---------------------------------------------------------------------------

pub struct KeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
    key_id: String,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("modulus_bits", &self.modulus_bits())
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Generate a fresh key from OS entropy.
    pub fn generate(modulus_bits: usize) -> Result<Self> {
        if modulus_bits < MIN_MODULUS_BITS {
            return Err(QscError::InvalidConfiguration(format!(
                "RSA modulus of {modulus_bits} bits is below the {MIN_MODULUS_BITS}-bit minimum"
            )));
        }
        let private = RsaPrivateKey::new(&mut OsRng, modulus_bits).ctx_key("generate RSA key")?;
        let pair = Self::from_private(private)?;
        info!(modulus_bits, key_id = %pair.key_id, "RSA key pair generated");
        Ok(pair)
    }

    fn from_private(private: RsaPrivateKey) -> Result<Self> {
        let public = RsaPublicKey::from(&private);
        let key_id = key_id(&public)?;
        Ok(Self {
            private,
            public,
            key_id,
        })
    }

    /// Import a PKCS#8 private key.
    pub fn from_private_key_pem(pem: &str) -> Result<Self> {
        let private = RsaPrivateKey::from_pkcs8_pem(pem.trim())
            .ctx_validation("parse PKCS#8 private key")?;
        Self::from_private(private)
    }

    pub fn load_private_key_file(path: &Path) -> Result<Self> {
        util::validate_path(path, "private key")?;
        let pem = Zeroizing::new(
            std::fs::read_to_string(path)
                // Keep key paths out of error strings.
                .map_err(|e| QscError::Key(format!("read private key failed: {e}")))?,
        );
        Self::from_private_key_pem(&pem)
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private
    }

    pub fn modulus_bits(&self) -> usize {
        self.public.size() * 8
    }

    /// SHA-256 hex of the SPKI DER encoding.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// SPKI public key PEM.
    pub fn public_key_pem(&self) -> Result<String> {
        self.public
            .to_public_key_pem(LineEnding::LF)
            .ctx_key("encode public key PEM")
    }

    /// PKCS#8 private key PEM.
    pub fn private_key_pem(&self) -> Result<SecretString> {
        let pem = self
            .private
            .to_pkcs8_pem(LineEnding::LF)
            .ctx_key("encode private key PEM")?;
        Ok(SecretString::from(String::from(pem.as_str())))
    }

    /// Write `private_key.pem` (mode 0600 on Unix) and `public_key.pem`
    /// into `dir`, creating it if needed.
    pub fn write_pem_files(&self, dir: &Path) -> Result<(PathBuf, PathBuf)> {
        use secrecy::ExposeSecret as _;

        util::validate_path(dir, "key directory")?;
        std::fs::create_dir_all(dir)
            .map_err(|e| QscError::Key(format!("create {}: {e}", dir.display())))?;

        let private_path = dir.join(PRIVATE_KEY_FILE);
        let private_pem = self.private_key_pem()?;
        std::fs::write(&private_path, private_pem.expose_secret().as_bytes())
            .map_err(|e| QscError::Key(format!("write {}: {e}", private_path.display())))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt as _;
            std::fs::set_permissions(&private_path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| QscError::Key(format!("chmod {}: {e}", private_path.display())))?;
        }

        let public_path = dir.join(PUBLIC_KEY_FILE);
        std::fs::write(&public_path, self.public_key_pem()?.as_bytes())
            .map_err(|e| QscError::Key(format!("write {}: {e}", public_path.display())))?;

        debug!(dir = %dir.display(), key_id = %self.key_id, "key pair written");
        Ok((private_path, public_path))
    }
}

// ---------------------------------------------------------------------------
// Public key helpers
// ---------------------------------------------------------------------------

/// Parse an SPKI (`BEGIN PUBLIC KEY`) or PKCS#1 (`BEGIN RSA PUBLIC KEY`) PEM.
pub fn public_key_from_pem(pem: &str) -> Result<RsaPublicKey> {
    let pem = pem.trim();
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .ctx_validation("parse RSA public key PEM")
}

pub fn key_id(public: &RsaPublicKey) -> Result<String> {
    let der = public.to_public_key_der().ctx_key("encode SPKI DER")?;
    Ok(util::sha256_hex(der.as_bytes()))
}

/// Largest plaintext OAEP-SHA256 can carry under `public`.
pub fn oaep_capacity(public: &RsaPublicKey) -> usize {
    public.size().saturating_sub(OAEP_OVERHEAD)
}

// ---------------------------------------------------------------------------
// OAEP
// ---------------------------------------------------------------------------

pub fn encrypt(message: &[u8], public: &RsaPublicKey) -> Result<Vec<u8>> {
    let max = oaep_capacity(public);
    if message.len() > max {
        return Err(QscError::MessageTooLarge {
            len: message.len(),
            max,
        });
    }
    public
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), message)
        .ctx_key("RSA-OAEP encrypt")
}

pub fn decrypt(ciphertext: &[u8], private: &RsaPrivateKey) -> Result<Vec<u8>> {
    private
        .decrypt(Oaep::new::<Sha256>(), ciphertext)
        .map_err(|_| QscError::Decryption)
}

pub fn encrypt_b64(message: &[u8], public: &RsaPublicKey) -> Result<String> {
    Ok(util::b64_encode(&encrypt(message, public)?))
}

/// Base64 input that does not decode is reported as a decryption failure too.
pub fn decrypt_b64(ciphertext_b64: &str, private: &RsaPrivateKey) -> Result<Vec<u8>> {
    let ciphertext = util::b64_decode(ciphertext_b64).map_err(|_| QscError::Decryption)?;
    decrypt(&ciphertext, private)
}

// ---------------------------------------------------------------------------
// Key transport
// ---------------------------------------------------------------------------

/// Encrypt a symmetric channel key to `public`.
pub fn wrap_channel_key(key: &[u8], public: &RsaPublicKey) -> Result<Vec<u8>> {
    if !matches!(key.len(), 16 | 24 | 32) {
        return Err(QscError::KeyLength(key.len()));
    }
    encrypt(key, public)
}

/// Recover a wrapped key and build the channel it keys.
pub fn unwrap_channel(
    wrapped: &[u8],
    private: &RsaPrivateKey,
    mode: ChannelMode,
) -> Result<SymmetricChannel> {
    let key = Zeroizing::new(decrypt(wrapped, private)?);
    SymmetricChannel::with_mode(&key, mode)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
