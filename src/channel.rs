//! Symmetric secure channel keyed from the agreed secret.
//!
//! Two modes share one wire format, `base64(iv):base64(ciphertext)`:
//!
//! - [`ChannelMode::Authenticated`] (default): AES-GCM with a random 96-bit
//!   nonce.  The ciphertext segment carries the 16-byte tag, so any
//!   modification is rejected before a plaintext is produced.
//! - [`ChannelMode::LegacyCbc`]: AES-CBC with PKCS#7 padding and a random
//!   128-bit IV.  Kept for interoperability with peers that only speak the
//!   older format; it has no integrity protection.
//!
//! A [`SymmetricChannel`] is immutable after construction and can be shared
//! across threads.  Key rotation swaps the whole channel through a
//! [`ChannelHandle`].

use std::sync::Arc;

use aes::{Aes128, Aes192, Aes256};
use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm, Nonce};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use parking_lot::RwLock;
use rand::RngCore as _;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{QscError, Result};
use crate::session::FinalKey;
use crate::util;

type Aes192Gcm = AesGcm<Aes192, U12>;

/// IV length for CBC (one AES block).
pub const CBC_IV_LEN: usize = 16;
/// Nonce length for GCM.
pub const GCM_NONCE_LEN: usize = 12;
/// GCM authentication tag length.
pub const GCM_TAG_LEN: usize = 16;
const BLOCK_LEN: usize = 16;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelMode {
    #[default]
    Authenticated,
    LegacyCbc,
}

impl ChannelMode {
    pub fn iv_len(self) -> usize {
        match self {
            Self::Authenticated => GCM_NONCE_LEN,
            Self::LegacyCbc => CBC_IV_LEN,
        }
    }
}

impl std::fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authenticated => write!(f, "aes-gcm"),
            Self::LegacyCbc => write!(f, "aes-cbc-pkcs7"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeySize {
    Aes128,
    Aes192,
    Aes256,
}

impl KeySize {
    fn from_len(len: usize) -> Result<Self> {
        match len {
            16 => Ok(Self::Aes128),
            24 => Ok(Self::Aes192),
            32 => Ok(Self::Aes256),
            other => Err(QscError::KeyLength(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

/// The two components of an encrypted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireCiphertext {
    pub iv: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl WireCiphertext {
    /// `base64(iv):base64(ciphertext)`; `:` is not in the base64 alphabet.
    pub fn encode(&self) -> String {
        format!(
            "{}:{}",
            util::b64_encode(&self.iv),
            util::b64_encode(&self.ciphertext)
        )
    }

    pub fn parse(wire: &str) -> Result<Self> {
        let (iv_b64, ct_b64) = wire
            .trim()
            .split_once(':')
            .ok_or_else(|| QscError::CipherFormat("missing ':' separator".into()))?;
        if iv_b64.is_empty() || ct_b64.is_empty() {
            return Err(QscError::CipherFormat("empty component".into()));
        }
        let iv = util::b64_decode(iv_b64)
            .map_err(|_| QscError::CipherFormat("iv is not valid base64".into()))?;
        let ciphertext = util::b64_decode(ct_b64)
            .map_err(|_| QscError::CipherFormat("ciphertext is not valid base64".into()))?;
        Ok(Self { iv, ciphertext })
    }

    /// Binary framing: `u16` big-endian IV length, IV, ciphertext.
    pub fn to_framed(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.iv.len() + self.ciphertext.len());
        // IV lengths are 12 or 16; the cast cannot truncate.
        out.extend_from_slice(&(self.iv.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn from_framed(bytes: &[u8]) -> Result<Self> {
        let (len, rest) = bytes
            .split_first_chunk::<2>()
            .ok_or_else(|| QscError::CipherFormat("frame shorter than header".into()))?;
        let iv_len = usize::from(u16::from_be_bytes(*len));
        if rest.len() < iv_len {
            return Err(QscError::CipherFormat("frame shorter than iv".into()));
        }
        let (iv, ciphertext) = rest.split_at(iv_len);
        Ok(Self {
            iv: iv.to_vec(),
            ciphertext: ciphertext.to_vec(),
        })
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

pub struct SymmetricChannel {
    key: Zeroizing<Vec<u8>>,
    size: KeySize,
    mode: ChannelMode,
}

impl std::fmt::Debug for SymmetricChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricChannel")
            .field("mode", &self.mode)
            .field("key_bits", &self.key_bits())
            .finish_non_exhaustive()
    }
}

impl SymmetricChannel {
    /// Authenticated channel over a 128/192/256-bit key.
    pub fn new(key: &[u8]) -> Result<Self> {
        Self::with_mode(key, ChannelMode::Authenticated)
    }

    /// CBC-only channel for legacy peers.
    pub fn legacy_cbc(key: &[u8]) -> Result<Self> {
        Self::with_mode(key, ChannelMode::LegacyCbc)
    }

    pub fn with_mode(key: &[u8], mode: ChannelMode) -> Result<Self> {
        let size = KeySize::from_len(key.len())?;
        Ok(Self {
            key: Zeroizing::new(key.to_vec()),
            size,
            mode,
        })
    }

    /// Key the channel with the output of a finished key agreement.
    pub fn from_final_key(key: &FinalKey, mode: ChannelMode) -> Result<Self> {
        Self::with_mode(key.expose_secret(), mode)
    }

    pub fn mode(&self) -> ChannelMode {
        self.mode
    }

    pub fn key_bits(&self) -> usize {
        self.key.len() * 8
    }

    /// Encrypt under a fresh IV and return the wire string.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        Ok(self.encrypt_parts(plaintext)?.encode())
    }

    pub fn decrypt(&self, wire: &str) -> Result<Vec<u8>> {
        self.decrypt_parts(&WireCiphertext::parse(wire)?)
    }

    pub fn encrypt_parts(&self, plaintext: &[u8]) -> Result<WireCiphertext> {
        let mut iv = vec![0u8; self.mode.iv_len()];
        rand::rng().fill_bytes(&mut iv);
        let ciphertext = match self.mode {
            ChannelMode::Authenticated => self.gcm_encrypt(&iv, plaintext)?,
            ChannelMode::LegacyCbc => self.cbc_encrypt(&iv, plaintext)?,
        };
        Ok(WireCiphertext { iv, ciphertext })
    }

    pub fn decrypt_parts(&self, parts: &WireCiphertext) -> Result<Vec<u8>> {
        if parts.iv.len() != self.mode.iv_len() {
            return Err(QscError::CipherFormat(format!(
                "iv must be {} bytes, got {}",
                self.mode.iv_len(),
                parts.iv.len()
            )));
        }
        match self.mode {
            ChannelMode::Authenticated => self.gcm_decrypt(&parts.iv, &parts.ciphertext),
            ChannelMode::LegacyCbc => self.cbc_decrypt(&parts.iv, &parts.ciphertext),
        }
    }

    fn gcm_encrypt(&self, nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Nonce::from_slice(nonce);
        let key = self.key.as_slice();
        let sealed = match self.size {
            KeySize::Aes128 => Aes128Gcm::new_from_slice(key)
                .map_err(|_| QscError::KeyLength(key.len()))?
                .encrypt(nonce, plaintext),
            KeySize::Aes192 => Aes192Gcm::new_from_slice(key)
                .map_err(|_| QscError::KeyLength(key.len()))?
                .encrypt(nonce, plaintext),
            KeySize::Aes256 => Aes256Gcm::new_from_slice(key)
                .map_err(|_| QscError::KeyLength(key.len()))?
                .encrypt(nonce, plaintext),
        };
        sealed.map_err(|_| QscError::CipherFormat("plaintext exceeds AES-GCM limits".into()))
    }

    fn gcm_decrypt(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < GCM_TAG_LEN {
            return Err(QscError::CipherFormat("ciphertext shorter than tag".into()));
        }
        let nonce = Nonce::from_slice(nonce);
        let key = self.key.as_slice();
        let opened = match self.size {
            KeySize::Aes128 => Aes128Gcm::new_from_slice(key)
                .map_err(|_| QscError::KeyLength(key.len()))?
                .decrypt(nonce, ciphertext),
            KeySize::Aes192 => Aes192Gcm::new_from_slice(key)
                .map_err(|_| QscError::KeyLength(key.len()))?
                .decrypt(nonce, ciphertext),
            KeySize::Aes256 => Aes256Gcm::new_from_slice(key)
                .map_err(|_| QscError::KeyLength(key.len()))?
                .decrypt(nonce, ciphertext),
        };
        opened.map_err(|_| QscError::CipherFormat("authentication failed".into()))
    }

    fn cbc_encrypt(&self, iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let key = self.key.as_slice();
        let sealed = match self.size {
            KeySize::Aes128 => cbc::Encryptor::<Aes128>::new_from_slices(key, iv)
                .map(|c| c.encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
            KeySize::Aes192 => cbc::Encryptor::<Aes192>::new_from_slices(key, iv)
                .map(|c| c.encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
            KeySize::Aes256 => cbc::Encryptor::<Aes256>::new_from_slices(key, iv)
                .map(|c| c.encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
        };
        sealed.map_err(|_| QscError::KeyLength(key.len()))
    }

    fn cbc_decrypt(&self, iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
            return Err(QscError::CipherFormat(format!(
                "ciphertext length {} is not a positive multiple of {BLOCK_LEN}",
                ciphertext.len()
            )));
        }
        let key = self.key.as_slice();
        let opened = match self.size {
            KeySize::Aes128 => cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
                .map(|c| c.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)),
            KeySize::Aes192 => cbc::Decryptor::<Aes192>::new_from_slices(key, iv)
                .map(|c| c.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)),
            KeySize::Aes256 => cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
                .map(|c| c.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)),
        };
        opened
            .map_err(|_| QscError::KeyLength(key.len()))?
            .map_err(|_| QscError::Padding)
    }
}

// ---------------------------------------------------------------------------
// Rotation
// ---------------------------------------------------------------------------

/// Shared reference to the current channel; rotation swaps it atomically.
#[derive(Debug)]
pub struct ChannelHandle {
    current: RwLock<Arc<SymmetricChannel>>,
}

impl ChannelHandle {
    pub fn new(channel: SymmetricChannel) -> Self {
        Self {
            current: RwLock::new(Arc::new(channel)),
        }
    }

    /// The channel in force right now.  In-flight users keep their `Arc`
    /// even if a rotation happens meanwhile.
    pub fn current(&self) -> Arc<SymmetricChannel> {
        Arc::clone(&self.current.read())
    }

    /// Install `next` and return the channel it replaced.
    pub fn rotate(&self, next: SymmetricChannel) -> Arc<SymmetricChannel> {
        std::mem::replace(&mut *self.current.write(), Arc::new(next))
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const MESSAGE: &str = "This is a secret message for AES.";

    fn key(len: usize) -> Vec<u8> {
        (0..len as u8).collect()
    }

    #[test]
    fn aes256_round_trip_both_modes() {
        for mode in [ChannelMode::Authenticated, ChannelMode::LegacyCbc] {
            let ch = SymmetricChannel::with_mode(&key(32), mode).unwrap();
            let wire = ch.encrypt(MESSAGE.as_bytes()).unwrap();
            let pt = ch.decrypt(&wire).unwrap();
            assert_eq!(String::from_utf8(pt).unwrap(), MESSAGE);
        }
    }

    #[test]
    fn all_key_sizes_accepted() {
        for len in [16, 24, 32] {
            for mode in [ChannelMode::Authenticated, ChannelMode::LegacyCbc] {
                let ch = SymmetricChannel::with_mode(&key(len), mode).unwrap();
                assert_eq!(ch.key_bits(), len * 8);
                let wire = ch.encrypt(b"").unwrap();
                assert!(ch.decrypt(&wire).unwrap().is_empty());
            }
        }
    }

    #[test]
    fn bad_key_length_rejected() {
        for len in [0, 15, 17, 31, 64] {
            let err = SymmetricChannel::new(&vec![0u8; len]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::KeyLengthError);
        }
    }

    #[test]
    fn fresh_iv_per_message() {
        let ch = SymmetricChannel::new(&key(32)).unwrap();
        let a = ch.encrypt(MESSAGE.as_bytes()).unwrap();
        let b = ch.encrypt(MESSAGE.as_bytes()).unwrap();
        assert_ne!(a, b);
        let pa = WireCiphertext::parse(&a).unwrap();
        let pb = WireCiphertext::parse(&b).unwrap();
        assert_ne!(pa.iv, pb.iv);
    }

    #[test]
    fn wire_shape() {
        let ch = SymmetricChannel::legacy_cbc(&key(16)).unwrap();
        let parts = ch.encrypt_parts(MESSAGE.as_bytes()).unwrap();
        assert_eq!(parts.iv.len(), CBC_IV_LEN);
        // 33 bytes of plaintext pad to three blocks.
        assert_eq!(parts.ciphertext.len(), 48);
        let wire = parts.encode();
        assert_eq!(wire.matches(':').count(), 1);
        assert_eq!(WireCiphertext::parse(&wire).unwrap(), parts);

        let gcm = SymmetricChannel::new(&key(16)).unwrap();
        let parts = gcm.encrypt_parts(MESSAGE.as_bytes()).unwrap();
        assert_eq!(parts.iv.len(), GCM_NONCE_LEN);
        assert_eq!(parts.ciphertext.len(), MESSAGE.len() + GCM_TAG_LEN);
    }

    #[test]
    fn framed_form_matches_string_form() {
        let ch = SymmetricChannel::new(&key(32)).unwrap();
        let parts = ch.encrypt_parts(b"framed").unwrap();
        let framed = parts.to_framed();
        assert_eq!(&framed[..2], &[0, GCM_NONCE_LEN as u8]);
        let back = WireCiphertext::from_framed(&framed).unwrap();
        assert_eq!(ch.decrypt_parts(&back).unwrap(), b"framed");
        assert!(WireCiphertext::from_framed(&[0]).is_err());
        assert!(WireCiphertext::from_framed(&[0, 12, 1, 2]).is_err());
    }

    #[test]
    fn malformed_wire_values() {
        let ch = SymmetricChannel::new(&key(32)).unwrap();
        for bad in ["", "no-separator", ":abc", "abc:", "!!!:AAAA", "AAAA:%%%%"] {
            let err = ch.decrypt(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::CipherFormatError, "input {bad:?}");
        }
        // Wrong IV length for the mode.
        let wire = format!("{}:{}", util::b64_encode(&[0u8; 16]), util::b64_encode(&[0u8; 32]));
        assert_eq!(ch.decrypt(&wire).unwrap_err().kind(), ErrorKind::CipherFormatError);
    }

    #[test]
    fn tampered_gcm_ciphertext_rejected() {
        let ch = SymmetricChannel::new(&key(32)).unwrap();
        let mut parts = ch.encrypt_parts(MESSAGE.as_bytes()).unwrap();
        parts.ciphertext[0] ^= 0x01;
        let err = ch.decrypt_parts(&parts).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CipherFormatError);
    }

    #[test]
    fn cbc_bad_padding_reported() {
        let ch = SymmetricChannel::legacy_cbc(&key(32)).unwrap();
        // Encrypt a full block of 0x00 with no padding so the last byte
        // decrypts to 0x00, which PKCS#7 never produces.
        let iv = [7u8; CBC_IV_LEN];
        let raw = cbc::Encryptor::<Aes256>::new_from_slices(&key(32), &iv)
            .unwrap()
            .encrypt_padded_vec_mut::<cbc::cipher::block_padding::NoPadding>(&[0u8; 16]);
        let parts = WireCiphertext {
            iv: iv.to_vec(),
            ciphertext: raw,
        };
        let err = ch.decrypt_parts(&parts).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PaddingError);

        let truncated = WireCiphertext {
            iv: iv.to_vec(),
            ciphertext: vec![0u8; 15],
        };
        assert_eq!(
            ch.decrypt_parts(&truncated).unwrap_err().kind(),
            ErrorKind::CipherFormatError
        );
    }

    #[test]
    fn wrong_key_cannot_decrypt() {
        let a = SymmetricChannel::new(&key(32)).unwrap();
        let b = SymmetricChannel::new(&[9u8; 32]).unwrap();
        let wire = a.encrypt(MESSAGE.as_bytes()).unwrap();
        assert!(b.decrypt(&wire).is_err());
    }

    #[test]
    fn rotation_swaps_channel() {
        let handle = ChannelHandle::new(SymmetricChannel::new(&key(32)).unwrap());
        let old = handle.current();
        let wire = old.encrypt(b"before").unwrap();

        let previous = handle.rotate(SymmetricChannel::new(&[3u8; 32]).unwrap());
        assert!(Arc::ptr_eq(&previous, &old));
        let now = handle.current();
        assert!(!Arc::ptr_eq(&now, &old));
        assert!(now.decrypt(&wire).is_err());
        // The retired channel still serves in-flight readers.
        assert_eq!(old.decrypt(&wire).unwrap(), b"before");
    }

    #[test]
    fn channel_is_shareable_across_threads() {
        let ch = Arc::new(SymmetricChannel::new(&key(32)).unwrap());
        std::thread::scope(|s| {
            for i in 0..4u8 {
                let ch = Arc::clone(&ch);
                s.spawn(move || {
                    let wire = ch.encrypt(&[i; 8]).unwrap();
                    assert_eq!(ch.decrypt(&wire).unwrap(), vec![i; 8]);
                });
            }
        });
    }

    #[test]
    fn debug_hides_key() {
        let ch = SymmetricChannel::new(&[0xAB; 32]).unwrap();
        let dbg = format!("{ch:?}");
        assert!(!dbg.contains("171"));
        assert!(dbg.contains("key_bits"));
    }
}
