//! The authenticated field cipher used to protect persisted secrets and
//! vault bodies.
//!
//! ## Design
//!
//! * AES-256-GCM with a random 16-byte IV sampled per encryption, so two
//!   encryptions of the same plaintext never produce the same ciphertext.
//! * The serialized form is three base64 segments joined by `:`:
//!   `base64(iv) ':' base64(tag) ':' base64(ct)`.
//! * Decryption authenticates before releasing any plaintext; a tag mismatch,
//!   a tampered IV, and a truncated payload all surface as [`DecryptError`].
//! * Key rotation is out of scope; construction fails loudly when the key is
//!   absent or of the wrong length.
//!
//! We use the RustCrypto `aes` + `aes-gcm` stack rather than `ring`'s AEAD:
//! `ring` fixes GCM nonces at 96 bits, while this format carries a 128-bit IV.

use std::fmt;

use aes::{cipher::consts::U16, Aes256};
use aes_gcm::{
    aead::{Aead, Payload},
    AesGcm, KeyInit, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use thiserror::Error;

use crate::rng::{Crng, RngExt};

/// Serialized IV length in bytes.
pub const IV_LEN: usize = 16;
/// AES-256-GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;
/// Key length in bytes.
pub const KEY_LEN: usize = 32;

/// AES-256-GCM parameterized with our 16-byte IV.
type FieldAesGcm = AesGcm<Aes256, U16>;

/// Errors constructing a [`FieldCipher`].
#[derive(Clone, Debug, Error)]
pub enum KeyError {
    #[error("field cipher key must be exactly {KEY_LEN} bytes")]
    WrongLength,
    #[error("field cipher key is not valid base64")]
    BadEncoding,
}

/// Errors decrypting a serialized field.
///
/// [`DecryptError::Auth`] is the distinguishable authentication failure: the
/// payload parsed but GCM rejected it (tag mismatch, tampered IV or
/// ciphertext). Re-encryption is never attempted; callers surface this.
#[derive(Clone, Debug, Error)]
pub enum DecryptError {
    #[error("ciphertext is malformed: {0}")]
    Malformed(&'static str),
    #[error("authentication failed: ciphertext or iv may be corrupted")]
    Auth,
}

/// AES-256-GCM authenticated encryption with a per-record random IV.
#[derive(Clone)]
pub struct FieldCipher {
    cipher: FieldAesGcm,
}

impl fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FieldCipher(..)")
    }
}

impl FieldCipher {
    /// Build a cipher from a raw 32-byte key.
    pub fn new(key: &[u8]) -> Result<Self, KeyError> {
        let cipher = FieldAesGcm::new_from_slice(key)
            .map_err(|_| KeyError::WrongLength)?;
        Ok(Self { cipher })
    }

    /// Build a cipher from the base64 key representation used in config.
    pub fn from_base64(key_b64: &str) -> Result<Self, KeyError> {
        let key = BASE64
            .decode(key_b64.trim())
            .map_err(|_| KeyError::BadEncoding)?;
        Self::new(&key)
    }

    /// Encrypt `plaintext`, returning the `iv:tag:ct` serialized form.
    pub fn encrypt<R: Crng>(&self, rng: &mut R, plaintext: &[u8]) -> String {
        let iv: [u8; IV_LEN] = rng.gen_bytes();
        let nonce = Nonce::<U16>::from_slice(&iv);

        // aes-gcm appends the 16-byte tag to the ciphertext.
        let mut ct_and_tag = self
            .cipher
            .encrypt(nonce, Payload::from(plaintext))
            .expect("Cannot encrypt more than ~64 GiB at once");
        let tag = ct_and_tag.split_off(ct_and_tag.len() - TAG_LEN);
        let ct = ct_and_tag;

        format!(
            "{}:{}:{}",
            BASE64.encode(iv),
            BASE64.encode(tag),
            BASE64.encode(ct),
        )
    }

    /// Decrypt an `iv:tag:ct` serialized field.
    pub fn decrypt(&self, serialized: &str) -> Result<Vec<u8>, DecryptError> {
        let mut segments = serialized.split(':');
        let (iv_b64, tag_b64, ct_b64) =
            match (segments.next(), segments.next(), segments.next()) {
                (Some(iv), Some(tag), Some(ct)) if segments.next().is_none() =>
                    (iv, tag, ct),
                _ => return Err(DecryptError::Malformed(
                    "expected exactly three ':'-separated segments",
                )),
            };

        let iv = BASE64
            .decode(iv_b64)
            .map_err(|_| DecryptError::Malformed("iv is not valid base64"))?;
        let tag = BASE64
            .decode(tag_b64)
            .map_err(|_| DecryptError::Malformed("tag is not valid base64"))?;
        let ct = BASE64
            .decode(ct_b64)
            .map_err(|_| DecryptError::Malformed("ct is not valid base64"))?;

        if iv.len() != IV_LEN {
            return Err(DecryptError::Auth);
        }
        if tag.len() != TAG_LEN {
            return Err(DecryptError::Auth);
        }

        let nonce = Nonce::<U16>::from_slice(&iv);
        let mut ct_and_tag = ct;
        ct_and_tag.extend_from_slice(&tag);

        self.cipher
            .decrypt(nonce, Payload::from(ct_and_tag.as_slice()))
            .map_err(|_| DecryptError::Auth)
    }
}
