//! Identity-bound symmetric encryption.
//!
//! Both ends of a connection derive the same AES-128 key and IV from nothing
//! but the participant identity, which is what lets the handshake run without
//! a key exchange:
//!
//! ```text
//! key = ascii( hex( SHA-256(identity) )[0..16] )      16 bytes
//! iv  = utf8( identity ) truncated/right-padded with b'0' to 16 bytes
//! ciphertext text = base64( AES-128-CBC-PKCS#7(key, iv, utf8(plaintext)) )
//! ```
//!
//! # Security
//!
//! This is **not** a confidentiality mechanism.  Anyone who knows an identity
//! can derive its key, and the IV is fixed per identity, so identical
//! plaintexts produce identical ciphertexts.
//!
//! # Compatibility
//!
//! Rollcall peers interoperate with each other only.  The Android classroom
//! app keys AES-256 from the first 32 hex characters of the same digest, so
//! its ciphertexts do not decrypt here and ours do not decrypt there.

use aes::Aes128;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::domain::identity::Identity;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// AES block size, and the length of both key and IV.
pub const BLOCK_SIZE: usize = 16;

/// Filler byte used to right-pad short identities into an IV.
pub const IV_FILLER: u8 = b'0';

/// Errors produced when a ciphertext cannot be turned back into text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecryptionError {
    /// The ciphertext text is not valid base64.
    #[error("ciphertext is not valid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    /// The decrypted block did not end in valid PKCS#7 padding, which
    /// usually means the wrong key or a truncated ciphertext.
    #[error("ciphertext padding is invalid")]
    BadPadding,

    /// The plaintext bytes are not UTF-8.
    #[error("decrypted bytes are not UTF-8")]
    InvalidUtf8,
}

/// Derives the 16-byte AES key for `identity`.
pub fn derive_key(identity: &Identity) -> [u8; BLOCK_SIZE] {
    let digest = Sha256::digest(identity.as_str().as_bytes());
    let hex_digest = hex::encode(digest);
    let mut key = [0u8; BLOCK_SIZE];
    key.copy_from_slice(&hex_digest.as_bytes()[..BLOCK_SIZE]);
    key
}

/// Derives the 16-byte IV for `identity`.
///
/// Works on UTF-8 bytes: identities longer than 16 bytes are truncated,
/// shorter ones are padded with [`IV_FILLER`].
pub fn derive_iv(identity: &Identity) -> [u8; BLOCK_SIZE] {
    let mut iv = [IV_FILLER; BLOCK_SIZE];
    let bytes = identity.as_str().as_bytes();
    let n = bytes.len().min(BLOCK_SIZE);
    iv[..n].copy_from_slice(&bytes[..n]);
    iv
}

/// Key material for one identity.
///
/// A plain value: no process-wide state, cheap to construct per message.
#[derive(Clone, PartialEq, Eq)]
pub struct IdentityCipher {
    key: [u8; BLOCK_SIZE],
    iv: [u8; BLOCK_SIZE],
}

impl IdentityCipher {
    /// Derives the key and IV for `identity`.
    pub fn for_identity(identity: &Identity) -> Self {
        Self {
            key: derive_key(identity),
            iv: derive_iv(identity),
        }
    }

    /// Encrypts `plaintext` and returns base64 text.
    pub fn encrypt(&self, plaintext: &str) -> String {
        let ciphertext = Aes128CbcEnc::new(&self.key.into(), &self.iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
        BASE64.encode(ciphertext)
    }

    /// Decrypts base64 text produced by [`encrypt`](Self::encrypt).
    ///
    /// # Errors
    ///
    /// Returns a [`DecryptionError`] on bad base64, bad padding, or non-UTF-8
    /// plaintext.  Never panics on hostile input.
    pub fn decrypt(&self, ciphertext: &str) -> Result<String, DecryptionError> {
        let bytes = BASE64.decode(ciphertext.trim())?;
        let plaintext = Aes128CbcDec::new(&self.key.into(), &self.iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&bytes)
            .map_err(|_| DecryptionError::BadPadding)?;
        String::from_utf8(plaintext).map_err(|_| DecryptionError::InvalidUtf8)
    }
}

// Key material stays out of logs.
impl std::fmt::Debug for IdentityCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityCipher").finish_non_exhaustive()
    }
}

/// Encrypts `plaintext` under the key bound to `identity`.
pub fn encrypt(plaintext: &str, identity: &Identity) -> String {
    IdentityCipher::for_identity(identity).encrypt(plaintext)
}

/// Decrypts `ciphertext` under the key bound to `identity`.
///
/// # Errors
///
/// See [`IdentityCipher::decrypt`].
pub fn decrypt(ciphertext: &str, identity: &Identity) -> Result<String, DecryptionError> {
    IdentityCipher::for_identity(identity).decrypt(ciphertext)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
