//! Crypto binding: per-identity key/IV derivation and AES-128-CBC.
//!
//! See [`binding`] for the derivation rules and their (deliberately
//! reproduced) weaknesses.

pub mod binding;

pub use binding::{
    decrypt, derive_iv, derive_key, encrypt, DecryptionError, IdentityCipher, BLOCK_SIZE,
};
