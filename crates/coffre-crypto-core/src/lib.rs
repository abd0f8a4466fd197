//! `coffre-crypto-core` — Pure cryptographic primitives for Coffre.
//!
//! This crate is the audit target: zero I/O, zero async, zero logging.
//! The container codec and database service live in `coffre-db`; this
//! crate only turns credentials into keys and bytes into bytes.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::arithmetic_side_effects))]

pub mod cipher;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod memory;

pub use cipher::{
    decrypt, encrypt, encrypt_with_iv, CipherKind, AEAD_NONCE_LEN, CBC_IV_LEN, KEY_LEN, TAG_LEN,
};
pub use error::CryptoError;
pub use kdf::{transform, KdfParams, KDF_ID_ARGON2ID, KDF_ID_PBKDF2_SHA256, MIN_SALT_LEN};
pub use keys::{key_file_key, master_key, CompositeKey, COMPOSITE_LEN, MASTER_SEED_LEN};
pub use memory::{disable_core_dumps, PageLock, SecretBuffer, SecretBytes};
