//! Credential combination and the master key schedule.
//!
//! This module provides:
//! - [`CompositeKey`] — passphrase and/or key file collapsed into one
//!   256-bit secret, the input to [`crate::kdf::transform`]
//! - [`key_file_key`] — key-file interpretation rules
//! - [`master_key`] — final seed mixing before the cipher layer
//!
//! # Key schedule
//!
//! ```text
//! composite   = SHA-256( SHA-256(passphrase) || key_file_key )
//! transformed = KDF(composite, kdf_salt, params)        — kdf module
//! master      = SHA-256( master_seed || transformed )
//! ```
//!
//! Components are optional and an empty composite (no passphrase, no key
//! file) is legal — the database is then protected by the seed alone,
//! which callers should treat as "no credentials set". The per-container
//! `master_seed` is regenerated on every save, so two containers (or two
//! saves) with identical credentials never share a cipher key.

use crate::error::CryptoError;
use crate::memory::SecretBytes;
use data_encoding::HEXLOWER_PERMISSIVE;
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroize;

/// Length of the composite secret and the master key (256 bits).
pub const COMPOSITE_LEN: usize = 32;

/// Length of the per-container random master seed.
pub const MASTER_SEED_LEN: usize = 32;

// ---------------------------------------------------------------------------
// CompositeKey
// ---------------------------------------------------------------------------

/// The user's combined credentials, hashed down to 256 bits.
///
/// Construction consumes nothing the caller owns; the caller should
/// zeroize its own passphrase/key-file buffers afterwards. The secret is
/// page-locked and zeroed on drop, and all formatting is masked.
pub struct CompositeKey {
    secret: SecretBytes<COMPOSITE_LEN>,
}

impl CompositeKey {
    /// Combine zero or more credential components.
    ///
    /// Each present component is hashed on its own, then the
    /// concatenated hashes are hashed again — so `("abc", None)` and
    /// `(None, "abc")` produce different composites.
    #[must_use]
    pub fn new(passphrase: Option<&[u8]>, key_file: Option<&[u8]>) -> Self {
        let mut outer = Sha256::new();

        if let Some(pw) = passphrase {
            let mut pw_hash: [u8; 32] = Sha256::digest(pw).into();
            outer.update(pw_hash);
            pw_hash.zeroize();
        }
        if let Some(contents) = key_file {
            let mut kf_key = key_file_key(contents);
            outer.update(kf_key);
            kf_key.zeroize();
        }

        let mut digest: [u8; COMPOSITE_LEN] = outer.finalize().into();
        let secret = SecretBytes::new(digest);
        digest.zeroize();
        Self { secret }
    }

    /// Passphrase-only convenience constructor.
    #[must_use]
    pub fn from_passphrase(passphrase: &[u8]) -> Self {
        Self::new(Some(passphrase), None)
    }

    /// Expose the composite secret for key derivation.
    #[must_use]
    pub const fn expose(&self) -> &[u8; COMPOSITE_LEN] {
        self.secret.expose()
    }

    /// Duplicate into a new locked allocation (the service retains a
    /// copy so `save` can re-derive under a fresh seed).
    #[must_use]
    pub fn duplicate(&self) -> Self {
        Self {
            secret: self.secret.duplicate(),
        }
    }
}

impl fmt::Debug for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CompositeKey(***)")
    }
}

// ---------------------------------------------------------------------------
// Key files
// ---------------------------------------------------------------------------

/// Interpret key-file contents as a 256-bit key component.
///
/// Rules, in order:
/// 1. exactly 32 bytes — used as the key verbatim
/// 2. exactly 64 bytes of hex digits (either case) — decoded
/// 3. anything else — SHA-256 of the whole contents
#[must_use]
pub fn key_file_key(contents: &[u8]) -> [u8; 32] {
    if contents.len() == 32 {
        let mut key = [0u8; 32];
        key.copy_from_slice(contents);
        return key;
    }

    if contents.len() == 64 {
        if let Ok(decoded) = HEXLOWER_PERMISSIVE.decode(contents) {
            if decoded.len() == 32 {
                let mut key = [0u8; 32];
                key.copy_from_slice(&decoded);
                return key;
            }
        }
    }

    Sha256::digest(contents).into()
}

// ---------------------------------------------------------------------------
// Master key
// ---------------------------------------------------------------------------

/// Mix the per-container random seed into the transformed key.
///
/// `master = SHA-256(seed || transformed)`. The seed is regenerated on
/// every save, so the cipher key rotates even when credentials and KDF
/// parameters stay fixed.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKeyMaterial`] if the seed is not
/// [`MASTER_SEED_LEN`] bytes.
pub fn master_key(
    seed: &[u8],
    transformed: &SecretBytes<32>,
) -> Result<SecretBytes<32>, CryptoError> {
    if seed.len() != MASTER_SEED_LEN {
        return Err(CryptoError::InvalidKeyMaterial(format!(
            "invalid master seed length: {} bytes (expected {MASTER_SEED_LEN})",
            seed.len()
        )));
    }

    let mut hasher = Sha256::new();
    hasher.update(seed);
    hasher.update(transformed.expose());
    let mut digest: [u8; 32] = hasher.finalize().into();
    let master = SecretBytes::new(digest);
    digest.zeroize();
    Ok(master)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
