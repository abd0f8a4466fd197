//! Key stretching — Argon2id and the legacy iterated-hash function.
//!
//! This module provides:
//! - [`KdfParams`] — closed parameter set, one variant per supported KDF,
//!   persisted in the container header so later opens reproduce the key
//! - [`transform`] — stretch a composite credential into a 256-bit key
//!
//! Current containers default to Argon2id (memory-hard). Legacy
//! containers use PBKDF2-HMAC-SHA256 (iterated hash); the engine keeps
//! deriving with whatever the header declares, so old files open
//! unchanged.

use crate::error::CryptoError;
use crate::memory::SecretBytes;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Output length of every KDF in bytes (256 bits).
pub const OUTPUT_LEN: usize = 32;

/// Minimum salt length in bytes. Stricter than what the underlying
/// crates accept.
pub const MIN_SALT_LEN: usize = 16;

/// Wire id for PBKDF2-HMAC-SHA256 (legacy containers).
pub const KDF_ID_PBKDF2_SHA256: u8 = 1;

/// Wire id for Argon2id (current containers).
pub const KDF_ID_ARGON2ID: u8 = 2;

/// Default Argon2id cost: 64 MiB, 3 passes, 4 lanes.
const ARGON2ID_DEFAULT_M_COST: u32 = 65_536;
const ARGON2ID_DEFAULT_T_COST: u32 = 3;
const ARGON2ID_DEFAULT_P_COST: u32 = 4;

/// Default PBKDF2 rounds for newly written legacy-format containers.
const PBKDF2_DEFAULT_ROUNDS: u32 = 600_000;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// KDF selection plus cost parameters — stored in the container header.
///
/// A closed set: the codec maps wire ids to variants and rejects ids it
/// does not know, so a file can never make the engine run an
/// unrecognized derivation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KdfParams {
    /// Argon2id — memory-hard, the default for current containers.
    ///
    /// Field convention follows the `argon2` crate: `m_cost` in KiB,
    /// `t_cost` iterations, `p_cost` lanes.
    Argon2id {
        /// Memory cost in kibibytes.
        m_cost: u32,
        /// Number of passes.
        t_cost: u32,
        /// Degree of parallelism.
        p_cost: u32,
    },
    /// PBKDF2-HMAC-SHA256 — iterated hash, read and written for legacy
    /// containers.
    Pbkdf2Sha256 {
        /// Iteration count.
        rounds: u32,
    },
}

impl KdfParams {
    /// Default parameters for a newly created current-format container.
    #[must_use]
    pub const fn default_argon2id() -> Self {
        Self::Argon2id {
            m_cost: ARGON2ID_DEFAULT_M_COST,
            t_cost: ARGON2ID_DEFAULT_T_COST,
            p_cost: ARGON2ID_DEFAULT_P_COST,
        }
    }

    /// Default parameters when a legacy container is written.
    #[must_use]
    pub const fn default_pbkdf2() -> Self {
        Self::Pbkdf2Sha256 {
            rounds: PBKDF2_DEFAULT_ROUNDS,
        }
    }

    /// Stable wire id persisted in container headers.
    #[must_use]
    pub const fn wire_id(&self) -> u8 {
        match self {
            Self::Pbkdf2Sha256 { .. } => KDF_ID_PBKDF2_SHA256,
            Self::Argon2id { .. } => KDF_ID_ARGON2ID,
        }
    }
}

// ---------------------------------------------------------------------------
// Derivation
// ---------------------------------------------------------------------------

/// Stretch `secret` into a 256-bit key using the declared KDF.
///
/// Deterministic for identical inputs; cost is bounded by `params`.
/// Interactive callers run this off their UI thread — a single
/// invocation is not interruptible, cancellation happens at the stage
/// boundaries around it.
///
/// # Errors
///
/// Returns [`CryptoError::KeyDerivation`] if:
/// - the salt is shorter than [`MIN_SALT_LEN`] bytes
/// - the cost parameters are rejected by the underlying crate
/// - the derivation itself fails (e.g. memory allocation)
pub fn transform(
    secret: &[u8],
    salt: &[u8],
    params: &KdfParams,
) -> Result<SecretBytes<OUTPUT_LEN>, CryptoError> {
    if salt.len() < MIN_SALT_LEN {
        return Err(CryptoError::KeyDerivation(format!(
            "salt too short: {} bytes (minimum {MIN_SALT_LEN})",
            salt.len()
        )));
    }

    let mut output = [0u8; OUTPUT_LEN];
    match *params {
        KdfParams::Argon2id {
            m_cost,
            t_cost,
            p_cost,
        } => {
            let argon2_params = argon2::Params::new(m_cost, t_cost, p_cost, Some(OUTPUT_LEN))
                .map_err(|e| {
                    CryptoError::KeyDerivation(format!("invalid argon2 params: {e}"))
                })?;
            let argon2 = argon2::Argon2::new(
                argon2::Algorithm::Argon2id,
                argon2::Version::V0x13,
                argon2_params,
            );
            argon2.hash_password_into(secret, salt, &mut output).map_err(|e| {
                CryptoError::KeyDerivation(format!("argon2id derivation failed: {e}"))
            })?;
        }
        KdfParams::Pbkdf2Sha256 { rounds } => {
            if rounds == 0 {
                return Err(CryptoError::KeyDerivation(
                    "pbkdf2 rounds must be at least 1".into(),
                ));
            }
            pbkdf2::pbkdf2_hmac::<sha2::Sha256>(secret, salt, rounds, &mut output);
        }
    }

    let result = SecretBytes::new(output);
    output.zeroize();
    Ok(result)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
