//! Engine configuration — algorithm choices and tree policies.
//!
//! A [`DatabaseConfig`] travels with an open database: on open it is
//! reconstructed from the container header, on save it decides what the
//! writer emits. No environment variables, no global state — embedders
//! pass configuration explicitly.

use coffre_crypto_core::cipher::CipherKind;
use coffre_crypto_core::kdf::KdfParams;
use serde::{Deserialize, Serialize};

/// Default bound on per-entry history snapshots.
pub const DEFAULT_HISTORY_MAX_ITEMS: usize = 10;

/// Body compression applied before encryption.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    /// Store the record stream as-is.
    None,
    /// gzip the record stream (default — credential trees compress well).
    #[default]
    Gzip,
}

impl Compression {
    /// Stable wire flag persisted in container headers.
    #[must_use]
    pub const fn wire_id(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Gzip => 1,
        }
    }

    /// Resolve a wire flag read from a header.
    #[must_use]
    pub const fn from_wire_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::None),
            1 => Some(Self::Gzip),
            _ => None,
        }
    }
}

/// What deleting a group or entry does.
///
/// The original ecosystem's behavior here is version-dependent, so the
/// engine treats it as policy instead of hard-coding one semantic.
/// Nodes already inside the recycle bin are always removed for real.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletePolicy {
    /// Move the node (and its subtree) into a lazily created recycle
    /// bin group under the root.
    #[default]
    Recycle,
    /// Remove the node and its subtree immediately.
    Hard,
}

/// Which standard fields are held as protected values in memory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryProtection {
    /// Protect the `Title` field.
    pub title: bool,
    /// Protect the `UserName` field.
    pub username: bool,
    /// Protect the `Password` field.
    pub password: bool,
    /// Protect the `URL` field.
    pub url: bool,
    /// Protect the `Notes` field.
    pub notes: bool,
}

impl Default for MemoryProtection {
    fn default() -> Self {
        Self {
            title: false,
            username: false,
            password: true,
            url: false,
            notes: false,
        }
    }
}

impl MemoryProtection {
    /// Build a field honoring this policy: protected storage for keys
    /// the policy covers, plain storage otherwise.
    #[must_use]
    pub fn field(&self, key: &str, value: &str) -> crate::model::Field {
        if self.protects(key) {
            crate::model::Field::protected(key, value)
        } else {
            crate::model::Field::plain(key, value)
        }
    }

    /// Whether a standard field key defaults to protected storage.
    #[must_use]
    pub fn protects(&self, key: &str) -> bool {
        match key {
            crate::model::FIELD_TITLE => self.title,
            crate::model::FIELD_USERNAME => self.username,
            crate::model::FIELD_PASSWORD => self.password,
            crate::model::FIELD_URL => self.url,
            crate::model::FIELD_NOTES => self.notes,
            _ => false,
        }
    }
}

/// Everything an open database needs to know besides its tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Cipher for the container body.
    pub cipher: CipherKind,
    /// Key derivation function and cost parameters.
    pub kdf: KdfParams,
    /// Body compression.
    pub compression: Compression,
    /// Delete semantics for groups and entries.
    pub delete_policy: DeletePolicy,
    /// Upper bound on history snapshots kept per entry (0 disables
    /// history).
    pub history_max_items: usize,
    /// Default protection for standard fields.
    pub memory_protection: MemoryProtection,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            cipher: CipherKind::Aes256Gcm,
            kdf: KdfParams::default_argon2id(),
            compression: Compression::default(),
            delete_policy: DeletePolicy::default(),
            history_max_items: DEFAULT_HISTORY_MAX_ITEMS,
            memory_protection: MemoryProtection::default(),
        }
    }
}
