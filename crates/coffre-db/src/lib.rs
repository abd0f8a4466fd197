//! `coffre-db` — the Coffre database engine.
//!
//! Loads, decrypts, verifies, mutates, and re-encrypts a single
//! container file holding a tree of credential entries in nested
//! groups. Cryptographic primitives live in `coffre-crypto-core`; this
//! crate owns the container codec, the tree model, and the service that
//! ties the pipeline together.
//!
//! The embedding application talks to [`Database`]: `open`, the
//! mutation operations, `search`, `save`, `close`. One handle is one
//! open container with a single logical writer; long stages accept a
//! [`CancelToken`] so interactive front ends can abort them.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::arithmetic_side_effects))]

pub mod cancel;
pub mod config;
pub mod database;
pub mod error;
pub mod format;
pub mod model;
pub mod search;
pub mod tree;

pub use cancel::CancelToken;
pub use config::{
    Compression, DatabaseConfig, DeletePolicy, MemoryProtection, DEFAULT_HISTORY_MAX_ITEMS,
};
pub use database::{Database, DatabaseState};
pub use error::DatabaseError;
pub use model::{
    Attachment, Entry, EntryView, Field, FieldValue, Group, GroupView, ProtectedValue, Times,
    FIELD_NOTES, FIELD_PASSWORD, FIELD_TITLE, FIELD_URL, FIELD_USERNAME,
};
pub use tree::{DatabaseTree, Node, TreeWalk, RECYCLE_BIN_NAME};

pub use coffre_crypto_core::cipher::CipherKind;
pub use coffre_crypto_core::kdf::KdfParams;
pub use coffre_crypto_core::keys::CompositeKey;
