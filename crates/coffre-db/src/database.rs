//! The database service — open, mutate, save.
//!
//! One [`Database`] value is one open container. The pipeline runs
//! stages in a fixed order and never retries or masks a failure:
//!
//! ```text
//! open: read → decode header → derive keys → decrypt → verify →
//!       decompress → parse records → assemble tree
//! save: flatten tree → serialize records → compress → fresh header →
//!       derive keys → encrypt → temp file → fsync → atomic rename
//! ```
//!
//! Saves always write the current container version; the previous file
//! on disk stays valid and complete up to the final atomic rename.
//! Mutations take `&mut self`, so the borrow checker already rules out
//! a read racing a mutation on one handle — the engine adds no locking
//! of its own, matching its single-writer model.

use std::io::Write;
use std::path::{Path, PathBuf};

use coffre_crypto_core::cipher;
use coffre_crypto_core::kdf;
use coffre_crypto_core::keys::{self, CompositeKey};
use coffre_crypto_core::memory::SecretBytes;
use tracing::{debug, info};
use uuid::Uuid;
use zeroize::Zeroize;

use crate::cancel::CancelToken;
use crate::config::DatabaseConfig;
use crate::error::DatabaseError;
use crate::format::{self, body, integrity, Header, VERSION_CURRENT};
use crate::model::{Attachment, EntryView, Field, GroupView};
use crate::search;
use crate::tree::DatabaseTree;

/// Default display name for the root group of a new database.
const DEFAULT_ROOT_NAME: &str = "Root";

/// Lifecycle state of a database handle.
///
/// `Closed` and `Opening` from the conceptual state machine have no
/// value here: a closed database is a dropped handle, and opening
/// happens before a handle exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DatabaseState {
    /// Ready for reads, mutations, and saving.
    Open,
    /// A save is in flight (observable from other threads only through
    /// embedder-side sharing; the engine itself is single-writer).
    Saving,
    /// An unrecoverable internal error was detected; only `close`
    /// remains meaningful.
    Failed,
}

/// An open password database.
///
/// Holds the tree, the configuration, and a retained copy of the
/// composite key so saves can re-derive the cipher key under a fresh
/// seed. All key material zeroizes when the handle drops.
pub struct Database {
    state: DatabaseState,
    tree: DatabaseTree,
    config: DatabaseConfig,
    key: CompositeKey,
    path: Option<PathBuf>,
    dirty: bool,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Masked: the handle retains credentials.
        f.debug_struct("Database")
            .field("state", &self.state)
            .field("groups", &self.tree.group_count())
            .field("entries", &self.tree.entry_count())
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

impl Database {
    // -- lifecycle -----------------------------------------------------------

    /// Fresh empty database (root group only), not yet bound to a path.
    #[must_use]
    pub fn create(key: CompositeKey, config: DatabaseConfig) -> Self {
        Self {
            state: DatabaseState::Open,
            tree: DatabaseTree::new(DEFAULT_ROOT_NAME),
            config,
            key,
            path: None,
            dirty: true,
        }
    }

    /// Open a container file.
    ///
    /// Runs the full pipeline; any stage failure surfaces as its typed
    /// error and no handle is produced. Policy settings that are not
    /// part of the container (delete policy, history bound) start at
    /// their defaults — adjust via [`Database::set_config`] after
    /// opening.
    ///
    /// # Errors
    ///
    /// [`DatabaseError::Io`] for read failures, [`DatabaseError::Format`]
    /// / [`DatabaseError::UnsupportedVersion`] from the codec,
    /// [`DatabaseError::WrongKeyOrTampered`] from decrypt/verify,
    /// [`DatabaseError::CorruptTree`] from tree assembly, and
    /// [`DatabaseError::Cancelled`] at any checkpoint.
    pub fn open(
        path: impl AsRef<Path>,
        key: CompositeKey,
        cancel: &CancelToken,
    ) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        cancel.checkpoint()?;

        let data = std::fs::read(path)?;
        let decoded = format::decode_container(&data)?;
        let header = &decoded.header;
        debug!(
            version = header.version,
            cipher = ?header.cipher,
            compression = ?header.compression,
            "container header parsed"
        );

        cancel.checkpoint()?;
        let master = derive_master_key(&key, header, cancel)?;

        let aad: &[u8] = if header.version == VERSION_CURRENT {
            &decoded.prefix
        } else {
            &[]
        };
        let plaintext = cipher::decrypt(
            header.cipher,
            master.expose(),
            &header.iv,
            &decoded.body,
            aad,
        )?;
        debug!("body decrypted and authenticated");

        // Legacy containers verify through the embedded marker/checksum;
        // current containers were already authenticated by the AEAD tag.
        let content: &[u8] = match header.stream_start {
            Some(ref expected) => integrity::open(expected, plaintext.expose())?,
            None => plaintext.expose(),
        };

        cancel.checkpoint()?;
        let mut stream = body::decompress(content, header.compression)?;
        let parsed = body::read_body(&stream, header.version);
        stream.zeroize();
        let (groups, entries) = parsed?;
        let tree = DatabaseTree::assemble(groups, entries)?;

        info!(
            version = header.version,
            groups = tree.group_count(),
            entries = tree.entry_count(),
            "database opened"
        );

        let config = DatabaseConfig {
            cipher: if header.cipher.is_aead() {
                header.cipher
            } else {
                // Legacy CBC containers are upgraded to the current
                // cipher on their next save.
                DatabaseConfig::default().cipher
            },
            kdf: header.kdf.clone(),
            compression: header.compression,
            ..DatabaseConfig::default()
        };

        Ok(Self {
            state: DatabaseState::Open,
            tree,
            config,
            key,
            path: Some(path.to_path_buf()),
            dirty: false,
        })
    }

    /// Save to the bound path (atomic replace).
    ///
    /// # Errors
    ///
    /// [`DatabaseError::InvalidOperation`] when the database has never
    /// been bound to a path; otherwise as [`Database::save_to`].
    pub fn save(&mut self, cancel: &CancelToken) -> Result<(), DatabaseError> {
        let Some(path) = self.path.clone() else {
            return Err(DatabaseError::InvalidOperation(
                "database has no destination path; use save_to".into(),
            ));
        };
        self.save_to(path, cancel)
    }

    /// Save to `path` (atomic replace) and bind the handle to it.
    ///
    /// The container is written to a temporary file in the destination
    /// directory, synced, then renamed over the target — an interruption
    /// at any earlier point leaves the previous file untouched.
    ///
    /// # Errors
    ///
    /// [`DatabaseError::NotOpen`] unless the state is `Open`; otherwise
    /// codec/crypto/I/O errors from the pipeline and
    /// [`DatabaseError::Cancelled`] at any checkpoint.
    pub fn save_to(
        &mut self,
        path: impl AsRef<Path>,
        cancel: &CancelToken,
    ) -> Result<(), DatabaseError> {
        self.guard_open()?;
        // Reject a misconfigured cipher before touching any state: a
        // bad configuration is the caller's to fix, not a handle
        // failure.
        if !self.config.cipher.is_aead() {
            return Err(DatabaseError::Format(
                "current containers require an AEAD cipher".into(),
            ));
        }
        let path = path.as_ref();
        self.state = DatabaseState::Saving;

        let result = self.save_pipeline(path, cancel);
        match &result {
            Ok(()) => {
                self.state = DatabaseState::Open;
                self.path = Some(path.to_path_buf());
                self.dirty = false;
            }
            // Serialization failures mean the in-memory state cannot be
            // trusted any more; everything else leaves the handle usable
            // (and the on-disk file untouched).
            Err(DatabaseError::CorruptTree(_) | DatabaseError::Format(_)) => {
                self.state = DatabaseState::Failed;
            }
            Err(_) => self.state = DatabaseState::Open,
        }
        result
    }

    fn save_pipeline(&self, path: &Path, cancel: &CancelToken) -> Result<(), DatabaseError> {
        cancel.checkpoint()?;

        let mut stream = body::write_body(&self.tree, VERSION_CURRENT)?;
        let compressed = body::compress(&stream, self.config.compression);
        stream.zeroize();
        let mut compressed = compressed?;

        let header = Header::generate(&self.config, VERSION_CURRENT)?;
        cancel.checkpoint()?;
        let master = derive_master_key(&self.key, &header, cancel)?;

        let prefix = format::encode_prefix(&header)?;
        let encrypted = cipher::encrypt_with_iv(
            self.config.cipher,
            master.expose(),
            &header.iv,
            &compressed,
            &prefix,
        );
        compressed.zeroize();
        let encrypted = encrypted?;
        debug!(bytes = encrypted.len(), "body encrypted");

        cancel.checkpoint()?;
        let mut container = prefix;
        container.extend_from_slice(&encrypted);
        atomic_write(path, &container)?;

        info!(
            groups = self.tree.group_count(),
            entries = self.tree.entry_count(),
            "database saved"
        );
        Ok(())
    }

    /// Close the database. Dropping the handle is equivalent; the
    /// explicit form documents intent at call sites. Key material is
    /// zeroized either way.
    pub fn close(self) {
        drop(self);
    }

    // -- accessors -----------------------------------------------------------

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> DatabaseState {
        self.state
    }

    /// Whether unsaved mutations exist. Saving a clean database is
    /// legal — the flag is an optimization hint for embedders, never a
    /// correctness gate.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// The bound container path, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Engine configuration.
    #[must_use]
    pub const fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Replace the configuration (marks the database dirty — algorithm
    /// changes take effect on the next save).
    pub fn set_config(&mut self, config: DatabaseConfig) {
        self.config = config;
        self.dirty = true;
    }

    /// Identifier of the root group.
    #[must_use]
    pub const fn root_id(&self) -> Uuid {
        self.tree.root_id()
    }

    /// Identifier of the recycle bin, if one exists.
    #[must_use]
    pub const fn recycle_bin_id(&self) -> Option<Uuid> {
        self.tree.recycle_bin_id()
    }

    /// Direct access to the tree for read-only traversal.
    #[must_use]
    pub const fn tree(&self) -> &DatabaseTree {
        &self.tree
    }

    // -- reads ---------------------------------------------------------------

    /// Child groups and entries of `group`, in stored order.
    ///
    /// # Errors
    ///
    /// [`DatabaseError::GroupNotFound`] / [`DatabaseError::NotOpen`].
    pub fn list_children(
        &self,
        group: Uuid,
    ) -> Result<(Vec<GroupView>, Vec<EntryView>), DatabaseError> {
        self.guard_open()?;
        let parent = self
            .tree
            .group(group)
            .ok_or(DatabaseError::GroupNotFound(group))?;

        let groups = parent
            .groups
            .iter()
            .filter_map(|id| self.tree.group(*id))
            .map(GroupView::from)
            .collect();
        let entries = parent
            .entries
            .iter()
            .filter_map(|id| self.tree.entry(*id))
            .map(EntryView::from)
            .collect();
        Ok((groups, entries))
    }

    /// A single entry as a view (protected values stay protected).
    ///
    /// # Errors
    ///
    /// [`DatabaseError::EntryNotFound`] / [`DatabaseError::NotOpen`].
    pub fn get_entry(&self, id: Uuid) -> Result<EntryView, DatabaseError> {
        self.guard_open()?;
        self.tree
            .entry(id)
            .map(EntryView::from)
            .ok_or(DatabaseError::EntryNotFound(id))
    }

    /// An entry's history snapshots, oldest first.
    ///
    /// # Errors
    ///
    /// [`DatabaseError::EntryNotFound`] / [`DatabaseError::NotOpen`].
    pub fn entry_history(&self, id: Uuid) -> Result<Vec<EntryView>, DatabaseError> {
        self.guard_open()?;
        let entry = self
            .tree
            .entry(id)
            .ok_or(DatabaseError::EntryNotFound(id))?;
        Ok(entry.history.iter().map(EntryView::from).collect())
    }

    /// Search unprotected entry data; see [`crate::search::search`].
    ///
    /// # Errors
    ///
    /// [`DatabaseError::NotOpen`].
    pub fn search(&self, query: &str) -> Result<Vec<EntryView>, DatabaseError> {
        self.guard_open()?;
        Ok(search::search(&self.tree, query))
    }

    // -- mutations -----------------------------------------------------------

    /// Create a group under `parent`.
    ///
    /// # Errors
    ///
    /// Delegated from [`DatabaseTree::create_group`].
    pub fn create_group(
        &mut self,
        parent: Uuid,
        name: impl Into<String>,
    ) -> Result<Uuid, DatabaseError> {
        self.guard_open()?;
        let id = self.tree.create_group(parent, name)?;
        self.dirty = true;
        Ok(id)
    }

    /// Rename a group.
    ///
    /// # Errors
    ///
    /// Delegated from [`DatabaseTree::rename_group`].
    pub fn rename_group(
        &mut self,
        id: Uuid,
        new_name: impl Into<String>,
    ) -> Result<(), DatabaseError> {
        self.guard_open()?;
        self.tree.rename_group(id, new_name)?;
        self.dirty = true;
        Ok(())
    }

    /// Move a group under a new parent.
    ///
    /// # Errors
    ///
    /// Delegated from [`DatabaseTree::move_group`].
    pub fn move_group(&mut self, id: Uuid, new_parent: Uuid) -> Result<(), DatabaseError> {
        self.guard_open()?;
        self.tree.move_group(id, new_parent)?;
        self.dirty = true;
        Ok(())
    }

    /// Delete a group per the configured delete policy.
    ///
    /// # Errors
    ///
    /// Delegated from [`DatabaseTree::delete_group`].
    pub fn delete_group(&mut self, id: Uuid) -> Result<(), DatabaseError> {
        self.guard_open()?;
        self.tree.delete_group(id, self.config.delete_policy)?;
        self.dirty = true;
        Ok(())
    }

    /// Create an entry in `group` with initial fields.
    ///
    /// # Errors
    ///
    /// Delegated from [`DatabaseTree::create_entry`].
    pub fn create_entry(
        &mut self,
        group: Uuid,
        fields: Vec<Field>,
    ) -> Result<Uuid, DatabaseError> {
        self.guard_open()?;
        let id = self.tree.create_entry(group, fields)?;
        self.dirty = true;
        Ok(id)
    }

    /// Replace an entry's fields, snapshotting the prior version.
    ///
    /// # Errors
    ///
    /// Delegated from [`DatabaseTree::update_entry`].
    pub fn update_entry(&mut self, id: Uuid, fields: Vec<Field>) -> Result<(), DatabaseError> {
        self.guard_open()?;
        self.tree
            .update_entry(id, fields, self.config.history_max_items)?;
        self.dirty = true;
        Ok(())
    }

    /// Move an entry to another group.
    ///
    /// # Errors
    ///
    /// Delegated from [`DatabaseTree::move_entry`].
    pub fn move_entry(&mut self, id: Uuid, new_group: Uuid) -> Result<(), DatabaseError> {
        self.guard_open()?;
        self.tree.move_entry(id, new_group)?;
        self.dirty = true;
        Ok(())
    }

    /// Delete an entry per the configured delete policy.
    ///
    /// # Errors
    ///
    /// Delegated from [`DatabaseTree::delete_entry`].
    pub fn delete_entry(&mut self, id: Uuid) -> Result<(), DatabaseError> {
        self.guard_open()?;
        self.tree.delete_entry(id, self.config.delete_policy)?;
        self.dirty = true;
        Ok(())
    }

    /// Attach a binary to an entry.
    ///
    /// # Errors
    ///
    /// Delegated from [`DatabaseTree::add_attachment`].
    pub fn add_attachment(
        &mut self,
        id: Uuid,
        attachment: Attachment,
    ) -> Result<(), DatabaseError> {
        self.guard_open()?;
        self.tree
            .add_attachment(id, attachment, self.config.history_max_items)?;
        self.dirty = true;
        Ok(())
    }

    /// Remove an attachment by name.
    ///
    /// # Errors
    ///
    /// Delegated from [`DatabaseTree::remove_attachment`].
    pub fn remove_attachment(&mut self, id: Uuid, name: &str) -> Result<bool, DatabaseError> {
        self.guard_open()?;
        let removed = self
            .tree
            .remove_attachment(id, name, self.config.history_max_items)?;
        if removed {
            self.dirty = true;
        }
        Ok(removed)
    }

    /// Set or clear an entry's expiration instant.
    ///
    /// # Errors
    ///
    /// Delegated from [`DatabaseTree::set_entry_expiry`].
    pub fn set_entry_expiry(
        &mut self,
        id: Uuid,
        expires: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<(), DatabaseError> {
        self.guard_open()?;
        self.tree.set_entry_expiry(id, expires)?;
        self.dirty = true;
        Ok(())
    }

    /// Set or clear a group's expiration instant.
    ///
    /// # Errors
    ///
    /// Delegated from [`DatabaseTree::set_group_expiry`].
    pub fn set_group_expiry(
        &mut self,
        id: Uuid,
        expires: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<(), DatabaseError> {
        self.guard_open()?;
        self.tree.set_group_expiry(id, expires)?;
        self.dirty = true;
        Ok(())
    }

    /// Record a read access on an entry (access timestamps are content,
    /// so this dirties the database).
    ///
    /// # Errors
    ///
    /// Delegated from [`DatabaseTree::touch_entry`].
    pub fn touch_entry(&mut self, id: Uuid) -> Result<(), DatabaseError> {
        self.guard_open()?;
        self.tree.touch_entry(id)?;
        self.dirty = true;
        Ok(())
    }

    // -- internals -----------------------------------------------------------

    fn guard_open(&self) -> Result<(), DatabaseError> {
        match self.state {
            DatabaseState::Open => Ok(()),
            DatabaseState::Saving | DatabaseState::Failed => Err(DatabaseError::NotOpen),
        }
    }
}

/// Run the KDF and seed mixing for a header's parameters.
fn derive_master_key(
    key: &CompositeKey,
    header: &Header,
    cancel: &CancelToken,
) -> Result<SecretBytes<32>, DatabaseError> {
    cancel.checkpoint()?;
    debug!(kdf = ?header.kdf, "deriving master key");
    let transformed = kdf::transform(key.expose(), &header.kdf_salt, &header.kdf)?;
    cancel.checkpoint()?;
    Ok(keys::master_key(&header.master_seed, &transformed)?)
}

/// Write `data` to `path` through a synced temporary file and an atomic
/// rename, so a crash never leaves a half-written container behind.
fn atomic_write(path: &Path, data: &[u8]) -> Result<(), DatabaseError> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let mut temp = match dir {
        Some(dir) => tempfile::NamedTempFile::new_in(dir)?,
        None => tempfile::NamedTempFile::new_in(".")?,
    };
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| DatabaseError::Io(e.error))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
