//! In-memory node types — groups, entries, fields, timestamps.
//!
//! These are plain data carriers; structural rules (identifier
//! uniqueness, parent/child consistency, history bounds) are enforced by
//! [`crate::tree::DatabaseTree`], which owns every node in its arena.
//! The one non-plain citizen is [`ProtectedValue`]: credential material
//! never lives in an ordinary `String`.

use chrono::{DateTime, Utc};
use coffre_crypto_core::SecretBuffer;
use std::fmt;
use uuid::Uuid;
use zeroize::Zeroize;

/// Standard field key: entry display name.
pub const FIELD_TITLE: &str = "Title";
/// Standard field key: account name.
pub const FIELD_USERNAME: &str = "UserName";
/// Standard field key: the credential itself (protected by default).
pub const FIELD_PASSWORD: &str = "Password";
/// Standard field key: associated URL.
pub const FIELD_URL: &str = "URL";
/// Standard field key: free-form notes.
pub const FIELD_NOTES: &str = "Notes";

// ---------------------------------------------------------------------------
// ProtectedValue
// ---------------------------------------------------------------------------

/// A field value held obscured in memory until explicitly revealed.
///
/// Backed by a page-locked, zero-on-drop buffer. Cloning duplicates into
/// a fresh locked allocation; equality is constant-time; `Debug` is
/// masked. Code that needs the secret goes through
/// [`ProtectedValue::expose`] — there is no accidental path to the bytes.
pub struct ProtectedValue {
    inner: SecretBuffer,
}

impl ProtectedValue {
    /// Protect a copy of `bytes`. The caller zeroizes its own copy.
    #[must_use]
    pub fn new(bytes: &[u8]) -> Self {
        Self {
            inner: SecretBuffer::new(bytes),
        }
    }

    /// Protect a `String`, zeroizing the source before it drops.
    #[must_use]
    pub fn from_string(mut value: String) -> Self {
        let protected = Self::new(value.as_bytes());
        value.zeroize();
        protected
    }

    /// Reveal the raw bytes. Keep the borrow short-lived.
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        self.inner.expose()
    }

    /// Reveal as UTF-8, if the bytes are valid UTF-8.
    #[must_use]
    pub fn expose_str(&self) -> Option<&str> {
        std::str::from_utf8(self.inner.expose()).ok()
    }

    /// Number of protected bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the value is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Clone for ProtectedValue {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.duplicate(),
        }
    }
}

impl PartialEq for ProtectedValue {
    fn eq(&self, other: &Self) -> bool {
        self.inner.ct_eq(&other.inner)
    }
}

impl Eq for ProtectedValue {}

impl fmt::Debug for ProtectedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProtectedValue(***)")
    }
}

impl From<&str> for ProtectedValue {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes())
    }
}

// ---------------------------------------------------------------------------
// Fields
// ---------------------------------------------------------------------------

/// A field value — cleartext or protected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldValue {
    /// Ordinary value, readable in place.
    Plain(String),
    /// Credential material, obscured until revealed.
    Protected(ProtectedValue),
}

impl FieldValue {
    /// Whether this value is held protected.
    #[must_use]
    pub const fn is_protected(&self) -> bool {
        matches!(self, Self::Protected(_))
    }

    /// The value as a `&str` where that is possible without revealing
    /// anything: `Plain` always, `Protected` never (returns `None`).
    #[must_use]
    pub fn as_plain_str(&self) -> Option<&str> {
        match self {
            Self::Plain(s) => Some(s.as_str()),
            Self::Protected(_) => None,
        }
    }
}

/// One named field of an entry. Entries keep fields as an ordered
/// sequence, so serialization and display order are stable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    /// Field name (`Title`, `Password`, or any custom key).
    pub key: String,
    /// The value.
    pub value: FieldValue,
}

impl Field {
    /// Convenience constructor for a cleartext field.
    #[must_use]
    pub fn plain(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: FieldValue::Plain(value.into()),
        }
    }

    /// Convenience constructor for a protected field.
    #[must_use]
    pub fn protected(key: impl Into<String>, value: &str) -> Self {
        Self {
            key: key.into(),
            value: FieldValue::Protected(ProtectedValue::from(value)),
        }
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Clamp to whole seconds — the container stores Unix seconds, and
/// keeping memory and disk at the same precision makes a saved tree
/// compare equal to its reopened self.
pub(crate) fn second_precision(instant: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(instant.timestamp(), 0).unwrap_or(instant)
}

/// Node timestamps, serialized as Unix seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Times {
    /// Creation instant; never changes after the node is made.
    pub created: DateTime<Utc>,
    /// Last content modification; kept `>= created` by the tree's
    /// mutation paths.
    pub modified: DateTime<Utc>,
    /// Last read access.
    pub accessed: DateTime<Utc>,
    /// Optional expiration instant.
    pub expires: Option<DateTime<Utc>>,
}

impl Times {
    /// All three clocks set to now, no expiry.
    #[must_use]
    pub fn now() -> Self {
        let now = second_precision(Utc::now());
        Self {
            created: now,
            modified: now,
            accessed: now,
            expires: None,
        }
    }

    /// Record a content modification. Monotonic: a clock that appears to
    /// have gone backwards never drags `modified` before `created`.
    pub fn touch_modified(&mut self) {
        let now = second_precision(Utc::now());
        self.modified = now.max(self.created);
        self.accessed = self.modified;
    }

    /// Record a read access.
    pub fn touch_accessed(&mut self) {
        self.accessed = second_precision(Utc::now()).max(self.created);
    }

    /// Whether the node is expired at `at`.
    #[must_use]
    pub fn is_expired(&self, at: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|deadline| deadline <= at)
    }
}

// ---------------------------------------------------------------------------
// Attachments
// ---------------------------------------------------------------------------

/// A named binary attached to an entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    /// Display name (usually the original file name).
    pub name: String,
    /// Raw contents.
    pub data: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

/// A node grouping entries and further groups.
///
/// `parent` is a back-reference only — ownership of every node lies with
/// the tree's arena, so no cycle of owning pointers can form. The child
/// vectors are ordered and are the authority on sibling order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Group {
    /// Stable random identifier, unique across the whole tree.
    pub uuid: Uuid,
    /// Identifier of the parent group; `None` exactly for the root.
    pub parent: Option<Uuid>,
    /// Display name.
    pub name: String,
    /// Icon reference.
    pub icon: u32,
    /// Timestamps.
    pub times: Times,
    /// Marks the recycle-bin group.
    pub is_recycle_bin: bool,
    /// Ordered child groups.
    pub groups: Vec<Uuid>,
    /// Ordered child entries.
    pub entries: Vec<Uuid>,
}

impl Group {
    /// Fresh group with a random identifier and no parent; the tree
    /// wires the parent when the group is inserted.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            parent: None,
            name: name.into(),
            icon: 0,
            times: Times::now(),
            is_recycle_bin: false,
            groups: Vec::new(),
            entries: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

/// A credential record.
///
/// `history` holds prior versions, oldest first; snapshots never carry
/// history of their own, are immutable once appended, and are bounded by
/// `DatabaseConfig::history_max_items`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    /// Stable random identifier, unique across the whole tree.
    pub uuid: Uuid,
    /// The owning group — exactly one at any time.
    pub group: Uuid,
    /// Icon reference.
    pub icon: u32,
    /// Timestamps.
    pub times: Times,
    /// Ordered named fields.
    pub fields: Vec<Field>,
    /// Attached binaries.
    pub attachments: Vec<Attachment>,
    /// Prior versions, oldest first.
    pub history: Vec<Entry>,
}

impl Entry {
    /// Fresh empty entry owned by `group`.
    #[must_use]
    pub fn new(group: Uuid) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            group,
            icon: 0,
            times: Times::now(),
            fields: Vec::new(),
            attachments: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Look up a field value by key.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|f| f.key == key).map(|f| &f.value)
    }

    /// Set a field, replacing in place to preserve order, appending
    /// otherwise.
    pub fn set_field(&mut self, field: Field) {
        if let Some(existing) = self.fields.iter_mut().find(|f| f.key == field.key) {
            existing.value = field.value;
        } else {
            self.fields.push(field);
        }
    }

    /// Remove a field by key. Returns whether anything was removed.
    pub fn remove_field(&mut self, key: &str) -> bool {
        let before = self.fields.len();
        self.fields.retain(|f| f.key != key);
        self.fields.len() != before
    }

    /// The `Title` field as display text (empty when absent or
    /// protected).
    #[must_use]
    pub fn title(&self) -> &str {
        self.field(FIELD_TITLE)
            .and_then(FieldValue::as_plain_str)
            .unwrap_or_default()
    }

    /// Clone the live state as a history snapshot (history stripped, so
    /// snapshots never nest).
    #[must_use]
    pub(crate) fn snapshot(&self) -> Self {
        let mut copy = self.clone();
        copy.history.clear();
        copy
    }

    /// Append a snapshot, dropping the oldest entries beyond `max`.
    /// With `max == 0` history is disabled entirely.
    pub(crate) fn push_history(&mut self, snapshot: Self, max: usize) {
        if max == 0 {
            return;
        }
        self.history.push(snapshot);
        if self.history.len() > max {
            let excess = self.history.len().saturating_sub(max);
            self.history.drain(..excess);
        }
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// Read-only projection of an entry handed across the engine API.
///
/// Carries cloned fields with protected values still protected — the
/// view widens nothing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryView {
    /// Entry identifier.
    pub uuid: Uuid,
    /// Owning group identifier.
    pub group: Uuid,
    /// Display title (empty when absent or protected).
    pub title: String,
    /// Icon reference.
    pub icon: u32,
    /// Timestamps.
    pub times: Times,
    /// All fields, protection preserved.
    pub fields: Vec<Field>,
    /// Attachment names (contents stay behind `get_entry` on the
    /// service).
    pub attachment_names: Vec<String>,
    /// Number of retained history snapshots.
    pub history_len: usize,
}

/// Read-only projection of a group handed across the engine API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupView {
    /// Group identifier.
    pub uuid: Uuid,
    /// Parent identifier (`None` for the root).
    pub parent: Option<Uuid>,
    /// Display name.
    pub name: String,
    /// Icon reference.
    pub icon: u32,
    /// Timestamps.
    pub times: Times,
    /// Whether this is the recycle bin.
    pub is_recycle_bin: bool,
    /// Number of direct child groups.
    pub group_count: usize,
    /// Number of direct child entries.
    pub entry_count: usize,
}

impl From<&Group> for GroupView {
    fn from(group: &Group) -> Self {
        Self {
            uuid: group.uuid,
            parent: group.parent,
            name: group.name.clone(),
            icon: group.icon,
            times: group.times,
            is_recycle_bin: group.is_recycle_bin,
            group_count: group.groups.len(),
            entry_count: group.entries.len(),
        }
    }
}

impl From<&Entry> for EntryView {
    fn from(entry: &Entry) -> Self {
        Self {
            uuid: entry.uuid,
            group: entry.group,
            title: entry.title().to_owned(),
            icon: entry.icon,
            times: entry.times,
            fields: entry.fields.clone(),
            attachment_names: entry.attachments.iter().map(|a| a.name.clone()).collect(),
            history_len: entry.history.len(),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protected_value_roundtrip() {
        let value = ProtectedValue::from("s3cret");
        assert_eq!(value.expose(), b"s3cret");
        assert_eq!(value.expose_str(), Some("s3cret"));
        assert_eq!(value.len(), 6);
        assert!(!value.is_empty());
    }

    #[test]
    fn protected_value_from_string_zeroizes_source() {
        // Observable contract: the protected copy survives, the source
        // String is consumed.
        let value = ProtectedValue::from_string(String::from("ephemeral"));
        assert_eq!(value.expose(), b"ephemeral");
    }

    #[test]
    fn protected_value_debug_is_masked() {
        let value = ProtectedValue::from("hunter2");
        let debug = format!("{value:?}");
        assert_eq!(debug, "ProtectedValue(***)");
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn protected_value_equality() {
        assert_eq!(ProtectedValue::from("same"), ProtectedValue::from("same"));
        assert_ne!(ProtectedValue::from("one"), ProtectedValue::from("two"));
        assert_ne!(ProtectedValue::from("ab"), ProtectedValue::from("abc"));
    }

    #[test]
    fn protected_value_clone_is_independent_copy() {
        let original = ProtectedValue::from("clone me");
        let copy = original.clone();
        assert_eq!(original, copy);
    }

    #[test]
    fn field_constructors() {
        let plain = Field::plain(FIELD_USERNAME, "alice");
        assert!(!plain.value.is_protected());
        assert_eq!(plain.value.as_plain_str(), Some("alice"));

        let protected = Field::protected(FIELD_PASSWORD, "pw");
        assert!(protected.value.is_protected());
        assert_eq!(protected.value.as_plain_str(), None);
    }

    #[test]
    fn times_start_consistent() {
        let times = Times::now();
        assert_eq!(times.created, times.modified);
        assert_eq!(times.created, times.accessed);
        assert!(times.expires.is_none());
    }

    #[test]
    fn touch_modified_is_monotonic() {
        let mut times = Times::now();
        let created = times.created;
        times.touch_modified();
        assert!(times.modified >= created);
        assert_eq!(times.accessed, times.modified);
    }

    #[test]
    fn expiry_comparison() {
        let mut times = Times::now();
        assert!(!times.is_expired(Utc::now()));
        times.expires = Some(times.created);
        assert!(times.is_expired(Utc::now()));
    }

    #[test]
    fn entry_field_set_replaces_in_place() {
        let mut entry = Entry::new(Uuid::new_v4());
        entry.set_field(Field::plain(FIELD_TITLE, "Bank"));
        entry.set_field(Field::plain(FIELD_USERNAME, "alice"));
        entry.set_field(Field::plain(FIELD_TITLE, "Bank v2"));

        assert_eq!(entry.fields.len(), 2);
        assert_eq!(entry.fields[0].key, FIELD_TITLE);
        assert_eq!(entry.title(), "Bank v2");
    }

    #[test]
    fn entry_remove_field() {
        let mut entry = Entry::new(Uuid::new_v4());
        entry.set_field(Field::plain(FIELD_URL, "https://example.org"));
        assert!(entry.remove_field(FIELD_URL));
        assert!(!entry.remove_field(FIELD_URL));
        assert!(entry.field(FIELD_URL).is_none());
    }

    #[test]
    fn title_of_protected_title_is_hidden() {
        let mut entry = Entry::new(Uuid::new_v4());
        entry.set_field(Field::protected(FIELD_TITLE, "classified"));
        assert_eq!(entry.title(), "");
    }

    #[test]
    fn snapshot_strips_history() {
        let mut entry = Entry::new(Uuid::new_v4());
        entry.set_field(Field::plain(FIELD_TITLE, "v1"));
        let snap_v1 = entry.snapshot();
        entry.push_history(snap_v1, 10);
        entry.set_field(Field::plain(FIELD_TITLE, "v2"));

        let snap_v2 = entry.snapshot();
        assert!(snap_v2.history.is_empty());
        assert_eq!(entry.history.len(), 1);
        assert_eq!(entry.history[0].title(), "v1");
    }

    #[test]
    fn history_is_bounded_oldest_dropped() {
        let mut entry = Entry::new(Uuid::new_v4());
        for i in 0..5 {
            entry.set_field(Field::plain(FIELD_TITLE, format!("v{i}")));
            let snap = entry.snapshot();
            entry.push_history(snap, 3);
        }
        assert_eq!(entry.history.len(), 3);
        assert_eq!(entry.history[0].title(), "v2");
        assert_eq!(entry.history[2].title(), "v4");
    }

    #[test]
    fn history_zero_max_disables_history() {
        let mut entry = Entry::new(Uuid::new_v4());
        let snap = entry.snapshot();
        entry.push_history(snap, 0);
        assert!(entry.history.is_empty());
    }

    #[test]
    fn entry_view_preserves_protection() {
        let mut entry = Entry::new(Uuid::new_v4());
        entry.set_field(Field::plain(FIELD_TITLE, "Bank"));
        entry.set_field(Field::protected(FIELD_PASSWORD, "secret1"));
        entry.attachments.push(Attachment {
            name: "scan.pdf".into(),
            data: vec![1, 2, 3],
        });

        let view = EntryView::from(&entry);
        assert_eq!(view.title, "Bank");
        assert_eq!(view.attachment_names, vec!["scan.pdf"]);
        assert_eq!(view.history_len, 0);
        let password = view
            .fields
            .iter()
            .find(|f| f.key == FIELD_PASSWORD)
            .expect("password field present");
        assert!(password.value.is_protected());
    }

    #[test]
    fn new_group_has_no_parent_until_inserted() {
        let group = Group::new("Finance");
        assert!(group.parent.is_none());
        assert!(group.groups.is_empty());
        assert!(group.entries.is_empty());
        assert!(!group.is_recycle_bin);
    }
}
