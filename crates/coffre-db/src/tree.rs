//! The in-memory group/entry tree.
//!
//! Arena storage: the tree owns every node in two identifier-keyed maps,
//! edges are identifier fields (`Group::parent`, child vectors,
//! `Entry::group`) — never owning pointers, so no reference cycle can
//! exist. Every mutation is transactional per call: all structural
//! invariants hold again before the method returns, or the tree is
//! untouched and an error comes back.
//!
//! Invariants maintained:
//! - identifiers are unique across groups *and* entries (one namespace)
//! - exactly one root, `parent == None`, never deleted or moved
//! - every other group has a parent chain reaching the root; no cycles
//! - every entry belongs to exactly one existing group
//! - parent/child links are symmetric (child vec ↔ back-reference)
//! - history snapshots are only appended, never edited

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::config::DeletePolicy;
use crate::error::DatabaseError;
use crate::model::{Attachment, Entry, Field, Group};

/// Display name given to the lazily created recycle-bin group.
pub const RECYCLE_BIN_NAME: &str = "Recycle Bin";

/// Icon reference assigned to the recycle-bin group.
const RECYCLE_BIN_ICON: u32 = 43;

// ---------------------------------------------------------------------------
// Tree
// ---------------------------------------------------------------------------

/// The mutable tree model of one open database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseTree {
    root: Uuid,
    recycle_bin: Option<Uuid>,
    groups: HashMap<Uuid, Group>,
    entries: HashMap<Uuid, Entry>,
}

/// One node yielded by depth-first traversal.
#[derive(Debug, Clone, Copy)]
pub enum Node<'a> {
    /// A group, yielded before its contents.
    Group(&'a Group),
    /// An entry, yielded after its owning group, before sibling groups.
    Entry(&'a Entry),
}

enum WalkItem {
    Group(Uuid),
    Entry(Uuid),
}

/// Depth-first iterator: each group, then its entries, then its child
/// groups, in stored sibling order.
pub struct TreeWalk<'a> {
    tree: &'a DatabaseTree,
    stack: Vec<WalkItem>,
}

impl<'a> Iterator for TreeWalk<'a> {
    type Item = Node<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.stack.pop()? {
            WalkItem::Group(id) => {
                let group = self.tree.groups.get(&id)?;
                for &child in group.groups.iter().rev() {
                    self.stack.push(WalkItem::Group(child));
                }
                for &entry in group.entries.iter().rev() {
                    self.stack.push(WalkItem::Entry(entry));
                }
                Some(Node::Group(group))
            }
            WalkItem::Entry(id) => self.tree.entries.get(&id).map(Node::Entry),
        }
    }
}

impl DatabaseTree {
    /// Fresh tree holding only a root group.
    #[must_use]
    pub fn new(root_name: impl Into<String>) -> Self {
        let root = Group::new(root_name);
        let root_id = root.uuid;
        let mut groups = HashMap::new();
        groups.insert(root_id, root);
        Self {
            root: root_id,
            recycle_bin: None,
            groups,
            entries: HashMap::new(),
        }
    }

    // -- lookups ------------------------------------------------------------

    /// Identifier of the root group.
    #[must_use]
    pub const fn root_id(&self) -> Uuid {
        self.root
    }

    /// Identifier of the recycle-bin group, if one has been created.
    #[must_use]
    pub const fn recycle_bin_id(&self) -> Option<Uuid> {
        self.recycle_bin
    }

    /// O(1) group lookup.
    #[must_use]
    pub fn group(&self, id: Uuid) -> Option<&Group> {
        self.groups.get(&id)
    }

    /// O(1) entry lookup.
    #[must_use]
    pub fn entry(&self, id: Uuid) -> Option<&Entry> {
        self.entries.get(&id)
    }

    /// Whether `id` names any node, group or entry.
    #[must_use]
    pub fn contains(&self, id: Uuid) -> bool {
        self.groups.contains_key(&id) || self.entries.contains_key(&id)
    }

    /// Number of groups, root included.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Number of live entries (history snapshots not counted).
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Depth-first traversal over the whole tree.
    #[must_use]
    pub fn walk(&self) -> TreeWalk<'_> {
        TreeWalk {
            tree: self,
            stack: vec![WalkItem::Group(self.root)],
        }
    }

    /// Whether `id` (group or entry) lives inside the subtree rooted at
    /// `subtree_root`, the subtree root itself included.
    #[must_use]
    pub fn is_in_subtree(&self, subtree_root: Uuid, id: Uuid) -> bool {
        let mut current = if let Some(entry) = self.entries.get(&id) {
            Some(entry.group)
        } else if self.groups.contains_key(&id) {
            Some(id)
        } else {
            None
        };

        while let Some(group_id) = current {
            if group_id == subtree_root {
                return true;
            }
            current = self.groups.get(&group_id).and_then(|g| g.parent);
        }
        false
    }

    // -- group mutations ----------------------------------------------------

    /// Create a group under `parent` and return its identifier.
    ///
    /// # Errors
    ///
    /// [`DatabaseError::GroupNotFound`] if `parent` does not exist.
    pub fn create_group(
        &mut self,
        parent: Uuid,
        name: impl Into<String>,
    ) -> Result<Uuid, DatabaseError> {
        if !self.groups.contains_key(&parent) {
            return Err(DatabaseError::GroupNotFound(parent));
        }

        let mut group = Group::new(name);
        // A v4 collision is astronomically unlikely; regenerating keeps
        // the uniqueness invariant absolute anyway.
        while self.contains(group.uuid) {
            group.uuid = Uuid::new_v4();
        }
        group.parent = Some(parent);
        let id = group.uuid;

        self.groups.insert(id, group);
        if let Some(parent_group) = self.groups.get_mut(&parent) {
            parent_group.groups.push(id);
            parent_group.times.touch_modified();
        }
        Ok(id)
    }

    /// Rename a group.
    ///
    /// # Errors
    ///
    /// [`DatabaseError::GroupNotFound`] if `id` does not exist.
    pub fn rename_group(
        &mut self,
        id: Uuid,
        new_name: impl Into<String>,
    ) -> Result<(), DatabaseError> {
        let group = self
            .groups
            .get_mut(&id)
            .ok_or(DatabaseError::GroupNotFound(id))?;
        group.name = new_name.into();
        group.times.touch_modified();
        Ok(())
    }

    /// Move a group (with its subtree) under a new parent.
    ///
    /// # Errors
    ///
    /// [`DatabaseError::GroupNotFound`] for a missing group or parent;
    /// [`DatabaseError::InvalidOperation`] for moving the root or moving
    /// a group into its own subtree.
    pub fn move_group(&mut self, id: Uuid, new_parent: Uuid) -> Result<(), DatabaseError> {
        if id == self.root {
            return Err(DatabaseError::InvalidOperation(
                "the root group cannot be moved".into(),
            ));
        }
        if !self.groups.contains_key(&id) {
            return Err(DatabaseError::GroupNotFound(id));
        }
        if !self.groups.contains_key(&new_parent) {
            return Err(DatabaseError::GroupNotFound(new_parent));
        }
        if self.is_in_subtree(id, new_parent) {
            return Err(DatabaseError::InvalidOperation(
                "a group cannot be moved into its own subtree".into(),
            ));
        }

        self.detach_group(id);
        if let Some(group) = self.groups.get_mut(&id) {
            group.parent = Some(new_parent);
            group.times.touch_modified();
        }
        if let Some(parent_group) = self.groups.get_mut(&new_parent) {
            parent_group.groups.push(id);
            parent_group.times.touch_modified();
        }
        Ok(())
    }

    /// Delete a group and everything beneath it.
    ///
    /// With [`DeletePolicy::Recycle`] the subtree is moved into the
    /// recycle bin (created on first use). The bin itself, anything
    /// already inside it, and a subtree containing the bin are removed
    /// for real.
    ///
    /// # Errors
    ///
    /// [`DatabaseError::GroupNotFound`] if `id` does not exist;
    /// [`DatabaseError::InvalidOperation`] when asked to delete the root.
    pub fn delete_group(&mut self, id: Uuid, policy: DeletePolicy) -> Result<(), DatabaseError> {
        if id == self.root {
            return Err(DatabaseError::InvalidOperation(
                "the root group cannot be deleted".into(),
            ));
        }
        if !self.groups.contains_key(&id) {
            return Err(DatabaseError::GroupNotFound(id));
        }

        let recycle = match policy {
            DeletePolicy::Hard => false,
            DeletePolicy::Recycle => {
                let bin_inside_target = self
                    .recycle_bin
                    .is_some_and(|bin| self.is_in_subtree(id, bin));
                !self.in_recycle_bin(id) && !bin_inside_target
            }
        };

        if recycle {
            let bin = self.ensure_recycle_bin();
            // Deleting the bin itself never reaches here (in_recycle_bin
            // covers it), so this move cannot form a cycle.
            self.move_group(id, bin)?;
            return Ok(());
        }

        // Hard removal of the whole subtree.
        self.detach_group(id);
        let mut doomed_groups = vec![id];
        let mut cursor = 0;
        while cursor < doomed_groups.len() {
            let current = doomed_groups[cursor];
            cursor = cursor.saturating_add(1);
            if let Some(group) = self.groups.get(&current) {
                doomed_groups.extend(group.groups.iter().copied());
            }
        }
        for group_id in doomed_groups {
            if let Some(group) = self.groups.remove(&group_id) {
                for entry_id in group.entries {
                    self.entries.remove(&entry_id);
                }
                if self.recycle_bin == Some(group_id) {
                    self.recycle_bin = None;
                }
            }
        }
        Ok(())
    }

    /// The recycle-bin group, created under the root on first use.
    pub fn ensure_recycle_bin(&mut self) -> Uuid {
        if let Some(bin) = self.recycle_bin {
            if self.groups.contains_key(&bin) {
                return bin;
            }
        }

        let mut bin = Group::new(RECYCLE_BIN_NAME);
        while self.contains(bin.uuid) {
            bin.uuid = Uuid::new_v4();
        }
        bin.parent = Some(self.root);
        bin.icon = RECYCLE_BIN_ICON;
        bin.is_recycle_bin = true;
        let bin_id = bin.uuid;

        self.groups.insert(bin_id, bin);
        if let Some(root) = self.groups.get_mut(&self.root) {
            root.groups.push(bin_id);
            root.times.touch_modified();
        }
        self.recycle_bin = Some(bin_id);
        bin_id
    }

    /// Whether a node currently lives inside the recycle bin (the bin
    /// itself included).
    #[must_use]
    pub fn in_recycle_bin(&self, id: Uuid) -> bool {
        self.recycle_bin
            .is_some_and(|bin| self.is_in_subtree(bin, id))
    }

    // -- entry mutations ----------------------------------------------------

    /// Create an entry in `group` with the given initial fields.
    ///
    /// # Errors
    ///
    /// [`DatabaseError::GroupNotFound`] if `group` does not exist.
    pub fn create_entry(
        &mut self,
        group: Uuid,
        fields: Vec<Field>,
    ) -> Result<Uuid, DatabaseError> {
        if !self.groups.contains_key(&group) {
            return Err(DatabaseError::GroupNotFound(group));
        }

        let mut entry = Entry::new(group);
        while self.contains(entry.uuid) {
            entry.uuid = Uuid::new_v4();
        }
        for field in fields {
            entry.set_field(field);
        }
        let id = entry.uuid;

        self.entries.insert(id, entry);
        if let Some(owner) = self.groups.get_mut(&group) {
            owner.entries.push(id);
            owner.times.touch_modified();
        }
        Ok(id)
    }

    /// Replace an entry's fields, snapshotting the prior version into
    /// its history (bounded by `history_max`).
    ///
    /// # Errors
    ///
    /// [`DatabaseError::EntryNotFound`] if `id` does not exist.
    pub fn update_entry(
        &mut self,
        id: Uuid,
        fields: Vec<Field>,
        history_max: usize,
    ) -> Result<(), DatabaseError> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(DatabaseError::EntryNotFound(id))?;

        let snapshot = entry.snapshot();
        entry.push_history(snapshot, history_max);
        entry.fields = fields;
        entry.times.touch_modified();
        Ok(())
    }

    /// Attach a binary to an entry, snapshotting the prior version.
    ///
    /// # Errors
    ///
    /// [`DatabaseError::EntryNotFound`] if `id` does not exist.
    pub fn add_attachment(
        &mut self,
        id: Uuid,
        attachment: Attachment,
        history_max: usize,
    ) -> Result<(), DatabaseError> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(DatabaseError::EntryNotFound(id))?;

        let snapshot = entry.snapshot();
        entry.push_history(snapshot, history_max);
        entry.attachments.push(attachment);
        entry.times.touch_modified();
        Ok(())
    }

    /// Remove an attachment by name, snapshotting the prior version.
    /// Returns whether anything was removed.
    ///
    /// # Errors
    ///
    /// [`DatabaseError::EntryNotFound`] if `id` does not exist.
    pub fn remove_attachment(
        &mut self,
        id: Uuid,
        name: &str,
        history_max: usize,
    ) -> Result<bool, DatabaseError> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(DatabaseError::EntryNotFound(id))?;

        if !entry.attachments.iter().any(|a| a.name == name) {
            return Ok(false);
        }
        let snapshot = entry.snapshot();
        entry.push_history(snapshot, history_max);
        entry.attachments.retain(|a| a.name != name);
        entry.times.touch_modified();
        Ok(true)
    }

    /// Move an entry to another group.
    ///
    /// # Errors
    ///
    /// [`DatabaseError::EntryNotFound`] / [`DatabaseError::GroupNotFound`]
    /// for missing nodes.
    pub fn move_entry(&mut self, id: Uuid, new_group: Uuid) -> Result<(), DatabaseError> {
        if !self.entries.contains_key(&id) {
            return Err(DatabaseError::EntryNotFound(id));
        }
        if !self.groups.contains_key(&new_group) {
            return Err(DatabaseError::GroupNotFound(new_group));
        }

        let old_group = self.entries.get(&id).map(|e| e.group);
        if let Some(old) = old_group {
            if old == new_group {
                return Ok(());
            }
            if let Some(group) = self.groups.get_mut(&old) {
                group.entries.retain(|&e| e != id);
                group.times.touch_modified();
            }
        }
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.group = new_group;
            entry.times.touch_modified();
        }
        if let Some(group) = self.groups.get_mut(&new_group) {
            group.entries.push(id);
            group.times.touch_modified();
        }
        Ok(())
    }

    /// Delete an entry per `policy` (recycle moves it into the bin;
    /// inside the bin, or with the hard policy, it is removed for real).
    ///
    /// # Errors
    ///
    /// [`DatabaseError::EntryNotFound`] if `id` does not exist.
    pub fn delete_entry(&mut self, id: Uuid, policy: DeletePolicy) -> Result<(), DatabaseError> {
        let Some(owner) = self.entries.get(&id).map(|e| e.group) else {
            return Err(DatabaseError::EntryNotFound(id));
        };

        let recycle = matches!(policy, DeletePolicy::Recycle) && !self.in_recycle_bin(id);
        if recycle {
            let bin = self.ensure_recycle_bin();
            return self.move_entry(id, bin);
        }

        self.entries.remove(&id);
        if let Some(group) = self.groups.get_mut(&owner) {
            group.entries.retain(|&e| e != id);
            group.times.touch_modified();
        }
        Ok(())
    }

    /// Set or clear an entry's expiration instant.
    ///
    /// # Errors
    ///
    /// [`DatabaseError::EntryNotFound`] if `id` does not exist.
    pub fn set_entry_expiry(
        &mut self,
        id: Uuid,
        expires: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<(), DatabaseError> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(DatabaseError::EntryNotFound(id))?;
        entry.times.expires = expires.map(crate::model::second_precision);
        entry.times.touch_modified();
        Ok(())
    }

    /// Set or clear a group's expiration instant.
    ///
    /// # Errors
    ///
    /// [`DatabaseError::GroupNotFound`] if `id` does not exist.
    pub fn set_group_expiry(
        &mut self,
        id: Uuid,
        expires: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<(), DatabaseError> {
        let group = self
            .groups
            .get_mut(&id)
            .ok_or(DatabaseError::GroupNotFound(id))?;
        group.times.expires = expires.map(crate::model::second_precision);
        group.times.touch_modified();
        Ok(())
    }

    /// Record a read access on an entry.
    ///
    /// # Errors
    ///
    /// [`DatabaseError::EntryNotFound`] if `id` does not exist.
    pub fn touch_entry(&mut self, id: Uuid) -> Result<(), DatabaseError> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(DatabaseError::EntryNotFound(id))?;
        entry.times.touch_accessed();
        Ok(())
    }

    // -- assembly / flattening ----------------------------------------------

    /// Rebuild a tree from a flat record stream.
    ///
    /// The stream contract: groups arrive parents-first (the writer
    /// emits them depth-first), entries may arrive in any order after
    /// the groups that own them. Child order inside each node follows
    /// encounter order, which preserves the writer's sibling order.
    ///
    /// # Errors
    ///
    /// [`DatabaseError::CorruptTree`] for duplicate identifiers, a
    /// missing or duplicated root, references to unknown parents or
    /// owning groups, or a group arriving before its parent.
    pub fn assemble(groups: Vec<Group>, entries: Vec<Entry>) -> Result<Self, DatabaseError> {
        let mut root: Option<Uuid> = None;
        let mut recycle_bin: Option<Uuid> = None;
        let mut group_map: HashMap<Uuid, Group> = HashMap::with_capacity(groups.len());
        let mut entry_map: HashMap<Uuid, Entry> = HashMap::with_capacity(entries.len());

        for mut group in groups {
            if group_map.contains_key(&group.uuid) {
                return Err(DatabaseError::CorruptTree(format!(
                    "duplicate group identifier {}",
                    group.uuid
                )));
            }
            match group.parent {
                None => {
                    if root.is_some() {
                        return Err(DatabaseError::CorruptTree(
                            "more than one root group in record stream".into(),
                        ));
                    }
                    root = Some(group.uuid);
                }
                Some(parent) => {
                    let Some(parent_group) = group_map.get_mut(&parent) else {
                        return Err(DatabaseError::CorruptTree(format!(
                            "group {} references unknown parent {parent}",
                            group.uuid
                        )));
                    };
                    parent_group.groups.push(group.uuid);
                }
            }
            if group.is_recycle_bin && recycle_bin.is_none() {
                recycle_bin = Some(group.uuid);
            }
            // Child links are rebuilt from stream order; stored vectors
            // from the wire are ignored.
            group.groups.clear();
            group.entries.clear();
            group_map.insert(group.uuid, group);
        }

        let Some(root) = root else {
            return Err(DatabaseError::CorruptTree(
                "record stream has no root group".into(),
            ));
        };

        for entry in entries {
            if group_map.contains_key(&entry.uuid) || entry_map.contains_key(&entry.uuid) {
                return Err(DatabaseError::CorruptTree(format!(
                    "duplicate identifier {}",
                    entry.uuid
                )));
            }
            let Some(owner) = group_map.get_mut(&entry.group) else {
                return Err(DatabaseError::CorruptTree(format!(
                    "entry {} references unknown group {}",
                    entry.uuid, entry.group
                )));
            };
            owner.entries.push(entry.uuid);
            entry_map.insert(entry.uuid, entry);
        }

        Ok(Self {
            root,
            recycle_bin,
            groups: group_map,
            entries: entry_map,
        })
    }

    /// Flatten into writer order: groups depth-first (parents before
    /// children), then every entry in traversal order.
    #[must_use]
    pub fn flatten(&self) -> (Vec<&Group>, Vec<&Entry>) {
        let mut groups = Vec::with_capacity(self.groups.len());
        let mut entries = Vec::with_capacity(self.entries.len());
        for node in self.walk() {
            match node {
                Node::Group(group) => groups.push(group),
                Node::Entry(entry) => entries.push(entry),
            }
        }
        (groups, entries)
    }

    // -- auditing ------------------------------------------------------------

    /// Exhaustively check every structural invariant. Used by tests and
    /// available to embedders as a diagnostic; mutation paths keep these
    /// true without calling it.
    ///
    /// # Errors
    ///
    /// A description of the first violated invariant.
    pub fn check_invariants(&self) -> Result<(), String> {
        let root = self
            .groups
            .get(&self.root)
            .ok_or_else(|| "root group missing from arena".to_string())?;
        if root.parent.is_some() {
            return Err("root group has a parent".into());
        }

        for (id, group) in &self.groups {
            if *id != group.uuid {
                return Err(format!("group {id} stored under foreign key"));
            }
            if self.entries.contains_key(id) {
                return Err(format!("identifier {id} used by a group and an entry"));
            }
            if group.times.modified < group.times.created {
                return Err(format!("group {id} modified before created"));
            }

            // Ancestor chain must reach the root without revisiting.
            let mut seen = HashSet::new();
            let mut current = *id;
            loop {
                if !seen.insert(current) {
                    return Err(format!("cycle in ancestor chain of group {id}"));
                }
                if current == self.root {
                    break;
                }
                let Some(node) = self.groups.get(&current) else {
                    return Err(format!("dangling ancestor {current} of group {id}"));
                };
                let Some(parent) = node.parent else {
                    return Err(format!("non-root group {current} has no parent"));
                };
                let Some(parent_group) = self.groups.get(&parent) else {
                    return Err(format!("group {current} has unknown parent {parent}"));
                };
                if !parent_group.groups.contains(&current) {
                    return Err(format!("parent {parent} does not list child {current}"));
                }
                current = parent;
            }

            let mut child_seen = HashSet::new();
            for child in &group.groups {
                if !child_seen.insert(*child) {
                    return Err(format!("group {id} lists child {child} twice"));
                }
                let Some(child_group) = self.groups.get(child) else {
                    return Err(format!("group {id} lists unknown child {child}"));
                };
                if child_group.parent != Some(*id) {
                    return Err(format!("child {child} does not point back to {id}"));
                }
            }
            for entry_id in &group.entries {
                if !child_seen.insert(*entry_id) {
                    return Err(format!("group {id} lists entry {entry_id} twice"));
                }
                let Some(entry) = self.entries.get(entry_id) else {
                    return Err(format!("group {id} lists unknown entry {entry_id}"));
                };
                if entry.group != *id {
                    return Err(format!("entry {entry_id} does not point back to {id}"));
                }
            }
        }

        for (id, entry) in &self.entries {
            if *id != entry.uuid {
                return Err(format!("entry {id} stored under foreign key"));
            }
            let Some(owner) = self.groups.get(&entry.group) else {
                return Err(format!("entry {id} owned by unknown group {}", entry.group));
            };
            if !owner.entries.contains(id) {
                return Err(format!("owner {} does not list entry {id}", entry.group));
            }
            if entry.times.modified < entry.times.created {
                return Err(format!("entry {id} modified before created"));
            }
            for snapshot in &entry.history {
                if !snapshot.history.is_empty() {
                    return Err(format!("history snapshot of {id} carries nested history"));
                }
            }
        }

        Ok(())
    }

    // -- internals -----------------------------------------------------------

    /// Remove `id` from its parent's child vector (the group keeps its
    /// own `parent` field until the caller rewires or removes it).
    fn detach_group(&mut self, id: Uuid) {
        let parent = self.groups.get(&id).and_then(|g| g.parent);
        if let Some(parent) = parent {
            if let Some(parent_group) = self.groups.get_mut(&parent) {
                parent_group.groups.retain(|&g| g != id);
                parent_group.times.touch_modified();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Field, FIELD_PASSWORD, FIELD_TITLE};

    fn tree_with_finance_and_bank() -> (DatabaseTree, Uuid, Uuid) {
        let mut tree = DatabaseTree::new("Root");
        let finance = tree.create_group(tree.root_id(), "Finance").expect("group");
        let bank = tree
            .create_entry(
                finance,
                vec![
                    Field::plain(FIELD_TITLE, "Bank"),
                    Field::protected(FIELD_PASSWORD, "secret1"),
                ],
            )
            .expect("entry");
        (tree, finance, bank)
    }

    #[test]
    fn new_tree_has_lone_root() {
        let tree = DatabaseTree::new("Root");
        assert_eq!(tree.group_count(), 1);
        assert_eq!(tree.entry_count(), 0);
        let root = tree.group(tree.root_id()).expect("root");
        assert!(root.parent.is_none());
        tree.check_invariants().expect("invariants");
    }

    #[test]
    fn create_group_links_both_directions() {
        let (tree, finance, _) = tree_with_finance_and_bank();
        let root = tree.group(tree.root_id()).expect("root");
        assert!(root.groups.contains(&finance));
        assert_eq!(tree.group(finance).expect("finance").parent, Some(tree.root_id()));
        tree.check_invariants().expect("invariants");
    }

    #[test]
    fn create_group_under_missing_parent_fails() {
        let mut tree = DatabaseTree::new("Root");
        let ghost = Uuid::new_v4();
        assert!(matches!(
            tree.create_group(ghost, "Nope"),
            Err(DatabaseError::GroupNotFound(id)) if id == ghost
        ));
    }

    #[test]
    fn rename_group_updates_name_and_times() {
        let (mut tree, finance, _) = tree_with_finance_and_bank();
        tree.rename_group(finance, "Money").expect("rename");
        assert_eq!(tree.group(finance).expect("finance").name, "Money");
        tree.check_invariants().expect("invariants");
    }

    #[test]
    fn move_group_rewires_edges() {
        let (mut tree, finance, _) = tree_with_finance_and_bank();
        let archive = tree.create_group(tree.root_id(), "Archive").expect("group");
        tree.move_group(finance, archive).expect("move");

        assert_eq!(tree.group(finance).expect("finance").parent, Some(archive));
        assert!(tree.group(archive).expect("archive").groups.contains(&finance));
        assert!(!tree.group(tree.root_id()).expect("root").groups.contains(&finance));
        tree.check_invariants().expect("invariants");
    }

    #[test]
    fn move_group_into_own_subtree_is_rejected() {
        let (mut tree, finance, _) = tree_with_finance_and_bank();
        let inner = tree.create_group(finance, "Inner").expect("group");
        assert!(matches!(
            tree.move_group(finance, inner),
            Err(DatabaseError::InvalidOperation(_))
        ));
        assert!(matches!(
            tree.move_group(finance, finance),
            Err(DatabaseError::InvalidOperation(_))
        ));
        tree.check_invariants().expect("invariants");
    }

    #[test]
    fn root_cannot_be_moved_or_deleted() {
        let mut tree = DatabaseTree::new("Root");
        let other = tree.create_group(tree.root_id(), "Other").expect("group");
        assert!(matches!(
            tree.move_group(tree.root_id(), other),
            Err(DatabaseError::InvalidOperation(_))
        ));
        assert!(matches!(
            tree.delete_group(tree.root_id(), DeletePolicy::Hard),
            Err(DatabaseError::InvalidOperation(_))
        ));
    }

    #[test]
    fn hard_delete_removes_whole_subtree() {
        let (mut tree, finance, bank) = tree_with_finance_and_bank();
        let inner = tree.create_group(finance, "Inner").expect("group");
        let inner_entry = tree.create_entry(inner, vec![]).expect("entry");

        tree.delete_group(finance, DeletePolicy::Hard).expect("delete");

        assert!(tree.group(finance).is_none());
        assert!(tree.group(inner).is_none());
        assert!(tree.entry(bank).is_none());
        assert!(tree.entry(inner_entry).is_none());
        assert_eq!(tree.entry_count(), 0);
        tree.check_invariants().expect("invariants");
    }

    #[test]
    fn recycle_delete_moves_subtree_into_bin() {
        let (mut tree, finance, bank) = tree_with_finance_and_bank();
        tree.delete_group(finance, DeletePolicy::Recycle).expect("delete");

        let bin = tree.recycle_bin_id().expect("bin exists");
        assert!(tree.group(finance).is_some(), "group still alive in bin");
        assert_eq!(tree.group(finance).expect("finance").parent, Some(bin));
        assert!(tree.entry(bank).is_some(), "entry survived with its group");
        assert!(tree.in_recycle_bin(bank));
        tree.check_invariants().expect("invariants");
    }

    #[test]
    fn deleting_inside_bin_is_always_hard() {
        let (mut tree, finance, bank) = tree_with_finance_and_bank();
        tree.delete_group(finance, DeletePolicy::Recycle).expect("first delete");
        tree.delete_group(finance, DeletePolicy::Recycle).expect("second delete");

        assert!(tree.group(finance).is_none());
        assert!(tree.entry(bank).is_none());
        tree.check_invariants().expect("invariants");
    }

    #[test]
    fn recycle_bin_is_created_once() {
        let mut tree = DatabaseTree::new("Root");
        let a = tree.ensure_recycle_bin();
        let b = tree.ensure_recycle_bin();
        assert_eq!(a, b);
        assert!(tree.group(a).expect("bin").is_recycle_bin);
        assert_eq!(tree.group(a).expect("bin").name, RECYCLE_BIN_NAME);
    }

    #[test]
    fn create_entry_links_owner() {
        let (tree, finance, bank) = tree_with_finance_and_bank();
        let entry = tree.entry(bank).expect("entry");
        assert_eq!(entry.group, finance);
        assert!(tree.group(finance).expect("finance").entries.contains(&bank));
        tree.check_invariants().expect("invariants");
    }

    #[test]
    fn update_entry_pushes_bounded_history() {
        let (mut tree, _, bank) = tree_with_finance_and_bank();
        for i in 0..4 {
            tree.update_entry(bank, vec![Field::plain(FIELD_TITLE, format!("v{i}"))], 2)
                .expect("update");
        }
        let entry = tree.entry(bank).expect("entry");
        assert_eq!(entry.title(), "v3");
        assert_eq!(entry.history.len(), 2);
        assert_eq!(entry.history[1].title(), "v2");
        tree.check_invariants().expect("invariants");
    }

    #[test]
    fn move_entry_rewires_owner() {
        let (mut tree, finance, bank) = tree_with_finance_and_bank();
        let archive = tree.create_group(tree.root_id(), "Archive").expect("group");
        tree.move_entry(bank, archive).expect("move");

        assert_eq!(tree.entry(bank).expect("entry").group, archive);
        assert!(!tree.group(finance).expect("finance").entries.contains(&bank));
        assert!(tree.group(archive).expect("archive").entries.contains(&bank));
        tree.check_invariants().expect("invariants");
    }

    #[test]
    fn move_entry_to_same_group_is_a_no_op() {
        let (mut tree, finance, bank) = tree_with_finance_and_bank();
        tree.move_entry(bank, finance).expect("move");
        assert_eq!(
            tree.group(finance)
                .expect("finance")
                .entries
                .iter()
                .filter(|&&e| e == bank)
                .count(),
            1
        );
        tree.check_invariants().expect("invariants");
    }

    #[test]
    fn delete_entry_recycles_then_hard_deletes() {
        let (mut tree, _, bank) = tree_with_finance_and_bank();
        tree.delete_entry(bank, DeletePolicy::Recycle).expect("recycle");
        assert!(tree.in_recycle_bin(bank));

        tree.delete_entry(bank, DeletePolicy::Recycle).expect("hard");
        assert!(tree.entry(bank).is_none());
        tree.check_invariants().expect("invariants");
    }

    #[test]
    fn attachments_snapshot_history() {
        let (mut tree, _, bank) = tree_with_finance_and_bank();
        tree.add_attachment(
            bank,
            Attachment {
                name: "scan.pdf".into(),
                data: vec![9, 9, 9],
            },
            10,
        )
        .expect("add");
        assert_eq!(tree.entry(bank).expect("entry").history.len(), 1);

        let removed = tree.remove_attachment(bank, "scan.pdf", 10).expect("remove");
        assert!(removed);
        assert_eq!(tree.entry(bank).expect("entry").history.len(), 2);
        assert!(!tree.remove_attachment(bank, "scan.pdf", 10).expect("no-op"));
    }

    #[test]
    fn walk_visits_every_node_once_in_order() {
        let (mut tree, finance, bank) = tree_with_finance_and_bank();
        let archive = tree.create_group(tree.root_id(), "Archive").expect("group");
        let memo = tree.create_entry(archive, vec![]).expect("entry");

        let mut group_ids = Vec::new();
        let mut entry_ids = Vec::new();
        for node in tree.walk() {
            match node {
                Node::Group(g) => group_ids.push(g.uuid),
                Node::Entry(e) => entry_ids.push(e.uuid),
            }
        }
        assert_eq!(group_ids, vec![tree.root_id(), finance, archive]);
        assert_eq!(entry_ids, vec![bank, memo]);
    }

    #[test]
    fn flatten_orders_parents_before_children() {
        let (mut tree, finance, _) = tree_with_finance_and_bank();
        let inner = tree.create_group(finance, "Inner").expect("group");
        let (groups, _) = tree.flatten();
        let position = |id: Uuid| groups.iter().position(|g| g.uuid == id).expect("present");
        assert!(position(tree.root_id()) < position(finance));
        assert!(position(finance) < position(inner));
    }

    #[test]
    fn assemble_roundtrips_flatten() {
        let (tree, _, _) = tree_with_finance_and_bank();
        let (groups, entries) = tree.flatten();
        let rebuilt = DatabaseTree::assemble(
            groups.into_iter().cloned().collect(),
            entries.into_iter().cloned().collect(),
        )
        .expect("assemble");
        assert_eq!(rebuilt, tree);
        rebuilt.check_invariants().expect("invariants");
    }

    #[test]
    fn assemble_rejects_duplicate_group_identifier() {
        let tree = DatabaseTree::new("Root");
        let (groups, _) = tree.flatten();
        let mut doubled: Vec<Group> = groups.into_iter().cloned().collect();
        let mut child = doubled[0].clone();
        child.parent = Some(doubled[0].uuid);
        doubled.push(child);
        assert!(matches!(
            DatabaseTree::assemble(doubled, vec![]),
            Err(DatabaseError::CorruptTree(_))
        ));
    }

    #[test]
    fn assemble_rejects_unknown_parent() {
        let mut orphan = Group::new("Orphan");
        orphan.parent = Some(Uuid::new_v4());
        let root = Group::new("Root");
        assert!(matches!(
            DatabaseTree::assemble(vec![root, orphan], vec![]),
            Err(DatabaseError::CorruptTree(_))
        ));
    }

    #[test]
    fn assemble_rejects_child_before_parent() {
        let root = Group::new("Root");
        let mut parent = Group::new("Parent");
        parent.parent = Some(root.uuid);
        let mut child = Group::new("Child");
        child.parent = Some(parent.uuid);
        // Child arrives before its parent — the stream is out of order.
        assert!(matches!(
            DatabaseTree::assemble(vec![root, child, parent], vec![]),
            Err(DatabaseError::CorruptTree(_))
        ));
    }

    #[test]
    fn assemble_rejects_multiple_roots() {
        assert!(matches!(
            DatabaseTree::assemble(vec![Group::new("A"), Group::new("B")], vec![]),
            Err(DatabaseError::CorruptTree(_))
        ));
    }

    #[test]
    fn assemble_rejects_missing_root() {
        assert!(matches!(
            DatabaseTree::assemble(vec![], vec![]),
            Err(DatabaseError::CorruptTree(_))
        ));
    }

    #[test]
    fn assemble_rejects_entry_with_unknown_group() {
        let root = Group::new("Root");
        let entry = Entry::new(Uuid::new_v4());
        assert!(matches!(
            DatabaseTree::assemble(vec![root], vec![entry]),
            Err(DatabaseError::CorruptTree(_))
        ));
    }

    #[test]
    fn assemble_rejects_entry_reusing_group_identifier() {
        let root = Group::new("Root");
        let mut entry = Entry::new(root.uuid);
        entry.uuid = root.uuid;
        assert!(matches!(
            DatabaseTree::assemble(vec![root], vec![entry]),
            Err(DatabaseError::CorruptTree(_))
        ));
    }

    #[test]
    fn assemble_restores_recycle_bin_flag() {
        let mut tree = DatabaseTree::new("Root");
        tree.ensure_recycle_bin();
        let (groups, entries) = tree.flatten();
        let rebuilt = DatabaseTree::assemble(
            groups.into_iter().cloned().collect(),
            entries.into_iter().cloned().collect(),
        )
        .expect("assemble");
        assert_eq!(rebuilt.recycle_bin_id(), tree.recycle_bin_id());
    }
}
