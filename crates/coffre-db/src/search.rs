//! Entry search over the open tree.
//!
//! Case-insensitive substring match against field keys and *unprotected*
//! field values plus attachment names. Protected values are never
//! inspected — a search can find the entry titled "Bank", never the
//! password inside it. Entries resting in the recycle bin are excluded.

use crate::model::{EntryView, FieldValue};
use crate::tree::{DatabaseTree, Node};

/// Find entries matching `query`, in tree traversal order.
///
/// An empty (or whitespace-only) query matches nothing rather than
/// everything — listing is what [`crate::Database::list_children`] is
/// for.
#[must_use]
pub fn search(tree: &DatabaseTree, query: &str) -> Vec<EntryView> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }

    let mut hits = Vec::new();
    for node in tree.walk() {
        let Node::Entry(entry) = node else {
            continue;
        };
        if tree.in_recycle_bin(entry.uuid) {
            continue;
        }
        if entry_matches(entry, &needle) {
            hits.push(EntryView::from(entry));
        }
    }
    hits
}

fn entry_matches(entry: &crate::model::Entry, needle: &str) -> bool {
    let field_hit = entry.fields.iter().any(|field| {
        if field.key.to_lowercase().contains(needle) {
            return true;
        }
        match &field.value {
            FieldValue::Plain(value) => value.to_lowercase().contains(needle),
            FieldValue::Protected(_) => false,
        }
    });
    field_hit
        || entry
            .attachments
            .iter()
            .any(|a| a.name.to_lowercase().contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeletePolicy;
    use crate::model::{Field, FIELD_PASSWORD, FIELD_TITLE, FIELD_URL, FIELD_USERNAME};

    fn sample_tree() -> DatabaseTree {
        let mut tree = DatabaseTree::new("Root");
        let finance = tree.create_group(tree.root_id(), "Finance").expect("group");
        tree.create_entry(
            finance,
            vec![
                Field::plain(FIELD_TITLE, "Bank of Examples"),
                Field::plain(FIELD_USERNAME, "alice"),
                Field::protected(FIELD_PASSWORD, "hunter2"),
            ],
        )
        .expect("entry");
        tree.create_entry(
            finance,
            vec![
                Field::plain(FIELD_TITLE, "Broker"),
                Field::plain(FIELD_URL, "https://broker.example"),
            ],
        )
        .expect("entry");
        tree
    }

    #[test]
    fn matches_title_case_insensitively() {
        let tree = sample_tree();
        let hits = search(&tree, "bank");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Bank of Examples");
    }

    #[test]
    fn matches_other_plain_fields() {
        let tree = sample_tree();
        assert_eq!(search(&tree, "ALICE").len(), 1);
        assert_eq!(search(&tree, "broker.example").len(), 1);
    }

    #[test]
    fn matches_field_keys() {
        let tree = sample_tree();
        // Both entries carry a Title field; the key itself matches.
        assert_eq!(search(&tree, "title").len(), 2);
    }

    #[test]
    fn never_matches_protected_values() {
        let tree = sample_tree();
        assert!(search(&tree, "hunter2").is_empty());
    }

    #[test]
    fn empty_query_matches_nothing() {
        let tree = sample_tree();
        assert!(search(&tree, "").is_empty());
        assert!(search(&tree, "   ").is_empty());
    }

    #[test]
    fn no_hits_for_absent_text() {
        let tree = sample_tree();
        assert!(search(&tree, "zebra").is_empty());
    }

    #[test]
    fn recycled_entries_are_excluded() {
        let mut tree = sample_tree();
        let bank = search(&tree, "bank")[0].uuid;
        tree.delete_entry(bank, DeletePolicy::Recycle).expect("recycle");
        assert!(search(&tree, "bank").is_empty());
    }

    #[test]
    fn matches_attachment_names() {
        let mut tree = sample_tree();
        let broker = search(&tree, "broker")[0].uuid;
        tree.add_attachment(
            broker,
            crate::model::Attachment {
                name: "statement.pdf".into(),
                data: vec![1],
            },
            10,
        )
        .expect("attach");
        assert_eq!(search(&tree, "statement").len(), 1);
    }
}
