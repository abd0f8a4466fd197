#![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

//! End-to-end round-trips through the database service: create →
//! mutate → save → reopen, across cipher, compression, and KDF choices.

use chrono::{TimeZone, Utc};
use coffre_db::{
    Attachment, CancelToken, CipherKind, CompositeKey, Compression, Database, DatabaseConfig,
    DatabaseError, Field, FieldValue, KdfParams, FIELD_PASSWORD, FIELD_TITLE, FIELD_USERNAME,
};

/// Cheap KDF costs so the suite stays fast.
fn fast_argon2() -> KdfParams {
    KdfParams::Argon2id {
        m_cost: 32,
        t_cost: 1,
        p_cost: 1,
    }
}

fn fast_pbkdf2() -> KdfParams {
    KdfParams::Pbkdf2Sha256 { rounds: 16 }
}

fn test_config() -> DatabaseConfig {
    DatabaseConfig {
        kdf: fast_argon2(),
        ..DatabaseConfig::default()
    }
}

fn key(passphrase: &[u8]) -> CompositeKey {
    CompositeKey::from_passphrase(passphrase)
}

/// The specification scenario: "correct-horse" / Finance / Bank.
#[test]
fn finance_bank_scenario() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("scenario.coffre");
    let cancel = CancelToken::new();

    let mut db = Database::create(key(b"correct-horse"), test_config());
    let finance = db.create_group(db.root_id(), "Finance").expect("group");
    let bank = db
        .create_entry(
            finance,
            vec![
                Field::plain(FIELD_TITLE, "Bank"),
                Field::protected(FIELD_PASSWORD, "secret1"),
            ],
        )
        .expect("entry");
    db.save_to(&path, &cancel).expect("save");

    // Reopen with the right passphrase: Root → Finance → Bank intact.
    let reopened = Database::open(&path, key(b"correct-horse"), &cancel).expect("open");
    let (groups, _) = reopened.list_children(reopened.root_id()).expect("children");
    let finance_view = groups.iter().find(|g| g.name == "Finance").expect("Finance");
    assert_eq!(finance_view.uuid, finance);

    let (_, entries) = reopened.list_children(finance).expect("children");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].uuid, bank);
    assert_eq!(entries[0].title, "Bank");

    let view = reopened.get_entry(bank).expect("entry");
    let FieldValue::Protected(password) = &view
        .fields
        .iter()
        .find(|f| f.key == FIELD_PASSWORD)
        .expect("password field")
        .value
    else {
        panic!("password must be protected");
    };
    assert_eq!(password.expose(), b"secret1");

    // Reopen with the wrong passphrase: conflated rejection, no tree.
    let err = Database::open(&path, key(b"wrong-horse"), &cancel).expect_err("must fail");
    assert!(matches!(err, DatabaseError::WrongKeyOrTampered));
}

/// Deleting a populated group relocates its entries per policy — never
/// an orphan.
#[test]
fn delete_populated_group_recycles_contents() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("recycle.coffre");
    let cancel = CancelToken::new();

    let mut db = Database::create(key(b"correct-horse"), test_config());
    let finance = db.create_group(db.root_id(), "Finance").expect("group");
    let bank = db
        .create_entry(finance, vec![Field::plain(FIELD_TITLE, "Bank")])
        .expect("entry");

    db.delete_group(finance).expect("delete");
    let bin = db.recycle_bin_id().expect("bin created");
    assert!(db.tree().in_recycle_bin(bank), "entry rode along into the bin");
    db.tree().check_invariants().expect("invariants");

    // The bin and its contents survive a save/reopen cycle.
    db.save_to(&path, &cancel).expect("save");
    let reopened = Database::open(&path, key(b"correct-horse"), &cancel).expect("open");
    assert_eq!(reopened.recycle_bin_id(), Some(bin));
    assert!(reopened.tree().in_recycle_bin(bank));
    reopened.tree().check_invariants().expect("invariants");
}

/// Full-feature tree: nested groups, history, attachments, expiry,
/// custom fields — everything survives structurally intact.
#[test]
fn rich_tree_roundtrips_exactly() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("rich.coffre");
    let cancel = CancelToken::new();

    let mut db = Database::create(key(b"correct-horse"), test_config());
    let work = db.create_group(db.root_id(), "Work").expect("group");
    let servers = db.create_group(work, "Servers").expect("group");

    let entry = db
        .create_entry(
            servers,
            vec![
                Field::plain(FIELD_TITLE, "Bastion"),
                Field::plain(FIELD_USERNAME, "ops"),
                Field::protected(FIELD_PASSWORD, "pw-v1"),
                Field::protected("API Token", "tok_123"),
                Field::plain("Port", "2222"),
            ],
        )
        .expect("entry");
    db.update_entry(
        entry,
        vec![
            Field::plain(FIELD_TITLE, "Bastion"),
            Field::protected(FIELD_PASSWORD, "pw-v2"),
        ],
    )
    .expect("update");
    db.add_attachment(
        entry,
        Attachment {
            name: "id_ed25519.pub".into(),
            data: b"ssh-ed25519 AAAA...".to_vec(),
        },
    )
    .expect("attachment");
    let deadline = Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).single().expect("date");
    db.set_entry_expiry(entry, Some(deadline)).expect("expiry");

    db.save_to(&path, &cancel).expect("save");
    let reopened = Database::open(&path, key(b"correct-horse"), &cancel).expect("open");

    assert_eq!(reopened.tree(), db.tree(), "structural equality");
    let view = reopened.get_entry(entry).expect("entry");
    assert_eq!(view.times.expires, Some(deadline));
    assert_eq!(view.attachment_names, vec!["id_ed25519.pub"]);
    assert_eq!(view.history_len, 2, "create-fields update + attachment update");

    let history = reopened.entry_history(entry).expect("history");
    let first = history.first().expect("first snapshot");
    assert!(first.fields.iter().any(|f| f.key == "API Token"));
}

/// Every current-format cipher/compression/KDF combination round-trips.
#[test]
fn algorithm_matrix_roundtrips() {
    let cancel = CancelToken::new();
    let dir = tempfile::tempdir().expect("tempdir");

    for (i, cipher) in [CipherKind::Aes256Gcm, CipherKind::ChaCha20Poly1305]
        .into_iter()
        .enumerate()
    {
        for (j, compression) in [Compression::None, Compression::Gzip].into_iter().enumerate() {
            for (k, kdf) in [fast_argon2(), fast_pbkdf2()].into_iter().enumerate() {
                let path = dir.path().join(format!("matrix-{i}-{j}-{k}.coffre"));
                let config = DatabaseConfig {
                    cipher,
                    compression,
                    kdf,
                    ..DatabaseConfig::default()
                };
                let mut db = Database::create(key(b"matrix"), config);
                db.create_entry(
                    db.root_id(),
                    vec![
                        Field::plain(FIELD_TITLE, "Probe"),
                        Field::protected(FIELD_PASSWORD, "p@ss"),
                    ],
                )
                .expect("entry");
                db.save_to(&path, &cancel).expect("save");

                let reopened = Database::open(&path, key(b"matrix"), &cancel).expect("open");
                assert_eq!(reopened.tree(), db.tree(), "{cipher:?}/{compression:?}");
                assert_eq!(reopened.config().cipher, cipher);
                assert_eq!(reopened.config().compression, compression);
            }
        }
    }
}

/// Two consecutive saves of an unmodified database reopen to identical
/// trees (seeds and IVs rotate, content does not).
#[test]
fn consecutive_saves_reopen_identically() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path_a = dir.path().join("a.coffre");
    let path_b = dir.path().join("b.coffre");
    let cancel = CancelToken::new();

    let mut db = Database::create(key(b"correct-horse"), test_config());
    db.create_entry(db.root_id(), vec![Field::plain(FIELD_TITLE, "Stable")])
        .expect("entry");
    db.save_to(&path_a, &cancel).expect("save a");
    db.save_to(&path_b, &cancel).expect("save b");

    // Fresh randomness means the bytes differ...
    assert_ne!(
        std::fs::read(&path_a).expect("read a"),
        std::fs::read(&path_b).expect("read b")
    );
    // ...but both decrypt to the same tree.
    let a = Database::open(&path_a, key(b"correct-horse"), &cancel).expect("open a");
    let b = Database::open(&path_b, key(b"correct-horse"), &cancel).expect("open b");
    assert_eq!(a.tree(), b.tree());
}

/// Search across a reopened database finds plain data only.
#[test]
fn search_after_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("search.coffre");
    let cancel = CancelToken::new();

    let mut db = Database::create(key(b"correct-horse"), test_config());
    db.create_entry(
        db.root_id(),
        vec![
            Field::plain(FIELD_TITLE, "Mail account"),
            Field::protected(FIELD_PASSWORD, "deep-secret"),
        ],
    )
    .expect("entry");
    db.save_to(&path, &cancel).expect("save");

    let reopened = Database::open(&path, key(b"correct-horse"), &cancel).expect("open");
    assert_eq!(reopened.search("mail").expect("search").len(), 1);
    assert!(reopened.search("deep-secret").expect("search").is_empty());
}
