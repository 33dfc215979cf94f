//! End-to-end store scenarios over the XC backend.

mod support;

use std::sync::Arc;

use cairn::core::agent::CachingAgent;
use cairn::core::cipher::xc::KdfParams;
use cairn::core::cipher::{Crypto, Keyring, Xc};
use cairn::core::domain::Secret;
use cairn::core::storage::StorageBackend;
use cairn::error::{Error, StoreError};
use support::{Test, PASSPHRASE};

#[test]
fn test_set_then_get_round_trips() {
    let t = Test::new();
    let opts = t.opts();
    let r1 = t.key("r1");
    let leaf = t.leaf("", "s", StorageBackend::Fs, &[r1.clone()]);

    leaf.set(&opts, "note", &Secret::from("hunter2\nhello")).unwrap();
    assert_eq!(leaf.get(&opts, "note").unwrap().bytes(), b"hunter2\nhello");
    assert_eq!(leaf.recipient_ids(&opts, "note").unwrap(), vec![r1]);
}

#[test]
fn test_added_recipient_can_decrypt_alone() {
    let t = Test::new();
    let opts = t.opts();
    let r1 = t.key("r1");
    let r2 = t.key("r2");
    let leaf = t.leaf("", "s", StorageBackend::Fs, &[r1.clone()]);
    leaf.set(&opts, "note", &Secret::from("hunter2\nhello")).unwrap();

    leaf.add_recipient(&opts, &r2).unwrap();
    assert_eq!(leaf.get(&opts, "note").unwrap().bytes(), b"hunter2\nhello");
    let mut want = vec![r1.clone(), r2.clone()];
    want.sort();
    assert_eq!(leaf.recipient_ids(&opts, "note").unwrap(), want);

    let other = Xc::in_memory(
        Arc::new(CachingAgent::fixed(PASSPHRASE)),
        KdfParams::insecure_fast(),
    );
    other
        .import_private_key(&t.xc.export_private_key(&r2).unwrap())
        .unwrap();
    other
        .import_public_key(&opts, &t.xc.export_public_key(&opts, &r1).unwrap())
        .unwrap();
    let ciphertext = std::fs::read(t.path("s").join("note.xc")).unwrap();
    let plaintext = other.decrypt(&opts, &ciphertext).unwrap();
    assert_eq!(plaintext.as_slice(), b"hunter2\nhello");
}

#[test]
fn test_move_keeps_plaintext() {
    let t = Test::new();
    let opts = t.opts();
    let r1 = t.key("r1");
    let r2 = t.key("r2");
    let root = t.root(t.leaf("", "s", StorageBackend::Fs, &[r1, r2]));
    root.set(&opts, "note", &Secret::from("hunter2\nhello")).unwrap();

    root.move_secret(&opts, "note", "archive/note").unwrap();
    assert!(!root.exists(&opts, "note"));
    assert!(root.exists(&opts, "archive/note"));
    assert_eq!(
        root.get(&opts, "archive/note").unwrap().bytes(),
        b"hunter2\nhello"
    );
}

#[test]
fn test_mounts_in_tree_and_delete_guard() {
    let t = Test::new();
    let opts = t.opts();
    let r1 = t.key("r1");
    let work = t.leaf("", "work", StorageBackend::Fs, &[r1.clone()]);
    work.set(&opts, "secret", &Secret::from("pw")).unwrap();

    let mut root = t.root(t.leaf("", "root", StorageBackend::Fs, &[r1]));
    root.set(&opts, "foo/bar", &Secret::from("bar")).unwrap();
    root.add_mount(&opts, "work", &t.path("work"), &[]).unwrap();

    assert_eq!(root.list(&opts).unwrap(), vec!["foo/bar", "work/secret"]);
    assert_eq!(root.get(&opts, "work/secret").unwrap().bytes(), b"pw");

    let err = root.delete(&opts, "work").unwrap_err();
    assert!(matches!(err, Error::Store(StoreError::MountPoint(_))));
    assert!(root.exists(&opts, "work/secret"));
}

#[test]
fn test_fsck_repairs_superset_once() {
    skip_without_git!();
    let t = Test::new();
    let opts = t.opts();
    let r1 = t.key("r1");
    let r2 = t.key("r2");
    let leaf = t.leaf("", "s", StorageBackend::GitFs, &[r1.clone(), r2]);
    leaf.set(&opts, "note", &Secret::from("pw")).unwrap();
    leaf.set_recipients(&opts, &[r1.clone()]).unwrap();

    let report = leaf.fsck(&opts, "").unwrap();
    assert_eq!(report.fixed, vec!["note".to_string()]);
    assert_eq!(t.last_commit("s"), "fsck fix recipients");
    assert_eq!(leaf.recipient_ids(&opts, "note").unwrap(), vec![r1]);

    let commits = t.commit_count("s");
    let again = leaf.fsck(&opts, "").unwrap();
    assert!(again.fixed.is_empty());
    assert_eq!(t.commit_count("s"), commits);
}

#[test]
fn test_sneaky_names_are_rejected() {
    let t = Test::new();
    let opts = t.opts();
    let r1 = t.key("r1");
    let leaf = t.leaf("", "s", StorageBackend::Fs, &[r1]);
    let err = leaf
        .set(&opts, "../escape", &Secret::from("pw"))
        .unwrap_err();
    assert_eq!(err.kind(), cairn::error::ErrorKind::Sneaky);
    assert!(!t.path("escape.xc").exists());
}
