mod common;

use shimmer::{Environment, TransactionMode};

#[test]
fn committing_dirty_pages_persists_them_to_the_snapshot_file() {
    common::setup();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("accounts.shimmer");

    let mut env = Environment::new();
    let db = env.open_database("accounts");
    {
        let handle = env.database_mut(db).unwrap();
        handle.set_immutable(false);
        handle.enable_disk_storage(&path, true).unwrap();
    }

    let txn = env.begin_txn(TransactionMode::ReadWrite);
    env.put(txn, db, b"alice", b"100").unwrap();
    env.put(txn, db, b"bob", b"50").unwrap();
    env.commit_txn(txn).unwrap();

    assert!(path.exists());

    let mut reopened = Environment::new();
    let db2 = reopened.open_database("accounts");
    {
        let handle = reopened.database_mut(db2).unwrap();
        handle.set_immutable(false);
        handle.enable_disk_storage(&path, true).unwrap();
    }
    let reader = reopened.begin_txn(TransactionMode::ReadOnly);
    assert_eq!(reopened.get(reader, db2, b"alice").unwrap(), Some(b"100".to_vec()));
    assert_eq!(reopened.get(reader, db2, b"bob").unwrap(), Some(b"50".to_vec()));
}

#[test]
fn a_read_only_commit_does_not_touch_the_snapshot_file() {
    common::setup();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("untouched.shimmer");

    let mut env = Environment::new();
    let db = env.open_database("readonly");
    env.database_mut(db)
        .unwrap()
        .enable_disk_storage(&path, true)
        .unwrap();

    let txn = env.begin_txn(TransactionMode::ReadOnly);
    let _ = env.get(txn, db, b"missing").unwrap();
    env.commit_txn(txn).unwrap();

    assert!(!path.exists());
}
