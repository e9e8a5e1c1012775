mod common;

use shimmer::{Environment, Schema, ShimmerError, TransactionMode, Value};

#[test]
fn commit_makes_writes_visible_to_later_transactions() {
    common::setup();
    let mut env = Environment::new();
    let db = env.open_database("accounts");
    env.database_mut(db).unwrap().set_immutable(false);

    let writer = env.begin_txn(TransactionMode::ReadWrite);
    env.put(writer, db, b"alice", b"100").unwrap();
    env.commit_txn(writer).unwrap();

    let reader = env.begin_txn(TransactionMode::ReadOnly);
    assert_eq!(env.get(reader, db, b"alice").unwrap(), Some(b"100".to_vec()));
    env.commit_txn(reader).unwrap();
}

#[test]
fn abort_undoes_inserts_updates_and_deletes() {
    common::setup();
    let mut env = Environment::new();
    let db = env.open_database("accounts");
    env.database_mut(db).unwrap().set_immutable(false);

    let setup_txn = env.begin_txn(TransactionMode::ReadWrite);
    env.put(setup_txn, db, b"alice", b"100").unwrap();
    env.commit_txn(setup_txn).unwrap();

    let txn = env.begin_txn(TransactionMode::ReadWrite);
    env.put(txn, db, b"alice", b"200").unwrap(); // update
    env.put(txn, db, b"bob", b"50").unwrap(); // insert
    env.delete(txn, db, b"alice").unwrap(); // delete the just-updated row
    env.abort_txn(txn).unwrap();

    let reader = env.begin_txn(TransactionMode::ReadOnly);
    assert_eq!(env.get(reader, db, b"alice").unwrap(), Some(b"100".to_vec()));
    assert_eq!(env.get(reader, db, b"bob").unwrap(), None);
}

#[test]
fn a_freshly_opened_database_is_immutable_until_opted_out() {
    common::setup();
    let mut env = Environment::new();
    let db = env.open_database("accounts");
    assert!(env.database(db).unwrap().is_immutable());

    let txn = env.begin_txn(TransactionMode::ReadWrite);
    env.put(txn, db, b"alice", b"100").unwrap();
    let err = env.put(txn, db, b"alice", b"200");
    assert!(matches!(err, Err(ShimmerError::KeyExists { .. })));

    let err = env.delete(txn, db, b"alice");
    assert!(matches!(err, Err(ShimmerError::InvalidDatabase(_))));
}

#[test]
fn a_read_only_transaction_cannot_write() {
    common::setup();
    let mut env = Environment::new();
    let db = env.open_database("accounts");
    env.database_mut(db).unwrap().set_immutable(false);

    let txn = env.begin_txn(TransactionMode::ReadOnly);
    let err = env.put(txn, db, b"alice", b"100");
    assert!(matches!(err, Err(ShimmerError::InvalidTransaction(_))));
}

#[test]
fn operating_after_commit_is_rejected() {
    common::setup();
    let mut env = Environment::new();
    let db = env.open_database("accounts");
    env.database_mut(db).unwrap().set_immutable(false);

    let txn = env.begin_txn(TransactionMode::ReadWrite);
    env.put(txn, db, b"alice", b"100").unwrap();
    env.commit_txn(txn).unwrap();

    assert!(matches!(
        env.put(txn, db, b"alice", b"200"),
        Err(ShimmerError::InvalidTransaction(_))
    ));
}

#[test]
fn typed_values_round_trip_through_the_schema() {
    common::setup();
    let mut env = Environment::new();
    let db = env.open_database("ledger");
    env.database_mut(db).unwrap().set_immutable(false);

    let schema = Schema::Record(vec![
        ("balance".to_string(), Schema::Int(64)),
        ("active".to_string(), Schema::Bool),
    ]);
    let value = Value::Record(vec![
        ("balance".to_string(), Value::from_i64(-42)),
        ("active".to_string(), Value::from_bool(true)),
    ]);

    let txn = env.begin_txn(TransactionMode::ReadWrite);
    env.put_typed(txn, db, b"alice", &schema, &value).unwrap();
    let read_back = env.get_typed(txn, db, b"alice", &schema).unwrap();
    assert_eq!(read_back, Some(value));
    env.commit_txn(txn).unwrap();
}
