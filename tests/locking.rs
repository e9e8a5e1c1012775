mod common;

use std::time::Instant;

use shimmer::{Environment, ShimmerError, TransactionMode};

#[test]
fn two_readers_see_each_other_fine() {
    common::setup();
    let mut env = Environment::new();
    let db = env.open_database("shared");
    env.database_mut(db).unwrap().set_immutable(false);

    let writer = env.begin_txn(TransactionMode::ReadWrite);
    env.put(writer, db, b"alice", b"100").unwrap();
    env.commit_txn(writer).unwrap();

    let reader_a = env.begin_txn(TransactionMode::ReadOnly);
    let reader_b = env.begin_txn(TransactionMode::ReadOnly);
    assert_eq!(env.get(reader_a, db, b"alice").unwrap(), Some(b"100".to_vec()));
    assert_eq!(env.get(reader_b, db, b"alice").unwrap(), Some(b"100".to_vec()));
    env.commit_txn(reader_a).unwrap();
    env.commit_txn(reader_b).unwrap();
}

#[test]
fn releasing_a_writers_locks_lets_a_blocked_writer_through_immediately() {
    common::setup();
    let mut env = Environment::new();
    let db = env.open_database("contended");
    env.database_mut(db).unwrap().set_immutable(false);

    let holder = env.begin_txn(TransactionMode::ReadWrite);
    env.put(holder, db, b"key", b"1").unwrap();
    // Releasing before the second writer ever asks for the page means this
    // completes immediately rather than waiting out the lock timeout.
    env.commit_txn(holder).unwrap();

    let second = env.begin_txn(TransactionMode::ReadWrite);
    env.put(second, db, b"key", b"2").unwrap();
    env.commit_txn(second).unwrap();
}

/// A second writer that conflicts on the same page and never gets released
/// to it waits out the lock timeout rather than succeeding or hanging
/// forever. This test takes a few real seconds because it exercises that
/// timeout rather than mocking the clock.
#[test]
fn a_writer_blocked_on_an_uncommitted_holder_eventually_times_out() {
    common::setup();
    let mut env = Environment::new();
    let db = env.open_database("blocked");
    env.database_mut(db).unwrap().set_immutable(false);

    let holder = env.begin_txn(TransactionMode::ReadWrite);
    env.put(holder, db, b"key", b"1").unwrap(); // never committed or aborted

    let blocked = env.begin_txn(TransactionMode::ReadWrite);
    let started = Instant::now();
    let result = env.put(blocked, db, b"key", b"2");
    assert!(matches!(result, Err(ShimmerError::LockTimeout { .. })));
    assert!(started.elapsed().as_secs() >= 4);
}
