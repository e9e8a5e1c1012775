mod common;

use rand::seq::SliceRandom;
use rand::Rng;
use shimmer::{Environment, TransactionMode, MAX_KEYS_PER_PAGE};

#[test]
fn inserting_past_one_page_then_reading_every_key_back_survives_splits() {
    common::setup();
    let mut env = Environment::new();
    let db = env.open_database("wide");
    env.database_mut(db).unwrap().set_immutable(false);

    let count = (MAX_KEYS_PER_PAGE * 3 + 17) as u32;
    let txn = env.begin_txn(TransactionMode::ReadWrite);
    for i in 0..count {
        env.put(txn, db, &i.to_be_bytes(), &i.to_be_bytes()).unwrap();
    }
    for i in 0..count {
        assert_eq!(
            env.get(txn, db, &i.to_be_bytes()).unwrap(),
            Some(i.to_be_bytes().to_vec()),
            "key {} missing after splitting across pages",
            i
        );
    }
    env.commit_txn(txn).unwrap();
}

#[test]
fn deleting_every_key_shrinks_the_tree_back_to_an_empty_root() {
    common::setup();
    let mut env = Environment::new();
    let db = env.open_database("shrinking");
    env.database_mut(db).unwrap().set_immutable(false);

    let count = (MAX_KEYS_PER_PAGE * 2 + 5) as u32;
    let txn = env.begin_txn(TransactionMode::ReadWrite);
    for i in 0..count {
        env.put(txn, db, &i.to_be_bytes(), &i.to_be_bytes()).unwrap();
    }
    for i in 0..count {
        env.delete(txn, db, &i.to_be_bytes()).unwrap();
    }
    for i in 0..count {
        assert_eq!(env.get(txn, db, &i.to_be_bytes()).unwrap(), None);
    }
    env.commit_txn(txn).unwrap();
}

#[test]
fn out_of_order_inserts_still_read_back_correctly() {
    common::setup();
    let mut env = Environment::new();
    let db = env.open_database("shuffled");
    env.database_mut(db).unwrap().set_immutable(false);

    // A fixed, deliberately non-monotonic permutation so the tree has to
    // split leaves in the middle of its key range, not just at the end.
    let mut keys: Vec<u32> = (0..(MAX_KEYS_PER_PAGE as u32 + 40)).collect();
    keys.rotate_left(MAX_KEYS_PER_PAGE as usize / 3);
    keys.reverse();

    let txn = env.begin_txn(TransactionMode::ReadWrite);
    for &k in &keys {
        env.put(txn, db, &k.to_be_bytes(), &k.to_be_bytes()).unwrap();
    }
    for &k in &keys {
        assert_eq!(env.get(txn, db, &k.to_be_bytes()).unwrap(), Some(k.to_be_bytes().to_vec()));
    }
    env.commit_txn(txn).unwrap();
}

/// Randomized insertion order plus a randomized subset of deletes, checked
/// against a plain `HashMap` oracle built from the same operations. Grounded
/// in the teacher's own randomized B+-tree stress tests
/// (`tests/integretions/btree_test.rs`, `concurrent_test.rs`), which use
/// `rand::thread_rng()` to generate insertion values and pick deletion
/// targets rather than walking a fixed sequence.
#[test]
fn randomized_insert_delete_sequence_matches_a_hash_map_oracle() {
    common::setup();
    let mut rng = rand::thread_rng();

    let mut env = Environment::new();
    let db = env.open_database("fuzzed");
    env.database_mut(db).unwrap().set_immutable(false);
    let txn = env.begin_txn(TransactionMode::ReadWrite);

    let mut oracle = std::collections::HashMap::new();
    let mut keys: Vec<u32> = (0..(MAX_KEYS_PER_PAGE as u32 * 2)).collect();
    keys.shuffle(&mut rng);

    for &k in &keys {
        let value: u32 = rng.gen();
        env.put(txn, db, &k.to_be_bytes(), &value.to_be_bytes()).unwrap();
        oracle.insert(k, value);
    }

    let mut to_delete = keys.clone();
    to_delete.shuffle(&mut rng);
    to_delete.truncate(keys.len() / 3);
    for &k in &to_delete {
        env.delete(txn, db, &k.to_be_bytes()).unwrap();
        oracle.remove(&k);
    }

    for &k in &keys {
        let expected = oracle.get(&k).map(|v| v.to_be_bytes().to_vec());
        assert_eq!(env.get(txn, db, &k.to_be_bytes()).unwrap(), expected, "mismatch for key {}", k);
    }
    env.commit_txn(txn).unwrap();
}
