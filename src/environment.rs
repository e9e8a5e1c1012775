//! The top-level entry point.
//!
//! An [`Environment`] owns every open [`Database`] and every in-flight
//! [`Transaction`] in one process. It is an ordinary value the caller opens
//! and passes around rather than a process-wide singleton, so two
//! independent environments can coexist in one process (e.g. in tests).
//!
//! The tricky part of this module is routing a deadlock victim's forced
//! abort back through the registry without a double mutable borrow: a
//! `Database::put`/`get`/`delete` call needs `&mut Database` for the whole
//! duration of its call, but resolving a victim means touching some *other*
//! transaction and (usually) some other database at the same time. The
//! pattern used throughout is: remove the transaction and database this
//! call needs from their maps, run the call with a closure that only
//! records victim ids into a local `Vec` (no `self` access), put both back,
//! and only then — with nothing of this call's still borrowed — fully abort
//! each recorded victim by the same remove/operate/reinsert dance.

use std::collections::HashMap;
use std::sync::Arc;

use crate::database::Database;
use crate::error::{ShimmerError, ShimmerResult};
use crate::observation::{NoopObserver, Observer, Span};
use crate::transaction::{Transaction, TransactionId, TransactionMode};
use crate::value::{Schema, Value};

pub struct Environment {
    databases: HashMap<u32, Database>,
    db_ids_by_name: HashMap<String, u32>,
    next_db_id: u32,
    transactions: HashMap<TransactionId, Transaction>,
    next_txn_id: TransactionId,
    /// Which database a transaction's operations have touched. Spec section
    /// 4.4's own "known simplification": a transaction is assumed to touch
    /// at most one database, so only the most recent is remembered and
    /// targeted on abort.
    txn_database: HashMap<TransactionId, u32>,
    observer: Arc<dyn Observer>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    pub fn new() -> Self {
        Self::with_observer(Arc::new(NoopObserver))
    }

    pub fn with_observer(observer: Arc<dyn Observer>) -> Self {
        Self {
            databases: HashMap::new(),
            db_ids_by_name: HashMap::new(),
            next_db_id: 1,
            transactions: HashMap::new(),
            next_txn_id: 1,
            txn_database: HashMap::new(),
            observer,
        }
    }

    /// Open a database by name, creating it if this is the first time it's
    /// been seen (spec section 4.6, "Open database"). Idempotent: opening
    /// the same name twice returns the same id.
    pub fn open_database(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.db_ids_by_name.get(name) {
            return id;
        }
        let id = self.next_db_id;
        self.next_db_id += 1;
        self.databases.insert(id, Database::open(id, name));
        self.db_ids_by_name.insert(name.to_string(), id);
        id
    }

    pub fn database(&self, id: u32) -> ShimmerResult<&Database> {
        self.databases
            .get(&id)
            .ok_or_else(|| ShimmerError::InvalidDatabase(id.to_string()))
    }

    pub fn database_mut(&mut self, id: u32) -> ShimmerResult<&mut Database> {
        self.databases
            .get_mut(&id)
            .ok_or_else(|| ShimmerError::InvalidDatabase(id.to_string()))
    }

    /// Begin a new transaction, returning the id the caller uses for every
    /// subsequent operation (spec section 4.4, "Begin").
    pub fn begin_txn(&mut self, mode: TransactionMode) -> TransactionId {
        let id = self.next_txn_id;
        self.next_txn_id += 1;
        self.transactions.insert(id, Transaction::new(id, mode));
        log::debug!("tx#{} began ({:?})", id, mode);
        id
    }

    pub fn get(&mut self, txn_id: TransactionId, db_id: u32, key: &[u8]) -> ShimmerResult<Option<Vec<u8>>> {
        let span = Span::start("environment.get").tag("db", db_id).tag("txn", txn_id);
        let result = self.with_txn_and_db(txn_id, db_id, |db, txn, on_victim| db.get(txn, key, on_victim));
        span.finish(self.observer.as_ref());
        result
    }

    pub fn get_typed(
        &mut self,
        txn_id: TransactionId,
        db_id: u32,
        key: &[u8],
        schema: &Schema,
    ) -> ShimmerResult<Option<Value>> {
        self.with_txn_and_db(txn_id, db_id, |db, txn, on_victim| {
            db.get_typed(txn, key, schema, on_victim)
        })
    }

    pub fn put(&mut self, txn_id: TransactionId, db_id: u32, key: &[u8], value: &[u8]) -> ShimmerResult<()> {
        let span = Span::start("environment.put").tag("db", db_id).tag("txn", txn_id);
        let result = self.with_txn_and_db(txn_id, db_id, |db, txn, on_victim| db.put(txn, key, value, on_victim));
        span.finish(self.observer.as_ref());
        result
    }

    pub fn put_typed(
        &mut self,
        txn_id: TransactionId,
        db_id: u32,
        key: &[u8],
        schema: &Schema,
        value: &Value,
    ) -> ShimmerResult<()> {
        self.with_txn_and_db(txn_id, db_id, |db, txn, on_victim| {
            db.put_typed(txn, key, schema, value, on_victim)
        })
    }

    pub fn delete(&mut self, txn_id: TransactionId, db_id: u32, key: &[u8]) -> ShimmerResult<()> {
        let span = Span::start("environment.delete").tag("db", db_id).tag("txn", txn_id);
        let result = self.with_txn_and_db(txn_id, db_id, |db, txn, on_victim| db.delete(txn, key, on_victim));
        span.finish(self.observer.as_ref());
        result
    }

    /// Commit a transaction (spec section 4.4, "Commit"): discard its undo
    /// log, snapshot its database if one has disk storage enabled and dirty
    /// pages exist, release its locks, and forget it.
    pub fn commit_txn(&mut self, txn_id: TransactionId) -> ShimmerResult<()> {
        let mut txn = self.take_txn(txn_id)?;
        let db_id = self.txn_database.remove(&txn_id);
        let dirty = !txn.dirty_pages().is_empty();
        txn.commit()?;

        if let Some(db_id) = db_id {
            if let Some(db) = self.databases.get(&db_id) {
                if dirty && db.has_disk_storage() {
                    db.write_snapshot()?;
                }
                db.release_locks(txn_id);
            }
        }
        log::debug!("tx#{} committed", txn_id);
        Ok(())
    }

    /// Abort a transaction (spec section 4.4, "Abort"): replay its undo log
    /// against the database it touched, release its locks, and forget it.
    pub fn abort_txn(&mut self, txn_id: TransactionId) -> ShimmerResult<()> {
        let mut txn = self.take_txn(txn_id)?;
        let db_id = self.txn_database.remove(&txn_id);
        let undo_log = txn.abort()?;

        if let Some(db_id) = db_id {
            if let Some(mut db) = self.databases.remove(&db_id) {
                db.replay_undo(undo_log);
                db.release_locks(txn_id);
                self.databases.insert(db_id, db);
            }
        }
        log::debug!("tx#{} aborted", txn_id);
        Ok(())
    }

    /// Run `op` against the named transaction and database, recording the db
    /// as touched by the transaction and handing off any deadlock victim for
    /// a full abort once both are safely back in their registries.
    fn with_txn_and_db<T>(
        &mut self,
        txn_id: TransactionId,
        db_id: u32,
        op: impl FnOnce(&mut Database, &mut Transaction, &mut dyn FnMut(TransactionId)) -> ShimmerResult<T>,
    ) -> ShimmerResult<T> {
        let mut txn = self.take_txn(txn_id)?;
        let mut db = self.take_db(db_id)?;
        self.txn_database.insert(txn_id, db_id);

        let mut victims = Vec::new();
        let result = op(&mut db, &mut txn, &mut |victim| victims.push(victim));

        self.databases.insert(db_id, db);
        self.transactions.insert(txn_id, txn);

        for victim in victims {
            self.force_abort_victim(victim);
        }

        result
    }

    /// Fully abort a transaction the lock manager chose as a deadlock
    /// victim: it has already had its locks stripped (spec section 4.5,
    /// "Acquire" step 4), but its undo log still needs replaying and its
    /// registry entries still need removing.
    fn force_abort_victim(&mut self, victim: TransactionId) {
        let Some(mut txn) = self.transactions.remove(&victim) else {
            return;
        };
        let db_id = self.txn_database.remove(&victim);
        let Ok(undo_log) = txn.abort() else {
            return;
        };
        if let Some(db_id) = db_id {
            if let Some(mut db) = self.databases.remove(&db_id) {
                db.replay_undo(undo_log);
                db.release_locks(victim);
                self.databases.insert(db_id, db);
            }
        }
        log::info!("tx#{} force-aborted to resolve a deadlock", victim);
    }

    fn take_txn(&mut self, id: TransactionId) -> ShimmerResult<Transaction> {
        self.transactions
            .remove(&id)
            .ok_or(ShimmerError::InvalidTransaction(id))
    }

    fn take_db(&mut self, id: u32) -> ShimmerResult<Database> {
        self.databases
            .remove(&id)
            .ok_or_else(|| ShimmerError::InvalidDatabase(id.to_string()))
    }
}
