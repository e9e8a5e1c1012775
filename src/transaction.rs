//! Transaction lifecycle and undo log.
//!
//! A transaction has a monotonic id, a three-state lifecycle, and
//! `Display`/`Debug` impls for log-friendliness. Two points worth noting,
//! both recorded in `DESIGN.md`:
//!
//! - ids are assigned by the [`crate::environment::Environment`] that owns
//!   the transaction rather than from a process-global `static AtomicU64`,
//!   letting independent `Environment`s run in the same process without
//!   sharing an id space.
//! - commit/abort here only flip `state` and hand back the undo log; the
//!   actual undo replay and lock release are orchestrated by
//!   [`crate::database::Database`] and [`crate::environment::Environment`],
//!   since a `Transaction` does not itself hold a reference to the database
//!   it mutated.

use core::fmt;

use crate::error::{ShimmerError, ShimmerResult};
use crate::page::PageId;
use std::collections::HashSet;

pub type TransactionId = u64;

/// Governs which operations a transaction may perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl TransactionMode {
    pub fn allows_read(self) -> bool {
        !matches!(self, TransactionMode::WriteOnly)
    }

    pub fn allows_write(self) -> bool {
        !matches!(self, TransactionMode::ReadOnly)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

/// One reversible effect of a transaction, recorded so it can be undone in
/// reverse order on abort. Carries no table/database tag — a `Transaction`
/// only ever replays against the one database its owning environment
/// recorded for it, so a field that could only ever hold one value would
/// document nothing a reader doesn't already know.
#[derive(Debug, Clone)]
pub enum UndoEntry {
    Insert { key: Vec<u8> },
    Update { key: Vec<u8>, pre_image: Vec<u8> },
    Delete { key: Vec<u8>, pre_image: Vec<u8> },
}

/// A single transaction. Owned by the [`crate::environment::Environment`];
/// its lifetime ends at commit or abort.
pub struct Transaction {
    id: TransactionId,
    mode: TransactionMode,
    state: TransactionState,
    undo_log: Vec<UndoEntry>,
    dirty_pages: HashSet<PageId>,
}

impl Transaction {
    pub fn new(id: TransactionId, mode: TransactionMode) -> Self {
        Self {
            id,
            mode,
            state: TransactionState::Active,
            undo_log: Vec::new(),
            dirty_pages: HashSet::new(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    pub fn dirty_pages(&self) -> &HashSet<PageId> {
        &self.dirty_pages
    }

    pub fn mark_dirty(&mut self, page: PageId) {
        self.dirty_pages.insert(page);
    }

    pub fn record_insert(&mut self, key: Vec<u8>) {
        self.undo_log.push(UndoEntry::Insert { key });
    }

    pub fn record_update(&mut self, key: Vec<u8>, pre_image: Vec<u8>) {
        self.undo_log.push(UndoEntry::Update { key, pre_image });
    }

    pub fn record_delete(&mut self, key: Vec<u8>, pre_image: Vec<u8>) {
        self.undo_log.push(UndoEntry::Delete { key, pre_image });
    }

    /// Require the transaction to be active, or fail with
    /// `TransactionNotActive`.
    pub fn require_active(&self) -> ShimmerResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(ShimmerError::TransactionNotActive(self.id))
        }
    }

    /// Discard the undo log, freeing its buffers, and mark `Committed`. The
    /// caller (the database, via the environment) is responsible for any
    /// snapshot write and for releasing locks.
    pub fn commit(&mut self) -> ShimmerResult<()> {
        self.require_active()?;
        self.undo_log.clear();
        self.state = TransactionState::Committed;
        log::debug!("{} committed", self);
        Ok(())
    }

    /// Take ownership of the undo log for reverse replay, and mark
    /// `Aborted`. Returns entries in the order they must be applied — the
    /// caller replays them as-is (oldest-applied-first undoes effects in
    /// strict reverse of program order, since the caller iterates the
    /// returned vector back-to-front).
    pub fn abort(&mut self) -> ShimmerResult<Vec<UndoEntry>> {
        self.require_active()?;
        self.state = TransactionState::Aborted;
        log::debug!("{} aborted, replaying {} undo entries", self, self.undo_log.len());
        Ok(std::mem::take(&mut self.undo_log))
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "tx#{}", self.id)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}
