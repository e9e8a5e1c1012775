use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use super::wait_for_graph::WaitForGraph;
use super::{LockMode, ResourceId};
use crate::error::{ShimmerError, ShimmerResult};
use crate::transaction::TransactionId;
use crate::utils::HandyLock;

const PAGE_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const RECORD_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const DATABASE_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

struct Granted {
    tid: TransactionId,
    mode: LockMode,
}

struct Waiting {
    tid: TransactionId,
    mode: LockMode,
}

#[derive(Default)]
struct Inner {
    granted: HashMap<ResourceId, Vec<Granted>>,
    waiting: HashMap<ResourceId, VecDeque<Waiting>>,
    held_by_tx: HashMap<TransactionId, HashSet<ResourceId>>,
    wait_for: WaitForGraph,
}

/// What happened as a side effect of a successful [`LockManager::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The lock was granted without disturbing anyone else.
    Granted,
    /// A deadlock was detected and `self` was not the chosen victim; the
    /// named transaction had all of its locks forcibly stripped to grant
    /// this request. The caller (the database / environment layer) still
    /// owes that transaction a full abort — undo log replay and removal
    /// from the transaction registry — since this manager only owns lock
    /// state, not undo logs.
    GrantedAfterAbortingVictim(TransactionId),
}

/// Multi-granularity lock manager. Owns its own mutex; the caller never
/// needs external synchronization around it.
///
/// Blocking acquisition waits on a single shared condition variable rather
/// than polling in a sleep loop.
pub struct LockManager {
    inner: Mutex<Inner>,
    cv: Condvar,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            cv: Condvar::new(),
        }
    }

    pub fn lock_page(
        &self,
        tid: TransactionId,
        page_id: u64,
        mode: LockMode,
    ) -> ShimmerResult<AcquireOutcome> {
        self.acquire(tid, ResourceId::page(page_id), mode, PAGE_LOCK_TIMEOUT)
    }

    pub fn lock_record(
        &self,
        tid: TransactionId,
        page_id: u64,
        key: &[u8],
        mode: LockMode,
    ) -> ShimmerResult<AcquireOutcome> {
        self.acquire(
            tid,
            ResourceId::record(page_id, key),
            mode,
            RECORD_LOCK_TIMEOUT,
        )
    }

    pub fn lock_database(
        &self,
        tid: TransactionId,
        db_id: u32,
        mode: LockMode,
    ) -> ShimmerResult<AcquireOutcome> {
        self.acquire(tid, ResourceId::database(db_id), mode, DATABASE_LOCK_TIMEOUT)
    }

    /// Core acquisition algorithm.
    pub fn acquire(
        &self,
        tid: TransactionId,
        resource: ResourceId,
        mode: LockMode,
        timeout: Duration,
    ) -> ShimmerResult<AcquireOutcome> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.ml();
        let mut victim_aborted: Option<TransactionId> = None;

        loop {
            // Step 1: a request the requester already holds upgrades in place.
            if let Some(list) = guard.granted.get_mut(&resource) {
                if let Some(existing) = list.iter_mut().find(|g| g.tid == tid) {
                    if existing.mode == mode || existing.mode.can_upgrade_to(mode) {
                        existing.mode = mode;
                        guard.wait_for.remove_waiter(tid);
                        log::trace!("tx {} upgraded {} to {}", tid, resource, mode);
                        return Ok(Self::outcome(victim_aborted));
                    }
                    // Not a recognized upgrade transition: fall through to
                    // the standard acquisition path, replacing the hold.
                }
            }

            // Step 2: check conflicts against grants held by other transactions.
            let conflicts: Vec<TransactionId> = guard
                .granted
                .get(&resource)
                .map(|list| {
                    list.iter()
                        .filter(|g| g.tid != tid && !g.mode.compatible_with(mode))
                        .map(|g| g.tid)
                        .collect()
                })
                .unwrap_or_default();

            if conflicts.is_empty() {
                if let Some(list) = guard.granted.get_mut(&resource) {
                    list.retain(|g| g.tid != tid);
                }
                guard
                    .granted
                    .entry(resource)
                    .or_default()
                    .push(Granted { tid, mode });
                guard.held_by_tx.entry(tid).or_default().insert(resource);
                guard.wait_for.remove_waiter(tid);
                log::trace!("tx {} granted {} on {}", tid, mode, resource);
                return Ok(Self::outcome(victim_aborted));
            }

            // Step 3: record wait-for edges and check for a cycle.
            for &holder in &conflicts {
                guard.wait_for.add_edge(tid, holder);
            }

            if let Some(cycle) = guard.wait_for.find_cycle_from(tid) {
                let victim = *cycle.iter().max().expect("a cycle is non-empty");
                if victim == tid {
                    guard.wait_for.remove_waiter(tid);
                    log::debug!("tx {} chosen as deadlock victim, cycle {:?}", tid, cycle);
                    return Err(ShimmerError::DeadlockDetected(tid));
                }
                log::debug!(
                    "tx {} aborting tx {} to break deadlock, cycle {:?}",
                    tid,
                    victim,
                    cycle
                );
                Self::force_release_all(&mut guard, victim);
                victim_aborted = Some(victim);
                self.cv.notify_all();
                continue;
            }

            // Step 4: no cycle (yet) — queue and block until woken or timed out.
            {
                let queue = guard.waiting.entry(resource).or_default();
                if !queue.iter().any(|w| w.tid == tid) {
                    queue.push_back(Waiting { tid, mode });
                }
            }

            let now = Instant::now();
            if now >= deadline {
                guard.wait_for.remove_waiter(tid);
                Self::remove_waiting(&mut guard, resource, tid);
                log::debug!("tx {} timed out waiting for {} on {}", tid, mode, resource);
                return Err(ShimmerError::LockTimeout { tx: tid, resource });
            }

            let (g, wait_result) = self
                .cv
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            guard = g;
            if wait_result.timed_out() {
                guard.wait_for.remove_waiter(tid);
                Self::remove_waiting(&mut guard, resource, tid);
                log::debug!("tx {} timed out waiting for {} on {}", tid, mode, resource);
                return Err(ShimmerError::LockTimeout { tx: tid, resource });
            }
        }
    }

    fn outcome(victim: Option<TransactionId>) -> AcquireOutcome {
        match victim {
            Some(tid) => AcquireOutcome::GrantedAfterAbortingVictim(tid),
            None => AcquireOutcome::Granted,
        }
    }

    /// Release every resource `tid` holds.
    pub fn release_all(&self, tid: TransactionId) {
        let mut guard = self.inner.ml();
        Self::force_release_all(&mut guard, tid);
        self.cv.notify_all();
    }

    fn force_release_all(guard: &mut Inner, tid: TransactionId) {
        let resources: Vec<ResourceId> = guard
            .held_by_tx
            .remove(&tid)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();

        for resource in &resources {
            if let Some(list) = guard.granted.get_mut(resource) {
                list.retain(|g| g.tid != tid);
                if list.is_empty() {
                    guard.granted.remove(resource);
                }
            }
        }

        guard.wait_for.remove_holder(tid);
        guard.wait_for.remove_waiter(tid);

        for resource in resources {
            Self::promote_waiters(guard, resource);
        }
    }

    fn remove_waiting(guard: &mut Inner, resource: ResourceId, tid: TransactionId) {
        if let Some(queue) = guard.waiting.get_mut(&resource) {
            queue.retain(|w| w.tid != tid);
            if queue.is_empty() {
                guard.waiting.remove(&resource);
            }
        }
    }

    /// Promote every compatible waiter on `resource`, cascading until a full
    /// pass yields no promotions.
    fn promote_waiters(guard: &mut Inner, resource: ResourceId) {
        loop {
            let granted_modes: Vec<LockMode> = guard
                .granted
                .get(&resource)
                .map(|list| list.iter().map(|g| g.mode).collect())
                .unwrap_or_default();

            let promotable_idx = guard.waiting.get(&resource).and_then(|queue| {
                queue
                    .iter()
                    .position(|w| granted_modes.iter().all(|held| held.compatible_with(w.mode)))
            });

            let Some(idx) = promotable_idx else {
                break;
            };

            let waiter = guard
                .waiting
                .get_mut(&resource)
                .and_then(|queue| queue.remove(idx))
                .expect("index came from this queue");

            guard.granted.entry(resource).or_default().push(Granted {
                tid: waiter.tid,
                mode: waiter.mode,
            });
            guard
                .held_by_tx
                .entry(waiter.tid)
                .or_default()
                .insert(resource);
            guard.wait_for.remove_waiter(waiter.tid);
        }

        if guard.waiting.get(&resource).is_some_and(|q| q.is_empty()) {
            guard.waiting.remove(&resource);
        }
    }
}
