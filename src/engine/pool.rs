//! Worker pool state: permits, in-flight accounting, and item claims.
//!
//! A [`Slot`] is one permit plus one claimed work item. While a slot is
//! alive the item cannot be handed to a second worker; dropping it
//! releases both, whatever the item's outcome.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::model::{Outcome, WorkId};
use crate::telemetry::metrics;

pub struct WorkerPool {
    permits: Arc<Semaphore>,
    capacity: usize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    claimed: Mutex<HashSet<WorkId>>,
    // Outcomes whose completion write failed. Their ids stay claimed
    // until the write lands so the item is never regenerated.
    deferred: Mutex<HashMap<WorkId, Outcome>>,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            claimed: Mutex::new(HashSet::new()),
            deferred: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held by a worker.
    pub fn free(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest in-flight count observed since the pool was created.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn claimed(&self) -> HashSet<WorkId> {
        self.lock_claimed().clone()
    }

    /// Take a permit and claim `id` without waiting.
    ///
    /// `None` if no permit is free or the item is already claimed.
    pub fn try_acquire(self: &Arc<Self>, id: &WorkId) -> Option<Slot> {
        let permit = Arc::clone(&self.permits).try_acquire_owned().ok()?;
        if !self.lock_claimed().insert(id.clone()) {
            return None;
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        metrics::pool_in_flight().add(1, &[]);

        Some(Slot {
            pool: Arc::clone(self),
            id: id.clone(),
            _permit: permit,
        })
    }

    /// Hold an outcome whose completion write failed.
    pub fn defer(&self, id: WorkId, outcome: Outcome) {
        self.lock_deferred().insert(id, outcome);
    }

    pub fn deferred(&self) -> Vec<(WorkId, Outcome)> {
        self.lock_deferred()
            .iter()
            .map(|(id, outcome)| (id.clone(), outcome.clone()))
            .collect()
    }

    pub fn deferred_count(&self) -> usize {
        self.lock_deferred().len()
    }

    /// A deferred write landed: forget the outcome and release the claim.
    pub fn settle(&self, id: &WorkId) {
        self.lock_deferred().remove(id);
        self.lock_claimed().remove(id);
    }

    fn lock_claimed(&self) -> MutexGuard<'_, HashSet<WorkId>> {
        self.claimed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_deferred(&self) -> MutexGuard<'_, HashMap<WorkId, Outcome>> {
        self.deferred.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One permit plus one claimed item.
pub struct Slot {
    pool: Arc<WorkerPool>,
    id: WorkId,
    _permit: OwnedSemaphorePermit,
}

impl Slot {
    pub fn id(&self) -> &WorkId {
        &self.id
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.pool.in_flight.fetch_sub(1, Ordering::SeqCst);
        metrics::pool_in_flight().add(-1, &[]);

        let deferred = self.pool.lock_deferred().contains_key(&self.id);
        if !deferred {
            self.pool.lock_claimed().remove(&self.id);
        }
        // The permit is returned after this, once the claim is gone.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OutcomeKind;

    fn id(n: u32) -> WorkId {
        WorkId::derive("final", "t", "A", n)
    }

    #[test]
    fn permits_bound_concurrent_slots() {
        let pool = Arc::new(WorkerPool::new(2));
        let a = pool.try_acquire(&id(1)).unwrap();
        let _b = pool.try_acquire(&id(2)).unwrap();

        assert!(pool.try_acquire(&id(3)).is_none());
        assert_eq!(pool.in_flight(), 2);
        assert_eq!(pool.free(), 0);

        drop(a);
        assert_eq!(pool.free(), 1);
        assert!(pool.try_acquire(&id(3)).is_some());
        assert_eq!(pool.peak_in_flight(), 2);
    }

    #[test]
    fn same_item_cannot_be_claimed_twice() {
        let pool = Arc::new(WorkerPool::new(4));
        let _slot = pool.try_acquire(&id(1)).unwrap();

        assert!(pool.try_acquire(&id(1)).is_none());
        // The refused attempt returned its permit.
        assert_eq!(pool.free(), 3);
    }

    #[test]
    fn deferred_outcome_keeps_claim_until_settled() {
        let pool = Arc::new(WorkerPool::new(1));
        let slot = pool.try_acquire(&id(1)).unwrap();
        pool.defer(id(1), Outcome::new(OutcomeKind::Success, 1));
        drop(slot);

        assert_eq!(pool.in_flight(), 0);
        assert!(pool.claimed().contains(&id(1)));
        assert_eq!(pool.deferred_count(), 1);

        pool.settle(&id(1));
        assert!(pool.claimed().is_empty());
        assert_eq!(pool.deferred_count(), 0);
    }
}
