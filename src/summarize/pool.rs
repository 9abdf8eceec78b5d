//! Bounded pool of API credential slots.
//!
//! Slots are abstract integer indices `0..N-1`; the service maps them onto
//! its credential list. The pool is the only blocking resource in the
//! system: acquisition awaits a free slot, and the guard's `Drop` returns
//! the slot on every exit path, including panic unwinding inside a worker
//! task.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::AgentError;

/// A bounded multi-producer, multi-consumer set of credential slots.
#[derive(Debug)]
pub struct CredentialPool {
    permits: Arc<Semaphore>,
    free: Arc<Mutex<Vec<usize>>>,
    capacity: usize,
}

impl CredentialPool {
    /// Creates a pool with `capacity` slots (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            free: Arc::new(Mutex::new((0..capacity).rev().collect())),
            capacity,
        }
    }

    /// Number of slots in the pool.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Acquires a slot, waiting until one is free.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::PoolClosed`] if the pool's semaphore has been
    /// closed (only possible during shutdown).
    pub async fn acquire(&self) -> Result<CredentialSlot, AgentError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| AgentError::PoolClosed)?;

        // A permit guarantees a free slot.
        let index = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .ok_or(AgentError::PoolClosed)?;

        Ok(CredentialSlot {
            index,
            free: Arc::clone(&self.free),
            _permit: permit,
        })
    }
}

/// A held credential slot. Returned to the pool on drop.
#[derive(Debug)]
pub struct CredentialSlot {
    index: usize,
    free: Arc<Mutex<Vec<usize>>>,
    _permit: OwnedSemaphorePermit,
}

impl CredentialSlot {
    /// The slot index, in `0..capacity`.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }
}

impl Drop for CredentialSlot {
    fn drop(&mut self) {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(self.index);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_slots_are_distinct() {
        let pool = CredentialPool::new(3);
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        let c = pool.acquire().await.unwrap();
        let mut indices = vec![a.index(), b.index(), c.index()];
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_released_slot_is_reacquirable() {
        let pool = CredentialPool::new(1);
        let slot = pool.acquire().await.unwrap();
        let idx = slot.index();
        drop(slot);
        let again = pool.acquire().await.unwrap();
        assert_eq!(again.index(), idx);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_is_bounded_by_capacity() {
        let pool = Arc::new(CredentialPool::new(2));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let pool = Arc::clone(&pool);
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _slot = pool.acquire().await.unwrap();
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slot_released_when_task_panics() {
        let pool = Arc::new(CredentialPool::new(1));

        let pool_clone = Arc::clone(&pool);
        let handle = tokio::spawn(async move {
            let _slot = pool_clone.acquire().await.unwrap();
            #[allow(clippy::panic)]
            {
                panic!("worker blew up");
            }
        });
        assert!(handle.await.is_err());

        // The slot came back despite the panic.
        let slot = tokio::time::timeout(Duration::from_secs(1), pool.acquire())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(slot.index(), 0);
    }

    #[test]
    fn test_zero_capacity_clamped_to_one() {
        let pool = CredentialPool::new(0);
        assert_eq!(pool.capacity(), 1);
    }
}
