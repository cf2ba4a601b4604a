//! Lock-free object pools
//!
//! This module provides bounded, lock-free pools for the connector's
//! frequently recycled objects (poller events, attachments, socket
//! processors). Using `crossbeam-queue::ArrayQueue` for
//! lock-free management to minimize contention between poller and worker
//! threads.
//!
//! Every pooled type implements [`Recyclable`]: its `reset()` must leave the
//! object indistinguishable from a freshly constructed one, so a consumer can
//! never observe state leaked from a previous use.
//!
//! # Example
//!
//! ```
//! use conduit::pool::{ObjectPool, PoolState, Recyclable};
//!
//! struct Scratch {
//!     data: Vec<u8>,
//!     state: PoolState,
//! }
//!
//! impl Recyclable for Scratch {
//!     fn reset(&mut self) {
//!         self.data.clear();
//!     }
//!     fn pool_state(&self) -> PoolState {
//!         self.state
//!     }
//!     fn set_pool_state(&mut self, state: PoolState) {
//!         self.state = state;
//!     }
//! }
//!
//! let pool: ObjectPool<Scratch> = ObjectPool::new(16);
//! let obj = pool.acquire_or_else(|| Scratch {
//!     data: Vec::new(),
//!     state: PoolState::Fresh,
//! });
//! pool.release(obj);
//! assert_eq!(pool.stats().returns(), 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_queue::ArrayQueue;

/// Lifecycle tag carried by pooled objects.
///
/// Checked with `debug_assert!` at the acquire/release boundary to catch
/// use-after-return and double-release in debug builds. Release builds pay
/// only the cost of a byte store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Constructed, never handed out by a pool
    Fresh,
    /// Currently checked out
    InUse,
    /// Sitting in a pool's free list
    Returned,
}

/// A type that can be stored in an [`ObjectPool`].
///
/// `reset()` must restore the object to a state equal to a freshly
/// constructed one. Partial resets leak per-connection state across
/// unrelated connections.
pub trait Recyclable: Send {
    /// Clear all state for the next checkout
    fn reset(&mut self);

    /// Current lifecycle tag
    fn pool_state(&self) -> PoolState;

    /// Update the lifecycle tag
    fn set_pool_state(&mut self, state: PoolState);
}

/// Statistics for an object pool
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Number of new allocations (pool was empty)
    allocations: AtomicU64,
    /// Number of reuses from the pool
    reuses: AtomicU64,
    /// Number of objects returned to the pool
    returns: AtomicU64,
    /// Number of objects dropped (pool was full)
    drops: AtomicU64,
}

impl PoolStats {
    /// Get the number of allocations
    #[must_use]
    pub fn allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }

    /// Get the number of reuses
    #[must_use]
    pub fn reuses(&self) -> u64 {
        self.reuses.load(Ordering::Relaxed)
    }

    /// Get the number of returns
    #[must_use]
    pub fn returns(&self) -> u64 {
        self.returns.load(Ordering::Relaxed)
    }

    /// Get the number of drops
    #[must_use]
    pub fn drops(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }

    /// Get pool efficiency (reuses / (reuses + allocations))
    ///
    /// Returns 0.0 if no operations have occurred.
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // Precision loss acceptable for efficiency ratio
    pub fn efficiency(&self) -> f64 {
        let reuses = self.reuses();
        let allocations = self.allocations();
        let total = reuses + allocations;
        if total == 0 {
            0.0
        } else {
            reuses as f64 / total as f64
        }
    }
}

/// A bounded, lock-free object pool.
///
/// `acquire()` never blocks and never allocates; `release()` drops the object
/// silently when the pool is full. Callers gate `release()` on endpoint state
/// so that pools drain naturally during shutdown.
#[derive(Debug)]
pub struct ObjectPool<T: Recyclable> {
    /// Lock-free queue of available objects
    store: ArrayQueue<T>,
    /// Pool statistics
    stats: PoolStats,
}

impl<T: Recyclable> ObjectPool<T> {
    /// Create a new pool with the specified capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            store: ArrayQueue::new(capacity),
            stats: PoolStats::default(),
        }
    }

    /// Take an object from the pool, if one is available.
    ///
    /// Returns `None` when the pool is empty; no allocation is performed.
    #[must_use]
    pub fn acquire(&self) -> Option<T> {
        self.store.pop().map(|mut obj| {
            self.stats.reuses.fetch_add(1, Ordering::Relaxed);
            debug_assert_eq!(
                obj.pool_state(),
                PoolState::Returned,
                "pooled object handed out while not in Returned state"
            );
            obj.set_pool_state(PoolState::InUse);
            obj
        })
    }

    /// Take an object from the pool, constructing a new one if empty.
    pub fn acquire_or_else(&self, make: impl FnOnce() -> T) -> T {
        if let Some(obj) = self.acquire() {
            obj
        } else {
            self.stats.allocations.fetch_add(1, Ordering::Relaxed);
            let mut obj = make();
            debug_assert_eq!(
                obj.pool_state(),
                PoolState::Fresh,
                "factory produced an object that is not Fresh"
            );
            obj.set_pool_state(PoolState::InUse);
            obj
        }
    }

    /// Return an object to the pool.
    ///
    /// The object is reset before it is stored. If the pool is full the
    /// object is dropped.
    pub fn release(&self, mut obj: T) {
        debug_assert_eq!(
            obj.pool_state(),
            PoolState::InUse,
            "object released while not in InUse state (double release?)"
        );
        obj.reset();
        obj.set_pool_state(PoolState::Returned);

        match self.store.push(obj) {
            Ok(()) => {
                self.stats.returns.fetch_add(1, Ordering::Relaxed);
            }
            Err(_obj) => {
                // Pool is full, drop the object
                self.stats.drops.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Empty the pool, dropping all stored objects.
    ///
    /// Used on shutdown and under memory pressure.
    pub fn clear(&self) {
        while self.store.pop().is_some() {}
    }

    /// Get the pool capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }

    /// Get the current number of available objects
    #[must_use]
    pub fn available(&self) -> usize {
        self.store.len()
    }

    /// Get pool statistics
    #[must_use]
    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }
}
