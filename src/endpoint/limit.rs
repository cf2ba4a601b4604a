//! Admission gate and shutdown latches

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
struct LatchState {
    count: usize,
    broken: bool,
}

/// Bounded admission gate for concurrent connections.
///
/// `acquire()` and `release()` pair 1:1 per admitted connection; the
/// acceptor blocks at capacity instead of accepting sockets it cannot serve.
/// `break_latch()` unblocks every waiter during shutdown.
#[derive(Debug)]
pub struct LimitLatch {
    max: usize,
    state: Mutex<LatchState>,
    cond: Condvar,
}

impl LimitLatch {
    /// Create a gate admitting at most `max` connections.
    #[must_use]
    pub const fn new(max: usize) -> Self {
        Self {
            max,
            state: Mutex::new(LatchState {
                count: 0,
                broken: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Claim one slot, blocking while the gate is at capacity.
    ///
    /// Returns `false` when the latch has been broken for shutdown; the
    /// caller must not accept the connection and must not call `release()`.
    pub fn acquire(&self) -> bool {
        let mut state = self.state.lock();
        while state.count >= self.max && !state.broken {
            self.cond.wait(&mut state);
        }
        if state.broken {
            return false;
        }
        state.count += 1;
        true
    }

    /// Return one slot and wake a blocked acceptor.
    pub fn release(&self) {
        let mut state = self.state.lock();
        state.count = state.count.saturating_sub(1);
        self.cond.notify_one();
    }

    /// Unblock all waiters; subsequent `acquire()` calls fail fast.
    pub fn break_latch(&self) {
        let mut state = self.state.lock();
        state.broken = true;
        self.cond.notify_all();
    }

    /// Re-arm the gate after a stop/start cycle.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.count = 0;
        state.broken = false;
    }

    /// Currently admitted connections
    #[must_use]
    pub fn current(&self) -> usize {
        self.state.lock().count
    }

    /// Configured capacity
    #[must_use]
    pub const fn max(&self) -> usize {
        self.max
    }
}

/// Countdown latch for poller shutdown.
///
/// Each poller counts down once as its thread exits; `stop()` waits a
/// bounded time for the count to reach zero.
#[derive(Debug)]
pub struct StopLatch {
    remaining: Mutex<usize>,
    cond: Condvar,
}

impl StopLatch {
    /// Create a latch expecting `count` countdowns.
    #[must_use]
    pub const fn new(count: usize) -> Self {
        Self {
            remaining: Mutex::new(count),
            cond: Condvar::new(),
        }
    }

    /// Record one participant's exit.
    pub fn count_down(&self) {
        let mut remaining = self.remaining.lock();
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.cond.notify_all();
        }
    }

    /// Wait up to `timeout` for the count to reach zero.
    ///
    /// Returns `true` when everyone checked in.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut remaining = self.remaining.lock();
        if *remaining == 0 {
            return true;
        }
        let deadline = std::time::Instant::now() + timeout;
        while *remaining > 0 {
            if self.cond.wait_until(&mut remaining, deadline).timed_out() {
                return *remaining == 0;
            }
        }
        true
    }

    /// Participants still outstanding
    #[must_use]
    pub fn remaining(&self) -> usize {
        *self.remaining.lock()
    }
}
