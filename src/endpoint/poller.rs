//! Reactor poller
//!
//! Each poller thread owns one `mio::Poll` and the connections registered
//! with it. Other threads never touch the multiplexer directly: they push
//! [`PollerEvent`]s onto the poller's queue and wake it. One loop iteration
//! drains the queue, polls with a bounded timeout (skipping the blocking
//! wait entirely when the wakeup counter shows queued work), removes the
//! ready interest from each fired connection before dispatching it, and
//! finishes with a throttled timeout sweep.
//!
//! Removing the ready interest before dispatch is what guarantees a
//! connection is processed by at most one worker at a time.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;
use mio::unix::SourceFd;
use mio::{Events, Poll, Registry, Token, Waker};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::processor::SocketProcessor;
use super::worker::WorkerPool;
use super::{limit::StopLatch, Shared};
use crate::conn::{Attachment, Conn, InterestSet, SendfileProgress};
use crate::handler::DispatchReason;
use crate::pool::{PoolState, Recyclable};

/// Token reserved for the poller's waker
pub(crate) const WAKER_TOKEN: Token = Token(0);

/// What a queued poller event asks for.
#[derive(Debug, Clone, Copy)]
pub(crate) enum EventKind {
    /// First registration of a freshly accepted connection
    Register,
    /// Replace the registered interest set
    UpdateInterest(InterestSet),
    /// Raise the connection's callback flag and force a sweep
    Notify,
}

/// Pooled, transient instruction for a poller thread.
#[derive(Debug)]
pub(crate) struct PollerEvent {
    conn: Option<Arc<Conn>>,
    kind: EventKind,
    state: PoolState,
}

impl PollerEvent {
    pub(crate) fn new() -> Self {
        Self {
            conn: None,
            kind: EventKind::Register,
            state: PoolState::Fresh,
        }
    }

    fn bind(&mut self, conn: Arc<Conn>, kind: EventKind) {
        self.conn = Some(conn);
        self.kind = kind;
    }

    fn take(&mut self) -> (Option<Arc<Conn>>, EventKind) {
        (self.conn.take(), self.kind)
    }
}

impl Recyclable for PollerEvent {
    fn reset(&mut self) {
        self.conn = None;
        self.kind = EventKind::Register;
    }

    fn pool_state(&self) -> PoolState {
        self.state
    }

    fn set_pool_state(&mut self, state: PoolState) {
        self.state = state;
    }
}

/// Shared face of one poller.
///
/// Acceptors and workers talk to the poller thread through this handle; the
/// cloned registry also lets `cancel` deregister from any thread.
pub(crate) struct PollerHandle {
    id: usize,
    registry: Registry,
    waker: Waker,
    queue: SegQueue<PollerEvent>,
    connections: Mutex<HashMap<Token, Arc<Conn>>>,
    closing: AtomicBool,
    wakeups: AtomicUsize,
}

impl PollerHandle {
    fn new(id: usize, poll: &Poll) -> io::Result<Self> {
        Ok(Self {
            id,
            registry: poll.registry().try_clone()?,
            waker: Waker::new(poll.registry(), WAKER_TOKEN)?,
            queue: SegQueue::new(),
            connections: Mutex::new(HashMap::new()),
            closing: AtomicBool::new(false),
            wakeups: AtomicUsize::new(0),
        })
    }

    /// Poller index
    pub(crate) const fn id(&self) -> usize {
        self.id
    }

    /// Number of connections currently owned by this poller
    pub(crate) fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Queue an event and wake the poller if it might be blocked.
    fn submit(&self, shared: &Shared, conn: Arc<Conn>, kind: EventKind) {
        let mut event = shared.events.acquire_or_else(PollerEvent::new);
        event.bind(conn, kind);
        self.queue.push(event);
        if self.wakeups.fetch_add(1, Ordering::AcqRel) == 0 {
            let _ = self.waker.wake();
        }
    }

    /// Hand a freshly accepted connection to this poller.
    pub(crate) fn register(&self, shared: &Shared, conn: Arc<Conn>) {
        self.submit(shared, conn, EventKind::Register);
    }

    /// Ask the poller thread to re-arm the given interest set.
    pub(crate) fn update_interest(&self, shared: &Shared, conn: &Arc<Conn>, want: InterestSet) {
        self.submit(shared, Arc::clone(conn), EventKind::UpdateInterest(want));
    }

    /// Raise the callback flag and make the next sweep immediate.
    pub(crate) fn request_notify(&self, shared: &Shared, conn: &Arc<Conn>) {
        self.submit(shared, Arc::clone(conn), EventKind::Notify);
    }

    /// Begin shutdown: the poller cancels everything it owns and exits.
    pub(crate) fn close(&self) {
        self.closing.store(true, Ordering::Release);
        let _ = self.waker.wake();
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Apply an interest set to the multiplexer and record it.
    ///
    /// An empty set deregisters the stream. Registration failures cancel
    /// the connection.
    fn apply_interest(&self, shared: &Shared, conn: &Arc<Conn>, want: InterestSet) {
        if conn.is_cancelled() {
            return;
        }
        let fd = conn.raw_fd();
        let mut st = conn.state();
        match want.to_mio() {
            Some(interest) => {
                let result = if conn.is_registered() {
                    self.registry
                        .reregister(&mut SourceFd(&fd), conn.token(), interest)
                } else {
                    let r = self
                        .registry
                        .register(&mut SourceFd(&fd), conn.token(), interest);
                    if r.is_ok() {
                        conn.set_registered(true);
                    }
                    r
                };
                match result {
                    Ok(()) => st.interest = want,
                    Err(e) => {
                        warn!("Poller {} failed to arm {:?}: {}", self.id, conn.token(), e);
                        drop(st);
                        self.cancel(shared, conn, DispatchReason::Error);
                    }
                }
            }
            None => {
                if conn.is_registered() {
                    let _ = self.registry.deregister(&mut SourceFd(&fd));
                    conn.set_registered(false);
                }
                st.interest = InterestSet::NONE;
            }
        }
    }

    /// Tear a connection down, exactly once.
    ///
    /// Safe to call from any thread and any number of times; only the first
    /// caller runs the teardown. Releases the admission slot the acceptor
    /// claimed for this connection.
    pub(crate) fn cancel(&self, shared: &Shared, conn: &Arc<Conn>, reason: DispatchReason) -> bool {
        if !conn.claim_cancel() {
            return false;
        }
        trace!(
            "Poller {} cancelling {:?} ({:?})",
            self.id,
            conn.token(),
            reason
        );

        self.connections.lock().remove(&conn.token());
        // Teardown must finish even if the handler's release panics
        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            shared.handler.release(conn, reason);
        }))
        .is_err()
        {
            warn!("Handler panicked releasing {:?}", conn.token());
        }

        {
            let mut io = conn.io();
            if conn.is_registered() {
                let fd = conn.raw_fd();
                let _ = self.registry.deregister(&mut SourceFd(&fd));
                conn.set_registered(false);
            }
            io.close();
        }

        {
            // Swap the attachment out so its sendfile state is closed and
            // the rest can be recycled
            let mut st = conn.state();
            let attachment = std::mem::replace(&mut *st, Attachment::new());
            drop(st);
            if shared.is_running() && !shared.is_paused() {
                shared.attachments.release(attachment);
            }
        }

        shared.limit.release();
        true
    }
}

impl std::fmt::Debug for PollerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollerHandle")
            .field("id", &self.id)
            .field("connections", &self.connection_count())
            .field("closing", &self.is_closing())
            .finish()
    }
}

/// One reactor thread's owned state.
pub(crate) struct Poller {
    id: usize,
    shared: Arc<Shared>,
    handle: Arc<PollerHandle>,
    workers: Arc<WorkerPool>,
    stop_latch: Arc<StopLatch>,
    poll: Poll,
    events: Events,
    next_sweep: Instant,
}

impl Poller {
    pub(crate) fn new(
        id: usize,
        shared: Arc<Shared>,
        workers: Arc<WorkerPool>,
        stop_latch: Arc<StopLatch>,
    ) -> io::Result<Self> {
        let poll = Poll::new()?;
        let handle = Arc::new(PollerHandle::new(id, &poll)?);
        let capacity = shared.config.poller.event_capacity;
        Ok(Self {
            id,
            shared,
            handle,
            workers,
            stop_latch,
            poll,
            events: Events::with_capacity(capacity),
            next_sweep: Instant::now(),
        })
    }

    pub(crate) fn handle(&self) -> Arc<PollerHandle> {
        Arc::clone(&self.handle)
    }

    /// The reactor loop. Runs until [`PollerHandle::close`] is called.
    pub(crate) fn run(mut self) {
        debug!("Poller {} started", self.id);
        let selector_timeout = self.shared.config.poller.selector_timeout();

        loop {
            let (processed, notify_forced) = self.drain_events();

            if self.handle.is_closing() {
                break;
            }

            // Skip the blocking wait when work arrived since the last drain
            let timeout = if self.handle.wakeups.swap(0, Ordering::AcqRel) > 0 {
                Duration::ZERO
            } else {
                selector_timeout
            };

            if let Err(e) = self.poll.poll(&mut self.events, Some(timeout)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                warn!("Poller {} selector failure: {}", self.id, e);
                continue;
            }

            let mut ready = 0;
            for event in self.events.iter() {
                if event.token() == WAKER_TOKEN {
                    continue;
                }
                ready += 1;
                self.process_key(event.token(), event.is_readable(), event.is_writable());
            }

            self.sweep(ready, processed > 0, notify_forced);
        }

        self.destroy();
    }

    /// Process everything other threads queued since the last iteration.
    fn drain_events(&self) -> (usize, bool) {
        let mut processed = 0;
        let mut notify_forced = false;

        while let Some(mut event) = self.handle.queue.pop() {
            processed += 1;
            let (conn, kind) = event.take();
            if let Some(conn) = conn {
                match kind {
                    EventKind::Register => {
                        if self.handle.is_closing() || conn.is_cancelled() {
                            self.handle.cancel(&self.shared, &conn, DispatchReason::Stop);
                        } else {
                            self.handle
                                .connections
                                .lock()
                                .insert(conn.token(), Arc::clone(&conn));
                            conn.state().poller_id = self.id;
                            self.handle
                                .apply_interest(&self.shared, &conn, InterestSet::READ);
                        }
                    }
                    EventKind::UpdateInterest(want) => {
                        if !conn.is_cancelled() {
                            self.handle.apply_interest(&self.shared, &conn, want);
                        }
                    }
                    EventKind::Notify => {
                        if !conn.is_cancelled() {
                            conn.state().notify_callback = true;
                            notify_forced = true;
                        }
                    }
                }
            }
            if self.shared.is_running() && !self.shared.is_paused() {
                self.shared.events.release(event);
            }
        }

        (processed, notify_forced)
    }

    /// Handle one ready token.
    fn process_key(&self, token: Token, readable: bool, writable: bool) {
        let Some(conn) = self.handle.connections.lock().get(&token).cloned() else {
            // Cancelled between selection and processing
            return;
        };
        if conn.is_cancelled() {
            return;
        }

        let mut ready = InterestSet {
            read: readable,
            write: writable,
        };

        // In-flight file transfers are driven here, not on a worker
        if writable && conn.state().sendfile.is_some() {
            self.process_sendfile(&conn);
            if !readable || conn.is_cancelled() {
                return;
            }
            // Write interest now belongs to the transfer
            ready.write = false;
        }
        {
            let mut st = conn.state();
            st.touch();
            let remaining = st.interest.without(ready);
            if remaining != st.interest {
                let fd = conn.raw_fd();
                let result = match remaining.to_mio() {
                    Some(interest) => {
                        self.handle
                            .registry
                            .reregister(&mut SourceFd(&fd), token, interest)
                    }
                    None => {
                        conn.set_registered(false);
                        self.handle.registry.deregister(&mut SourceFd(&fd))
                    }
                };
                if let Err(e) = result {
                    warn!("Poller {} failed to disarm {:?}: {}", self.id, token, e);
                }
                st.interest = remaining;
            }
        }

        let reason = if readable {
            DispatchReason::ReadReady
        } else {
            DispatchReason::WriteReady
        };
        dispatch(&self.shared, &self.handle, &self.workers, conn, reason);
    }

    /// Advance a sendfile transfer on write readiness.
    fn process_sendfile(&self, conn: &Arc<Conn>) {
        enum Outcome {
            Rearm,
            WaitWrite,
            Close,
            Error,
            None,
        }

        let outcome = {
            let mut io = conn.io();
            let mut st = conn.state();
            st.touch();
            match st.sendfile.as_mut() {
                None => Outcome::None,
                Some(transfer) => {
                    if !self.shared.config.connection.sendfile {
                        transfer.disable_zero_copy();
                    }
                    match transfer.transfer(&mut io) {
                        Ok(SendfileProgress::Done { keep_alive }) => {
                            trace!("Sendfile complete for {}", io.peer_addr());
                            st.sendfile = None;
                            if keep_alive {
                                Outcome::Rearm
                            } else {
                                Outcome::Close
                            }
                        }
                        Ok(SendfileProgress::Blocked) => Outcome::WaitWrite,
                        Err(e) => {
                            warn!("Sendfile failed for {}: {}", io.peer_addr(), e);
                            Outcome::Error
                        }
                    }
                }
            }
        };

        match outcome {
            Outcome::Rearm => self
                .handle
                .apply_interest(&self.shared, conn, InterestSet::READ),
            Outcome::WaitWrite => self
                .handle
                .apply_interest(&self.shared, conn, InterestSet::WRITE),
            Outcome::Close => {
                self.handle
                    .cancel(&self.shared, conn, DispatchReason::Disconnect);
            }
            Outcome::Error => {
                self.handle.cancel(&self.shared, conn, DispatchReason::Error);
            }
            Outcome::None => {}
        }
    }

    /// Throttled timeout sweep.
    ///
    /// Skipped while the loop is busy and the next deadline has not been
    /// reached; an idle selector wakeup or a queued notify forces it.
    fn sweep(&mut self, ready: usize, had_events: bool, force: bool) {
        let now = Instant::now();
        if !force && (ready > 0 || had_events) && now < self.next_sweep {
            return;
        }

        enum Verdict {
            Skip,
            Callback,
            Expired,
        }

        let conns: Vec<Arc<Conn>> = self.handle.connections.lock().values().cloned().collect();
        for conn in conns {
            if conn.is_cancelled() {
                continue;
            }
            let verdict = {
                let mut st = conn.state();
                if st.notify_callback {
                    st.notify_callback = false;
                    Verdict::Callback
                } else if st.is_expired(now) {
                    Verdict::Expired
                } else {
                    Verdict::Skip
                }
            };
            match verdict {
                Verdict::Callback => dispatch(
                    &self.shared,
                    &self.handle,
                    &self.workers,
                    conn,
                    DispatchReason::ReadReady,
                ),
                Verdict::Expired => {
                    debug!("Poller {} expiring idle {:?}", self.id, conn.token());
                    dispatch(
                        &self.shared,
                        &self.handle,
                        &self.workers,
                        conn,
                        DispatchReason::Timeout,
                    );
                }
                Verdict::Skip => {}
            }
        }

        self.next_sweep = now + self.shared.config.poller.sweep_interval();
    }

    /// Final teardown: everything still registered sees a `Stop`.
    fn destroy(&mut self) {
        self.drain_events();
        let conns: Vec<Arc<Conn>> = self.handle.connections.lock().values().cloned().collect();
        for conn in conns {
            self.handle.cancel(&self.shared, &conn, DispatchReason::Stop);
        }
        self.stop_latch.count_down();
        debug!("Poller {} stopped", self.id);
    }
}

/// Hand a connection to the worker pool (or run it inline when saturated).
pub(crate) fn dispatch(
    shared: &Arc<Shared>,
    handle: &Arc<PollerHandle>,
    workers: &WorkerPool,
    conn: Arc<Conn>,
    reason: DispatchReason,
) {
    let mut processor = shared.processors.acquire_or_else(SocketProcessor::new);
    processor.bind(conn, reason);

    let shared = Arc::clone(shared);
    let handle = Arc::clone(handle);
    workers.execute(Box::new(move || {
        let mut processor = processor;
        processor.run(&shared, &handle);
        if shared.is_running() && !shared.is_paused() {
            shared.processors.release(processor);
        }
    }));
}
