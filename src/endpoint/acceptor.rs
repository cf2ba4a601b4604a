//! Accept thread
//!
//! One blocking accept loop with an explicit state machine. Pause parks the
//! thread on a condvar until resume or stop; there are no sleep-and-poll
//! loops. The admission gate is claimed before `accept()` so the listener
//! backlog, not this process, absorbs load beyond `max_connections`.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use rustls::ServerConnection;
use socket2::Socket;
use tracing::{error, info, trace, warn};

use super::memory::is_memory_pressure;
use super::poller::PollerHandle;
use super::Shared;
use crate::conn::{Attachment, Conn, Connection};

/// First backoff step after a failed accept
const INITIAL_ERROR_DELAY: Duration = Duration::from_millis(50);
/// Backoff ceiling
const MAX_ERROR_DELAY: Duration = Duration::from_millis(1600);

/// Lifecycle of the accept thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AcceptorState {
    New,
    Running,
    Paused,
    Ended,
}

/// Shared control block for pausing and resuming the acceptor.
#[derive(Debug)]
pub(crate) struct AcceptorControl {
    state: Mutex<AcceptorState>,
    cond: Condvar,
}

impl AcceptorControl {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(AcceptorState::New),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn state(&self) -> AcceptorState {
        *self.state.lock()
    }

    /// Stop admitting new connections; the thread parks until resumed.
    pub(crate) fn pause(&self) {
        let mut state = self.state.lock();
        if *state == AcceptorState::Running {
            *state = AcceptorState::Paused;
        }
        self.cond.notify_all();
    }

    /// Resume after a pause.
    pub(crate) fn resume(&self) {
        let mut state = self.state.lock();
        if *state == AcceptorState::Paused {
            *state = AcceptorState::Running;
        }
        self.cond.notify_all();
    }

    /// Wake the thread so it can observe a cleared running flag.
    pub(crate) fn interrupt(&self) {
        self.cond.notify_all();
    }

    fn set(&self, value: AcceptorState) {
        *self.state.lock() = value;
        self.cond.notify_all();
    }

    /// Park while paused. Returns `false` when the endpoint stopped.
    fn await_resume(&self, shared: &Shared) -> bool {
        let mut state = self.state.lock();
        while *state == AcceptorState::Paused && shared.is_running() {
            self.cond.wait(&mut state);
        }
        shared.is_running()
    }
}

/// The accept loop's owned state.
pub(crate) struct Acceptor {
    shared: Arc<Shared>,
    control: Arc<AcceptorControl>,
    listener: Arc<Socket>,
    pollers: Vec<Arc<PollerHandle>>,
    next_poller: usize,
}

impl Acceptor {
    pub(crate) fn new(
        shared: Arc<Shared>,
        control: Arc<AcceptorControl>,
        listener: Arc<Socket>,
        pollers: Vec<Arc<PollerHandle>>,
    ) -> Self {
        Self {
            shared,
            control,
            listener,
            pollers,
            next_poller: 0,
        }
    }

    pub(crate) fn run(mut self) {
        self.control.set(AcceptorState::Running);
        info!("Acceptor started");
        let mut error_delay = Duration::ZERO;

        while self.shared.is_running() {
            if !self.control.await_resume(&self.shared) {
                break;
            }

            // Claim an admission slot before accepting; blocks at capacity
            if !self.shared.limit.acquire() {
                // Latch broken for shutdown
                continue;
            }
            if !self.shared.is_running() {
                self.shared.limit.release();
                break;
            }
            // A pause may have landed while the gate was full; give the
            // slot back and park instead of admitting one more
            if self.control.state() == AcceptorState::Paused {
                self.shared.limit.release();
                continue;
            }

            match self.listener.accept() {
                Ok((sock, addr)) => {
                    error_delay = Duration::ZERO;
                    if let Err(e) = self.setup(sock, &addr) {
                        warn!("Dropping accepted connection: {}", e);
                        self.shared.limit.release();
                    }
                }
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    // Accept timeout: give back the slot and re-check state
                    self.shared.limit.release();
                }
                Err(e) => {
                    self.shared.limit.release();
                    if is_memory_pressure(&e) {
                        error!("Accept failed under memory pressure: {}", e);
                        self.shared.relieve_memory_pressure();
                    } else {
                        warn!("Accept failed: {}", e);
                    }
                    if !error_delay.is_zero() {
                        std::thread::sleep(error_delay);
                    }
                    error_delay = next_error_delay(error_delay);
                }
            }
        }

        self.control.set(AcceptorState::Ended);
        info!("Acceptor stopped");
    }

    /// Prepare an accepted socket and hand it to a poller.
    fn setup(&mut self, sock: Socket, addr: &socket2::SockAddr) -> io::Result<()> {
        sock.set_nonblocking(true)?;
        if self.shared.config.listen.tcp_nodelay {
            // Not fatal on exotic transports
            let _ = sock.set_nodelay(true);
        }
        let peer = addr
            .as_socket()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "non-inet peer address"))?;

        let stream = mio::net::TcpStream::from_std(std::net::TcpStream::from(sock));
        let tls = match &self.shared.tls {
            Some(config) => Some(
                ServerConnection::new(Arc::clone(config))
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?,
            ),
            None => None,
        };

        let cc = &self.shared.config.connection;
        let connection = Connection::new(stream, peer, tls, cc.read_buffer_size, cc.write_buffer_size);

        let mut attachment = self.shared.attachments.acquire_or_else(Attachment::new);
        attachment.idle_timeout = cc.idle_timeout();
        attachment.handshake_complete = self.shared.tls.is_none();
        attachment.touch();

        let token = self.shared.next_token();
        let conn = Arc::new(Conn::new(token, connection, attachment));

        // Round-robin across pollers
        let index = self.next_poller % self.pollers.len();
        self.next_poller = self.next_poller.wrapping_add(1);
        trace!("Accepted {} as {:?} -> poller {}", peer, token, index);
        self.pollers[index].register(&self.shared, conn);
        Ok(())
    }
}

/// Exponential accept-error backoff: 50ms doubling to 1.6s.
const fn next_error_delay(current: Duration) -> Duration {
    if current.is_zero() {
        INITIAL_ERROR_DELAY
    } else {
        let doubled = current.saturating_mul(2);
        if doubled.as_millis() > MAX_ERROR_DELAY.as_millis() {
            MAX_ERROR_DELAY
        } else {
            doubled
        }
    }
}
