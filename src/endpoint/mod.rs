//! Endpoint lifecycle
//!
//! An [`Endpoint`] owns the whole connector: the listening socket, one
//! acceptor thread, N poller threads, the worker pool, the object pools,
//! the admission gate and the memory reserve. `start()` brings them up in
//! dependency order; `stop()` runs the cooperative shutdown: break the
//! admission gate, park the acceptor, close the pollers (every remaining
//! connection sees a `Stop`), wait a bounded time on the stop latch, then
//! drain the workers and clear the pools.

mod acceptor;
pub mod limit;
pub mod memory;
mod poller;
mod processor;
mod worker;

pub use limit::{LimitLatch, StopLatch};
pub use memory::MemoryReserve;
pub use worker::{WorkerPool, WorkerStats};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use mio::Token;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{error, info, warn};

use self::acceptor::{Acceptor, AcceptorControl};
use self::poller::{Poller, PollerEvent, PollerHandle};
use self::processor::SocketProcessor;
use crate::config::Config;
use crate::conn::Attachment;
use crate::error::{EndpointError, ListenerError, Result};
use crate::handler::ConnectionHandler;
use crate::pool::ObjectPool;

/// State shared by the acceptor, pollers and workers.
pub(crate) struct Shared {
    pub config: Config,
    pub handler: Arc<dyn ConnectionHandler>,
    pub tls: Option<Arc<rustls::ServerConfig>>,
    pub events: ObjectPool<PollerEvent>,
    pub attachments: ObjectPool<Attachment>,
    pub processors: ObjectPool<SocketProcessor>,
    pub limit: LimitLatch,
    pub reserve: MemoryReserve,
    running: AtomicBool,
    paused: AtomicBool,
    /// Token 0 is reserved for poller wakers
    next_token: AtomicUsize,
}

impl Shared {
    fn new(
        config: Config,
        handler: Arc<dyn ConnectionHandler>,
        tls: Option<Arc<rustls::ServerConfig>>,
    ) -> Self {
        let pools = config.pools;
        let limit = LimitLatch::new(config.connection.max_connections);
        let reserve = MemoryReserve::new(config.connection.memory_reserve_kb * 1024);
        Self {
            config,
            handler,
            tls,
            events: ObjectPool::new(pools.events),
            attachments: ObjectPool::new(pools.attachments),
            processors: ObjectPool::new(pools.processors),
            limit,
            reserve,
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            next_token: AtomicUsize::new(1),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub(crate) fn next_token(&self) -> Token {
        Token(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    /// Drop the memory reserve and empty every pool.
    pub(crate) fn relieve_memory_pressure(&self) -> bool {
        let freed = self.reserve.release();
        if freed {
            self.events.clear();
            self.attachments.clear();
            self.processors.clear();
        }
        freed
    }

    fn clear_pools(&self) {
        self.events.clear();
        self.attachments.clear();
        self.processors.clear();
    }
}

/// The multi-threaded non-blocking connector.
pub struct Endpoint {
    shared: Arc<Shared>,
    control: Arc<AcceptorControl>,
    listener: Mutex<Option<Arc<Socket>>>,
    local_addr: Mutex<Option<SocketAddr>>,
    pollers: Mutex<Vec<Arc<PollerHandle>>>,
    workers: Mutex<Option<Arc<WorkerPool>>>,
    stop_latch: Mutex<Option<Arc<StopLatch>>>,
    acceptor_thread: Mutex<Option<JoinHandle<()>>>,
    poller_threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Endpoint {
    /// Create an endpoint from a validated configuration.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration or unusable TLS material.
    pub fn new(config: Config, handler: Arc<dyn ConnectionHandler>) -> Result<Self> {
        config.validate().map_err(crate::error::ConduitError::from)?;
        let tls = match &config.tls {
            Some(tls_config) => Some(crate::tls::build_server_config(tls_config)?),
            None => None,
        };
        Ok(Self {
            shared: Arc::new(Shared::new(config, handler, tls)),
            control: Arc::new(AcceptorControl::new()),
            listener: Mutex::new(None),
            local_addr: Mutex::new(None),
            pollers: Mutex::new(Vec::new()),
            workers: Mutex::new(None),
            stop_latch: Mutex::new(None),
            acceptor_thread: Mutex::new(None),
            poller_threads: Mutex::new(Vec::new()),
        })
    }

    /// Bind the listener and spawn the acceptor, poller and worker threads.
    ///
    /// # Errors
    ///
    /// Fails if the endpoint is already running, the address cannot be
    /// bound, or a thread cannot be spawned.
    pub fn start(&self) -> Result<()> {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return Err(EndpointError::AlreadyRunning.into());
        }
        self.shared.paused.store(false, Ordering::Release);
        self.shared.limit.reset();
        self.shared.reserve.restore();

        let listener = match bind_listener(&self.shared.config) {
            Ok(listener) => Arc::new(listener),
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                return Err(e.into());
            }
        };
        let bound = listener
            .local_addr()
            .ok()
            .and_then(|a| a.as_socket());
        *self.local_addr.lock() = bound;
        *self.listener.lock() = Some(Arc::clone(&listener));

        let result = self.spawn_threads(listener);
        if let Err(e) = result {
            self.shared.running.store(false, Ordering::Release);
            // Unwind whatever came up
            for handle in self.pollers.lock().drain(..) {
                handle.close();
            }
            if let Some(workers) = self.workers.lock().take() {
                workers.shutdown();
            }
            *self.listener.lock() = None;
            return Err(e);
        }

        info!(
            "Endpoint started on {} ({} poller(s), {} worker(s), max {} connections)",
            bound.map_or_else(|| "?".into(), |a| a.to_string()),
            self.shared.config.poller.count,
            self.shared.config.worker.count,
            self.shared.config.connection.max_connections
        );
        Ok(())
    }

    fn spawn_threads(&self, listener: Arc<Socket>) -> Result<()> {
        let worker_cfg = &self.shared.config.worker;
        let workers = Arc::new(WorkerPool::new(worker_cfg.count, worker_cfg.queue_depth)?);
        *self.workers.lock() = Some(Arc::clone(&workers));

        let poller_count = self.shared.config.poller.count;
        let stop_latch = Arc::new(StopLatch::new(poller_count));
        *self.stop_latch.lock() = Some(Arc::clone(&stop_latch));

        let mut handles = Vec::with_capacity(poller_count);
        let mut threads = Vec::with_capacity(poller_count);
        for id in 0..poller_count {
            let poller = Poller::new(
                id,
                Arc::clone(&self.shared),
                Arc::clone(&workers),
                Arc::clone(&stop_latch),
            )
            .map_err(EndpointError::from)?;
            handles.push(poller.handle());
            let thread = std::thread::Builder::new()
                .name(format!("conduit-poller-{id}"))
                .spawn(move || poller.run())
                .map_err(|e| EndpointError::thread_spawn("poller", e.to_string()))?;
            threads.push(thread);
        }
        *self.pollers.lock() = handles.clone();
        *self.poller_threads.lock() = threads;

        let acceptor = Acceptor::new(
            Arc::clone(&self.shared),
            Arc::clone(&self.control),
            listener,
            handles,
        );
        let thread = std::thread::Builder::new()
            .name("conduit-acceptor".into())
            .spawn(move || acceptor.run())
            .map_err(|e| EndpointError::thread_spawn("acceptor", e.to_string()))?;
        *self.acceptor_thread.lock() = Some(thread);
        Ok(())
    }

    /// Stop admitting new connections; established ones keep flowing.
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::Release);
        self.control.pause();
        info!("Endpoint paused");
    }

    /// Resume after a pause.
    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::Release);
        self.control.resume();
        info!("Endpoint resumed");
    }

    /// Cooperative shutdown.
    ///
    /// # Errors
    ///
    /// `EndpointError::NotRunning` when already stopped;
    /// `EndpointError::ShutdownTimeout` when a poller failed to exit within
    /// the bounded wait.
    pub fn stop(&self) -> Result<()> {
        if !self.shared.is_running() {
            return Err(EndpointError::NotRunning.into());
        }
        info!("Stopping endpoint");

        // No new admissions: park the acceptor and unblock it if it is
        // waiting on a full gate
        self.shared.paused.store(true, Ordering::Release);
        self.control.pause();
        self.shared.limit.break_latch();
        self.shared.running.store(false, Ordering::Release);
        self.control.interrupt();

        if let Some(thread) = self.acceptor_thread.lock().take() {
            let _ = thread.join();
        }

        // Pollers cancel every connection they own with a Stop and count
        // down the latch as they exit
        let handles = std::mem::take(&mut *self.pollers.lock());
        for handle in &handles {
            handle.close();
        }

        let wait = self.shared.config.poller.selector_timeout()
            + self.shared.config.connection.drain_timeout();
        let latch = self.stop_latch.lock().take();
        let clean = latch.as_ref().map_or(true, |l| l.wait_timeout(wait));

        if clean {
            for thread in self.poller_threads.lock().drain(..) {
                let _ = thread.join();
            }
        } else {
            // Do not wait on threads that did not check in
            self.poller_threads.lock().clear();
        }

        if let Some(workers) = self.workers.lock().take() {
            workers.shutdown();
        }

        self.shared.clear_pools();
        *self.listener.lock() = None;
        *self.local_addr.lock() = None;

        if clean {
            info!("Endpoint stopped");
            Ok(())
        } else {
            let remaining = latch.map_or(0, |l| l.remaining());
            error!("Shutdown timed out with {} poller(s) remaining", remaining);
            Err(EndpointError::ShutdownTimeout { remaining }.into())
        }
    }

    /// Whether the endpoint is serving
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Whether the acceptor is paused
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.shared.is_paused()
    }

    /// The bound listen address, once started
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Admission slots currently held
    #[must_use]
    pub fn current_connections(&self) -> usize {
        self.shared.limit.current()
    }

    /// Connections registered across all pollers
    #[must_use]
    pub fn registered_connections(&self) -> usize {
        self.pollers
            .lock()
            .iter()
            .map(|h| h.connection_count())
            .sum()
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if self.shared.is_running() {
            if let Err(e) = self.stop() {
                warn!("Endpoint drop: {}", e);
            }
        }
    }
}

/// Build the blocking listener socket.
///
/// `SO_RCVTIMEO` bounds each `accept()` so the acceptor can observe pause
/// and stop transitions.
fn bind_listener(config: &Config) -> std::result::Result<Socket, ListenerError> {
    let addr = config.listen.address;
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| ListenerError::SocketCreation(e.to_string()))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| ListenerError::socket_option("SO_REUSEADDR", e.to_string()))?;
    socket
        .set_read_timeout(Some(config.listen.accept_timeout()))
        .map_err(|e| ListenerError::socket_option("SO_RCVTIMEO", e.to_string()))?;
    socket
        .bind(&addr.into())
        .map_err(|e| ListenerError::bind(addr, e.to_string()))?;
    socket
        .listen(i32::try_from(config.listen.backlog).unwrap_or(i32::MAX))
        .map_err(|e| ListenerError::AcceptError(e.to_string()))?;

    Ok(socket)
}
