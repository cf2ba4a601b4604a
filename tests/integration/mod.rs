//! Integration test modules
//!
//! Every test in this tree drives a real [`Endpoint`] bound to an ephemeral
//! loopback port and talks to it with plain `std::net` clients. The shared
//! helpers below keep the per-module setup small.

mod fault_isolation;
mod lifecycle;
mod sendfile_transfer;
mod shutdown;
mod timeout;
mod tls_echo;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use conduit::config::Config;
use conduit::conn::{Attachment, Conn, Connection};
use conduit::handler::{ConnectionHandler, DispatchReason, EchoHandler, SocketState};

/// A config suitable for tests: ephemeral port, one poller, short accept
/// timeout so shutdown joins quickly.
pub fn test_config() -> Config {
    let mut config = Config::default_config();
    config.listen.address = "127.0.0.1:0".parse().unwrap();
    config.listen.accept_timeout_ms = 100;
    config.poller.count = 1;
    config.poller.selector_timeout_ms = 100;
    config.worker.count = 2;
    config.connection.memory_reserve_kb = 64;
    config
}

/// Echo handler that records release reasons and flags any violation of the
/// one-dispatch-per-connection guarantee.
#[derive(Default)]
pub struct RecordingHandler {
    inner: EchoHandler,
    releases: Mutex<Vec<DispatchReason>>,
    active: Mutex<HashSet<SocketAddr>>,
    overlap: AtomicBool,
}

impl RecordingHandler {
    pub fn releases(&self) -> Vec<DispatchReason> {
        self.releases.lock().unwrap().clone()
    }

    pub fn overlap_detected(&self) -> bool {
        self.overlap.load(Ordering::SeqCst)
    }
}

impl ConnectionHandler for RecordingHandler {
    fn process(
        &self,
        conn: &mut Connection,
        attachment: &mut Attachment,
        reason: DispatchReason,
    ) -> SocketState {
        let peer = conn.peer_addr();
        if !self.active.lock().unwrap().insert(peer) {
            self.overlap.store(true, Ordering::SeqCst);
        }
        let state = self.inner.process(conn, attachment, reason);
        self.active.lock().unwrap().remove(&peer);
        state
    }

    fn release(&self, _conn: &Conn, reason: DispatchReason) {
        self.releases.lock().unwrap().push(reason);
    }
}
