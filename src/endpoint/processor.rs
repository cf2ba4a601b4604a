//! Socket processor
//!
//! A [`SocketProcessor`] is the recyclable unit of work a poller hands to
//! the worker pool: one connection, one dispatch reason. It serializes on
//! the connection's I/O lock, finishes the TLS handshake when one is
//! pending, runs the handler, and translates the verdict into a
//! re-registration or a cancellation. Failures here cost one connection,
//! never the endpoint.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, warn};

use super::poller::PollerHandle;
use super::Shared;
use crate::conn::{Conn, InterestSet};
use crate::handler::{DispatchReason, SocketState};
use crate::pool::{PoolState, Recyclable};
use crate::tls::{self, HandshakeStatus};

/// One dispatch bound to one connection.
#[derive(Debug)]
pub(crate) struct SocketProcessor {
    conn: Option<Arc<Conn>>,
    reason: DispatchReason,
    state: PoolState,
}

impl SocketProcessor {
    pub(crate) fn new() -> Self {
        Self {
            conn: None,
            reason: DispatchReason::ReadReady,
            state: PoolState::Fresh,
        }
    }

    /// Bind this processor to a connection and reason before dispatch.
    pub(crate) fn bind(&mut self, conn: Arc<Conn>, reason: DispatchReason) {
        self.conn = Some(conn);
        self.reason = reason;
    }

    /// Run one dispatch to completion.
    pub(crate) fn run(&mut self, shared: &Arc<Shared>, handle: &Arc<PollerHandle>) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let mut reason = self.reason;

        if conn.is_cancelled() {
            return;
        }

        let mut io = conn.io();
        // A cancel may have won the race while we waited for the lock
        if conn.is_cancelled() {
            return;
        }
        let mut st = conn.state();

        if !st.handshake_complete {
            match reason {
                DispatchReason::ReadReady | DispatchReason::WriteReady => {
                    match tls::drive_handshake(&mut io) {
                        HandshakeStatus::Complete => {
                            st.handshake_complete = true;
                            debug!("Handshake complete for {}", io.peer_addr());
                            // Buffered application data may already be
                            // waiting in the session
                            reason = DispatchReason::ReadReady;
                        }
                        HandshakeStatus::NeedRead => {
                            drop(st);
                            drop(io);
                            handle.update_interest(shared, &conn, InterestSet::READ);
                            return;
                        }
                        HandshakeStatus::NeedWrite => {
                            drop(st);
                            drop(io);
                            handle.update_interest(shared, &conn, InterestSet::WRITE);
                            return;
                        }
                        HandshakeStatus::Failed => {
                            drop(st);
                            drop(io);
                            handle.cancel(shared, &conn, DispatchReason::Disconnect);
                            return;
                        }
                    }
                }
                // Terminal dispatches skip straight to teardown
                _ => {
                    drop(st);
                    drop(io);
                    handle.cancel(shared, &conn, reason);
                    return;
                }
            }
        }

        // A panicking handler costs this connection, not the thread that
        // ran it; the cancel below returns the admission slot
        let verdict = match catch_unwind(AssertUnwindSafe(|| {
            shared.handler.process(&mut io, &mut st, reason)
        })) {
            Ok(verdict) => verdict,
            Err(_) => {
                warn!("Handler panicked processing {}", io.peer_addr());
                drop(st);
                drop(io);
                handle.cancel(shared, &conn, DispatchReason::Error);
                return;
            }
        };

        match verdict {
            SocketState::Open => {
                let mut want = InterestSet::READ;
                if st.sendfile.is_some() {
                    want = want.merge(InterestSet::WRITE);
                }
                drop(st);
                drop(io);
                handle.update_interest(shared, &conn, want);
            }
            SocketState::Long => {
                st.long_lived = true;
                let mut want = st.interest;
                if st.sendfile.is_some() {
                    // The poller drives the transfer on write readiness
                    want = want.merge(InterestSet::WRITE);
                }
                let notify = st.notify_callback;
                drop(st);
                drop(io);
                if !want.is_empty() {
                    handle.update_interest(shared, &conn, want);
                }
                if notify {
                    // Ask the owning poller to run its sweep promptly
                    handle.request_notify(shared, &conn);
                }
            }
            SocketState::Closed => {
                drop(st);
                drop(io);
                handle.cancel(shared, &conn, terminal_reason(reason));
            }
        }
    }
}

/// Map a dispatch reason to the reason reported at teardown.
const fn terminal_reason(reason: DispatchReason) -> DispatchReason {
    match reason {
        DispatchReason::ReadReady | DispatchReason::WriteReady => DispatchReason::Disconnect,
        other => other,
    }
}

impl Recyclable for SocketProcessor {
    fn reset(&mut self) {
        if self.conn.is_some() {
            // A bound processor returned without running indicates a
            // dispatch that never executed
            warn!("Socket processor recycled while still bound");
        }
        self.conn = None;
        self.reason = DispatchReason::ReadReady;
    }

    fn pool_state(&self) -> PoolState {
        self.state
    }

    fn set_pool_state(&mut self, state: PoolState) {
        self.state = state;
    }
}
