//! Connection handler surface
//!
//! The endpoint is protocol-agnostic: once a socket is ready, a
//! [`ConnectionHandler`] decides what the bytes mean. Handlers run on worker
//! threads under the per-connection I/O lock, so a handler never sees the
//! same connection from two threads at once.

use crate::conn::{Attachment, Conn, Connection, InterestSet};

/// Why a connection is being handed to the handler (or released).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchReason {
    /// The socket has bytes to read (or the sweep raised a callback notify)
    ReadReady,
    /// The socket accepted writes again
    WriteReady,
    /// Idle timeout elapsed
    Timeout,
    /// The peer disconnected or the connection failed
    Disconnect,
    /// The endpoint is shutting down
    Stop,
    /// An unexpected processing error
    Error,
}

/// Handler verdict after processing a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// Re-arm read interest and wait for the next request
    Open,
    /// Long-lived exchange; re-arm whatever interest the handler declared in
    /// the attachment
    Long,
    /// Tear the connection down
    Closed,
}

/// Protocol logic plugged into the endpoint.
pub trait ConnectionHandler: Send + Sync {
    /// Process one dispatch for a ready connection.
    ///
    /// The handler owns the connection for the duration of the call and may
    /// read, write, update the attachment's declared interest, or start a
    /// sendfile transfer.
    fn process(
        &self,
        conn: &mut Connection,
        attachment: &mut Attachment,
        reason: DispatchReason,
    ) -> SocketState;

    /// Called exactly once when a connection is cancelled, before its
    /// resources are recycled.
    fn release(&self, conn: &Conn, reason: DispatchReason) {
        let _ = (conn, reason);
    }
}

/// Echoes every received byte back to the peer.
///
/// Used by the demo binary and the integration tests.
#[derive(Debug, Default)]
pub struct EchoHandler;

impl ConnectionHandler for EchoHandler {
    fn process(
        &self,
        conn: &mut Connection,
        attachment: &mut Attachment,
        reason: DispatchReason,
    ) -> SocketState {
        match reason {
            DispatchReason::ReadReady => {
                let appended = match conn.fill_read_buffer() {
                    Ok(n) => n,
                    Err(_) => return SocketState::Closed,
                };
                if appended == 0 && conn.peer_closed() {
                    return SocketState::Closed;
                }

                let data = conn.take_read_buffer();
                if !data.is_empty() {
                    conn.queue_write(&data);
                }
                match conn.flush_pending() {
                    Ok(true) => SocketState::Open,
                    Ok(false) => {
                        // Finish the echo before reading more
                        attachment.interest = InterestSet::WRITE;
                        SocketState::Long
                    }
                    Err(_) => SocketState::Closed,
                }
            }
            DispatchReason::WriteReady => match conn.flush_pending() {
                Ok(true) => SocketState::Open,
                Ok(false) => {
                    attachment.interest = InterestSet::WRITE;
                    SocketState::Long
                }
                Err(_) => SocketState::Closed,
            },
            DispatchReason::Timeout
            | DispatchReason::Disconnect
            | DispatchReason::Stop
            | DispatchReason::Error => SocketState::Closed,
        }
    }
}
