//! Connection state
//!
//! This module defines the per-connection structures: [`Connection`] owns the
//! socket, the optional TLS session and the buffer pair; [`Attachment`] holds
//! the poller-side metadata; [`Conn`] is the shared handle that ties the two
//! together with an idempotent cancellation flag.
//!
//! Locking order: a thread that needs both locks takes `io` before `state`.

mod attachment;
mod sendfile;

pub use attachment::{Attachment, InterestSet};
pub use sendfile::{SendfileProgress, SendfileTransfer};

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};

use mio::net::TcpStream;
use mio::Token;
use parking_lot::Mutex;
use rustls::ServerConnection;

/// A single accepted socket with its TLS session and buffer pair.
///
/// Owned by exactly one thread at a time; cross-thread access goes through
/// the `io` mutex on [`Conn`].
pub struct Connection {
    stream: TcpStream,
    tls: Option<ServerConnection>,
    peer: SocketAddr,
    /// Plaintext bytes received and not yet consumed by the handler
    read_buf: Vec<u8>,
    /// Outbound bytes accepted from the handler and not yet written
    write_buf: Vec<u8>,
    read_chunk: usize,
    peer_closed: bool,
}

impl Connection {
    /// Wrap an accepted stream.
    #[must_use]
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        tls: Option<ServerConnection>,
        read_buffer_size: usize,
        write_buffer_size: usize,
    ) -> Self {
        Self {
            stream,
            tls,
            peer,
            read_buf: Vec::with_capacity(read_buffer_size),
            write_buf: Vec::with_capacity(write_buffer_size),
            read_chunk: read_buffer_size,
            peer_closed: false,
        }
    }

    /// Peer address
    #[must_use]
    pub const fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Whether this connection carries a TLS session
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// The underlying stream, for multiplexer registration
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// The TLS session, if any
    pub fn tls_mut(&mut self) -> Option<&mut ServerConnection> {
        self.tls.as_mut()
    }

    /// Split borrow of the TLS session and the stream, for handshake pumping
    pub fn tls_io(&mut self) -> Option<(&mut ServerConnection, &mut TcpStream)> {
        self.tls.as_mut().map(|tls| (tls, &mut self.stream))
    }

    /// Whether an orderly close from the peer has been observed
    #[must_use]
    pub const fn peer_closed(&self) -> bool {
        self.peer_closed
    }

    /// Read as much plaintext as is currently available into the read buffer.
    ///
    /// Returns the number of bytes appended. `Ok(0)` after a readiness event
    /// means the peer closed the connection.
    ///
    /// # Errors
    ///
    /// `WouldBlock` is consumed internally (it terminates the read loop);
    /// other I/O errors are returned.
    pub fn fill_read_buffer(&mut self) -> io::Result<usize> {
        let before = self.read_buf.len();
        let mut scratch = vec![0u8; self.read_chunk];

        if self.tls.is_some() {
            self.fill_from_tls(&mut scratch)?;
        } else {
            loop {
                match self.stream.read(&mut scratch) {
                    Ok(0) => {
                        self.peer_closed = true;
                        break;
                    }
                    Ok(n) => self.read_buf.extend_from_slice(&scratch[..n]),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(self.read_buf.len() - before)
    }

    fn fill_from_tls(&mut self, scratch: &mut [u8]) -> io::Result<()> {
        let tls = self.tls.as_mut().expect("tls session present");

        // Pull ciphertext off the socket until it would block
        loop {
            match tls.read_tls(&mut self.stream) {
                Ok(0) => {
                    self.peer_closed = true;
                    break;
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }

        tls.process_new_packets()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

        loop {
            match tls.reader().read(scratch) {
                Ok(0) => break,
                Ok(n) => self.read_buf.extend_from_slice(&scratch[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Take the buffered plaintext, leaving the read buffer empty.
    pub fn take_read_buffer(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.read_buf)
    }

    /// Queue bytes for writing. Call [`flush_pending`](Self::flush_pending)
    /// to push them to the socket.
    pub fn queue_write(&mut self, data: &[u8]) {
        self.write_buf.extend_from_slice(data);
    }

    /// Try to drain the write buffer to the socket.
    ///
    /// Returns `true` when everything pending (including TLS records) has
    /// been written; `false` means the socket would block and write interest
    /// should be registered.
    ///
    /// # Errors
    ///
    /// Returns I/O errors other than `WouldBlock`.
    pub fn flush_pending(&mut self) -> io::Result<bool> {
        if let Some(tls) = self.tls.as_mut() {
            // Move plaintext into the TLS session, then records to the socket
            while !self.write_buf.is_empty() {
                let n = tls.writer().write(&self.write_buf)?;
                self.write_buf.drain(..n);
            }
            while tls.wants_write() {
                match tls.write_tls(&mut self.stream) {
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => return Err(e),
                }
            }
            return Ok(true);
        }

        while !self.write_buf.is_empty() {
            match self.stream.write(&self.write_buf) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.write_buf.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Whether outbound bytes are still buffered
    #[must_use]
    pub fn has_pending_write(&self) -> bool {
        if !self.write_buf.is_empty() {
            return true;
        }
        self.tls.as_ref().is_some_and(|tls| tls.wants_write())
    }

    /// Send a TLS close_notify (when applicable) and shut down the socket.
    pub fn close(&mut self) {
        if let Some(tls) = self.tls.as_mut() {
            tls.send_close_notify();
            // Best effort; the peer may already be gone
            let _ = tls.write_tls(&mut self.stream);
        }
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("tls", &self.tls.is_some())
            .field("read_buffered", &self.read_buf.len())
            .field("write_buffered", &self.write_buf.len())
            .finish()
    }
}

/// Shared handle to one connection.
///
/// Pollers, workers and the timeout sweep all hold `Arc<Conn>`; the
/// `cancelled` flag makes teardown idempotent no matter which of them gets
/// there first.
pub struct Conn {
    token: Token,
    raw_fd: RawFd,
    io: Mutex<Connection>,
    state: Mutex<Attachment>,
    cancelled: AtomicBool,
    registered: AtomicBool,
}

impl Conn {
    /// Create a handle for a freshly accepted connection.
    #[must_use]
    pub fn new(token: Token, connection: Connection, attachment: Attachment) -> Self {
        let raw_fd = connection.stream.as_raw_fd();
        Self {
            token,
            raw_fd,
            io: Mutex::new(connection),
            state: Mutex::new(attachment),
            cancelled: AtomicBool::new(false),
            registered: AtomicBool::new(false),
        }
    }

    /// Multiplexer token for this connection
    #[must_use]
    pub const fn token(&self) -> Token {
        self.token
    }

    /// Raw descriptor of the stream, valid until the connection is closed.
    ///
    /// Lets pollers adjust multiplexer registration without contending on
    /// the I/O lock while a worker is mid-dispatch.
    #[must_use]
    pub const fn raw_fd(&self) -> RawFd {
        self.raw_fd
    }

    /// Lock the I/O half (socket, TLS, buffers)
    pub fn io(&self) -> parking_lot::MutexGuard<'_, Connection> {
        self.io.lock()
    }

    /// Lock the poller-side metadata
    pub fn state(&self) -> parking_lot::MutexGuard<'_, Attachment> {
        self.state.lock()
    }

    /// Atomically claim cancellation.
    ///
    /// Returns `true` for exactly one caller; all later callers get `false`
    /// and must not run teardown again.
    pub fn claim_cancel(&self) -> bool {
        self.cancelled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether this connection has been cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Mark the stream as registered with a multiplexer
    pub fn set_registered(&self, value: bool) {
        self.registered.store(value, Ordering::Release);
    }

    /// Whether the stream is currently registered with a multiplexer
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("token", &self.token.0)
            .field("cancelled", &self.is_cancelled())
            .field("registered", &self.is_registered())
            .finish()
    }
}
