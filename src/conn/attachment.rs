//! Per-connection poller metadata

use std::time::{Duration, Instant};

use mio::Interest;

use super::sendfile::SendfileTransfer;
use crate::pool::{PoolState, Recyclable};

/// Typed multiplexer interest.
///
/// Read and write interest are independent booleans rather than an opaque
/// bitmask, so a handler cannot accidentally set a flag the multiplexer does
/// not understand. Sweep notifications use the separate
/// [`Attachment::notify_callback`] flag and never pass through here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterestSet {
    pub read: bool,
    pub write: bool,
}

impl InterestSet {
    /// No interest
    pub const NONE: Self = Self {
        read: false,
        write: false,
    };

    /// Read interest only
    pub const READ: Self = Self {
        read: true,
        write: false,
    };

    /// Write interest only
    pub const WRITE: Self = Self {
        read: false,
        write: true,
    };

    /// Whether neither direction is armed
    #[must_use]
    pub const fn is_empty(self) -> bool {
        !self.read && !self.write
    }

    /// Union of two interest sets
    #[must_use]
    pub const fn merge(self, other: Self) -> Self {
        Self {
            read: self.read || other.read,
            write: self.write || other.write,
        }
    }

    /// Remove the directions present in `other`
    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self {
            read: self.read && !other.read,
            write: self.write && !other.write,
        }
    }

    /// Convert to a `mio::Interest`, or `None` when empty.
    ///
    /// mio cannot express an empty interest set; the caller deregisters (or
    /// skips reregistration) instead.
    #[must_use]
    pub fn to_mio(self) -> Option<Interest> {
        match (self.read, self.write) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }
}

/// Poller-side state for one connection.
///
/// Pooled; `reset()` must leave the attachment indistinguishable from a new
/// one. Invariant: `interest` reflects exactly what is currently registered
/// with the owning poller's multiplexer.
#[derive(Debug)]
pub struct Attachment {
    /// Last I/O or dispatch activity
    pub last_access: Instant,
    /// Idle expiry; `None` = never expire
    pub idle_timeout: Option<Duration>,
    /// Currently registered multiplexer interest
    pub interest: InterestSet,
    /// Request a read dispatch from the next timeout sweep, without arming
    /// any multiplexer interest
    pub notify_callback: bool,
    /// TLS handshake finished (always true for plaintext connections)
    pub handshake_complete: bool,
    /// Connection upgraded to a long-lived protocol
    pub long_lived: bool,
    /// In-flight zero-copy file transfer
    pub sendfile: Option<SendfileTransfer>,
    /// Index of the owning poller
    pub poller_id: usize,
    state: PoolState,
}

impl Attachment {
    /// Create a fresh attachment.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_access: Instant::now(),
            idle_timeout: None,
            interest: InterestSet::NONE,
            notify_callback: false,
            handshake_complete: false,
            long_lived: false,
            sendfile: None,
            poller_id: 0,
            state: PoolState::Fresh,
        }
    }

    /// Record activity now.
    pub fn touch(&mut self) {
        self.last_access = Instant::now();
    }

    /// Whether this connection has sat idle past its timeout as of `now`.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        match self.idle_timeout {
            None => false,
            Some(timeout) => now.duration_since(self.last_access) >= timeout,
        }
    }
}

impl Default for Attachment {
    fn default() -> Self {
        Self::new()
    }
}

impl Recyclable for Attachment {
    fn reset(&mut self) {
        self.last_access = Instant::now();
        self.idle_timeout = None;
        self.interest = InterestSet::NONE;
        self.notify_callback = false;
        self.handshake_complete = false;
        self.long_lived = false;
        // Dropping the transfer closes its file
        self.sendfile = None;
        self.poller_id = 0;
    }

    fn pool_state(&self) -> PoolState {
        self.state
    }

    fn set_pool_state(&mut self, state: PoolState) {
        self.state = state;
    }
}
