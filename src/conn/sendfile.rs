//! Zero-copy file transfer
//!
//! A [`SendfileTransfer`] pushes a byte range of a file to a connection
//! without staging it through the handler. On Linux plaintext connections the
//! kernel `sendfile(2)` path is used; TLS connections and other platforms
//! fall back to chunked reads through the connection's write path, which is
//! what the record layer requires anyway.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
#[cfg(target_os = "linux")]
use std::os::fd::AsRawFd;
use std::path::PathBuf;

use super::Connection;
use crate::error::ConnectionError;

/// Chunk size for the buffered fallback path
const CHUNK_SIZE: usize = 64 * 1024;

/// Outcome of one transfer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendfileProgress {
    /// The socket would block; arm write interest and retry on readiness
    Blocked,
    /// All requested bytes are on the wire
    Done { keep_alive: bool },
}

/// State of one in-flight file transfer.
///
/// Progress is tracked in `position`/`remaining` so a transfer survives any
/// number of `Blocked` round-trips through the poller.
#[derive(Debug)]
pub struct SendfileTransfer {
    file: File,
    path: PathBuf,
    position: u64,
    remaining: u64,
    zero_copy: bool,
    /// Keep the connection open (re-arm read) after completion
    pub keep_alive: bool,
}

impl SendfileTransfer {
    /// Open a file for transfer.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened, or if `position + count` exceeds
    /// the current file length (the caller asked for more bytes than exist).
    pub fn open(
        path: impl Into<PathBuf>,
        position: u64,
        count: u64,
        keep_alive: bool,
    ) -> Result<Self, ConnectionError> {
        let path = path.into();
        let file = File::open(&path)?;
        let len = file.metadata()?.len();
        if position.saturating_add(count) > len {
            return Err(ConnectionError::FileTruncated {
                path: path.display().to_string(),
            });
        }
        Ok(Self {
            file,
            path,
            position,
            remaining: count,
            zero_copy: true,
            keep_alive,
        })
    }

    /// Force the chunked fallback even where the kernel fast path applies.
    pub fn disable_zero_copy(&mut self) {
        self.zero_copy = false;
    }

    /// Bytes not yet written to the socket
    #[must_use]
    pub const fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Source path, for diagnostics
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Push bytes until the transfer completes or the socket blocks.
    ///
    /// Any bytes still buffered on the connection are drained first, so a
    /// response header queued before the transfer goes out ahead of the file.
    ///
    /// # Errors
    ///
    /// `FileTruncated` if the file shrank mid-transfer; otherwise I/O errors
    /// from the socket.
    pub fn transfer(&mut self, conn: &mut Connection) -> Result<SendfileProgress, ConnectionError> {
        if !conn.flush_pending()? {
            return Ok(SendfileProgress::Blocked);
        }

        #[cfg(target_os = "linux")]
        if self.zero_copy && !conn.is_tls() {
            return self.transfer_zero_copy(conn);
        }

        self.transfer_buffered(conn)
    }

    #[cfg(target_os = "linux")]
    fn transfer_zero_copy(
        &mut self,
        conn: &mut Connection,
    ) -> Result<SendfileProgress, ConnectionError> {
        let out_fd = conn.stream_mut().as_raw_fd();
        let in_fd = self.file.as_raw_fd();

        while self.remaining > 0 {
            let mut offset = self.position as libc::off_t;
            let chunk = usize::try_from(self.remaining).unwrap_or(usize::MAX);
            let sent = unsafe { libc::sendfile(out_fd, in_fd, &mut offset, chunk) };

            if sent < 0 {
                let err = io::Error::last_os_error();
                return match err.kind() {
                    io::ErrorKind::WouldBlock => Ok(SendfileProgress::Blocked),
                    io::ErrorKind::Interrupted => continue,
                    _ => Err(ConnectionError::IoError(err)),
                };
            }
            if sent == 0 {
                // EOF before the requested range was exhausted
                return Err(ConnectionError::FileTruncated {
                    path: self.path.display().to_string(),
                });
            }

            let sent = sent as u64;
            self.position += sent;
            self.remaining -= sent;
        }

        Ok(SendfileProgress::Done {
            keep_alive: self.keep_alive,
        })
    }

    /// Chunked fallback: reads file data and sends it through the
    /// connection's ordinary write path (mandatory for TLS).
    fn transfer_buffered(
        &mut self,
        conn: &mut Connection,
    ) -> Result<SendfileProgress, ConnectionError> {
        let mut chunk = vec![0u8; CHUNK_SIZE];

        while self.remaining > 0 {
            let want = usize::try_from(self.remaining.min(CHUNK_SIZE as u64))
                .unwrap_or(CHUNK_SIZE);
            self.file.seek(SeekFrom::Start(self.position))?;
            let read = self.file.read(&mut chunk[..want])?;
            if read == 0 {
                return Err(ConnectionError::FileTruncated {
                    path: self.path.display().to_string(),
                });
            }

            conn.queue_write(&chunk[..read]);
            self.position += read as u64;
            self.remaining -= read as u64;

            if !conn.flush_pending()? {
                return Ok(SendfileProgress::Blocked);
            }
        }

        Ok(SendfileProgress::Done {
            keep_alive: self.keep_alive,
        })
    }
}
