//! Degraded-memory mitigation
//!
//! A block of heap is reserved at startup. When an allocation-pressure
//! failure surfaces on the accept or dispatch path, releasing the reserve
//! gives the process enough headroom to keep serving established
//! connections and log what happened, instead of failing opaquely.

use parking_lot::Mutex;
use tracing::{error, info};

/// Pre-allocated memory reserve.
#[derive(Debug)]
pub struct MemoryReserve {
    block: Mutex<Option<Vec<u8>>>,
    size: usize,
}

impl MemoryReserve {
    /// Allocate a reserve of `size` bytes. A size of zero disables it.
    #[must_use]
    pub fn new(size: usize) -> Self {
        let block = if size > 0 {
            info!("Allocated {} KiB memory reserve", size / 1024);
            Some(vec![0u8; size])
        } else {
            None
        };
        Self {
            block: Mutex::new(block),
            size,
        }
    }

    /// Drop the reserve to relieve allocation pressure.
    ///
    /// Returns `true` if memory was actually freed (the reserve existed and
    /// had not already been released).
    pub fn release(&self) -> bool {
        let freed = self.block.lock().take().is_some();
        if freed {
            error!(
                "Memory pressure detected: released {} KiB reserve",
                self.size / 1024
            );
        }
        freed
    }

    /// Re-arm the reserve once pressure has subsided.
    ///
    /// Returns `false` if the allocation itself fails or the reserve is
    /// disabled.
    pub fn restore(&self) -> bool {
        if self.size == 0 {
            return false;
        }
        let mut block = self.block.lock();
        if block.is_none() {
            *block = Some(vec![0u8; self.size]);
            info!("Memory reserve restored ({} KiB)", self.size / 1024);
            return true;
        }
        false
    }

    /// Whether the reserve is currently held
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.block.lock().is_some()
    }
}

/// Whether an I/O error indicates allocation pressure rather than a socket
/// condition.
#[must_use]
pub fn is_memory_pressure(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::OutOfMemory
        || err.raw_os_error() == Some(libc_enomem())
        || err.raw_os_error() == Some(libc_enobufs())
}

#[cfg(target_os = "linux")]
const fn libc_enomem() -> i32 {
    libc::ENOMEM
}

#[cfg(target_os = "linux")]
const fn libc_enobufs() -> i32 {
    libc::ENOBUFS
}

#[cfg(not(target_os = "linux"))]
const fn libc_enomem() -> i32 {
    12
}

#[cfg(not(target_os = "linux"))]
const fn libc_enobufs() -> i32 {
    105
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_frees_once() {
        let reserve = MemoryReserve::new(4096);
        assert!(reserve.is_armed());
        assert!(reserve.release());
        assert!(!reserve.is_armed());
        // Second release is a no-op
        assert!(!reserve.release());
    }

    #[test]
    fn test_restore_rearms() {
        let reserve = MemoryReserve::new(4096);
        reserve.release();
        assert!(reserve.restore());
        assert!(reserve.is_armed());
        // Already armed
        assert!(!reserve.restore());
    }

    #[test]
    fn test_zero_size_is_disabled() {
        let reserve = MemoryReserve::new(0);
        assert!(!reserve.is_armed());
        assert!(!reserve.release());
        assert!(!reserve.restore());
    }

    #[test]
    fn test_memory_pressure_classification() {
        let oom = std::io::Error::from(std::io::ErrorKind::OutOfMemory);
        assert!(is_memory_pressure(&oom));

        let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        assert!(!is_memory_pressure(&refused));
    }
}
