//! Configuration types for conduit
//!
//! This module defines all configuration structures used by the connector.
//! Configuration is loaded from JSON files and can be validated at startup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Listener configuration
    pub listen: ListenConfig,

    /// Poller (reactor) configuration
    #[serde(default)]
    pub poller: PollerConfig,

    /// Connection limits and timeouts
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Worker pool configuration
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Object pool capacities
    #[serde(default)]
    pub pools: PoolConfig,

    /// TLS configuration (absent = plaintext)
    #[serde(default)]
    pub tls: Option<TlsConfig>,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen.validate()?;
        self.poller.validate()?;
        self.connection.validate()?;
        self.worker.validate()?;
        self.pools.validate()?;
        if let Some(tls) = &self.tls {
            tls.validate()?;
        }
        Ok(())
    }

    /// Create a minimal default configuration
    #[must_use]
    pub fn default_config() -> Self {
        Self {
            listen: ListenConfig::default(),
            poller: PollerConfig::default(),
            connection: ConnectionConfig::default(),
            worker: WorkerConfig::default(),
            pools: PoolConfig::default(),
            tls: None,
            log: LogConfig::default(),
        }
    }
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    /// Listen address (e.g., "127.0.0.1:8443")
    pub address: SocketAddr,

    /// TCP accept backlog
    #[serde(default = "default_backlog")]
    pub backlog: u32,

    /// Accept timeout in milliseconds; bounds how long the acceptor blocks
    /// before re-checking the endpoint state
    #[serde(default = "default_accept_timeout_ms")]
    pub accept_timeout_ms: u64,

    /// Set TCP_NODELAY on accepted sockets
    #[serde(default = "default_true")]
    pub tcp_nodelay: bool,
}

impl ListenConfig {
    /// Validate the listener configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backlog == 0 {
            return Err(ConfigError::ValidationError(
                "listen.backlog must be greater than zero".into(),
            ));
        }
        if self.accept_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "listen.accept_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Accept timeout as a `Duration`
    #[must_use]
    pub const fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout_ms)
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8080".parse().expect("valid default address"),
            backlog: default_backlog(),
            accept_timeout_ms: default_accept_timeout_ms(),
            tcp_nodelay: true,
        }
    }
}

/// Poller (reactor) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollerConfig {
    /// Number of poller threads (default: min(2, CPU count))
    #[serde(default = "default_poller_count")]
    pub count: usize,

    /// Maximum time one poll call blocks, in milliseconds; also bounds how
    /// stale a timeout sweep can get with no I/O activity
    #[serde(default = "default_selector_timeout_ms")]
    pub selector_timeout_ms: u64,

    /// Minimum interval between timeout sweeps, in milliseconds
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Event capacity handed to each poll call
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl PollerConfig {
    /// Validate the poller configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.count == 0 {
            return Err(ConfigError::ValidationError(
                "poller.count must be greater than zero".into(),
            ));
        }
        if self.selector_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "poller.selector_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "poller.event_capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Selector timeout as a `Duration`
    #[must_use]
    pub const fn selector_timeout(&self) -> Duration {
        Duration::from_millis(self.selector_timeout_ms)
    }

    /// Sweep interval as a `Duration`
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            count: default_poller_count(),
            selector_timeout_ms: default_selector_timeout_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// Connection limits and timeouts
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    /// Maximum concurrent connections; the acceptor blocks at this cap
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Per-connection idle timeout in milliseconds; a value <= 0 means the
    /// connection never expires
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: i64,

    /// Read buffer size per connection, in bytes
    #[serde(default = "default_buffer_size")]
    pub read_buffer_size: usize,

    /// Write buffer size per connection, in bytes
    #[serde(default = "default_buffer_size")]
    pub write_buffer_size: usize,

    /// Enable the zero-copy sendfile path
    #[serde(default = "default_true")]
    pub sendfile: bool,

    /// Memory reserve released under allocation pressure, in kilobytes;
    /// zero disables the reserve
    #[serde(default = "default_memory_reserve_kb")]
    pub memory_reserve_kb: usize,

    /// Drain timeout for graceful shutdown in milliseconds
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

impl ConnectionConfig {
    /// Validate the connection configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "connection.max_connections must be greater than zero".into(),
            ));
        }
        if self.read_buffer_size == 0 || self.write_buffer_size == 0 {
            return Err(ConfigError::ValidationError(
                "connection buffer sizes must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Idle timeout as a `Duration`; `None` means the connection never expires
    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        if self.idle_timeout_ms <= 0 {
            None
        } else {
            Some(Duration::from_millis(self.idle_timeout_ms as u64))
        }
    }

    /// Drain timeout as a `Duration`
    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            idle_timeout_ms: default_idle_timeout_ms(),
            read_buffer_size: default_buffer_size(),
            write_buffer_size: default_buffer_size(),
            sendfile: true,
            memory_reserve_kb: default_memory_reserve_kb(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Number of worker threads (default: CPU count)
    #[serde(default = "default_worker_count")]
    pub count: usize,

    /// Bounded dispatch queue depth; a full queue runs the task inline on
    /// the submitting poller thread
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

impl WorkerConfig {
    /// Validate the worker configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.count == 0 {
            return Err(ConfigError::ValidationError(
                "worker.count must be greater than zero".into(),
            ));
        }
        if self.queue_depth == 0 {
            return Err(ConfigError::ValidationError(
                "worker.queue_depth must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            queue_depth: default_queue_depth(),
        }
    }
}

/// Object pool capacities
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Poller event pool capacity
    #[serde(default = "default_event_pool")]
    pub events: usize,

    /// Attachment pool capacity
    #[serde(default = "default_attachment_pool")]
    pub attachments: usize,

    /// Socket processor pool capacity
    #[serde(default = "default_processor_pool")]
    pub processors: usize,
}

impl PoolConfig {
    /// Validate the pool capacities
    ///
    /// The pools are backed by bounded queues that require a non-zero
    /// capacity, so zero is rejected here rather than at construction.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.events == 0 {
            return Err(ConfigError::ValidationError(
                "pools.events must be greater than zero".into(),
            ));
        }
        if self.attachments == 0 {
            return Err(ConfigError::ValidationError(
                "pools.attachments must be greater than zero".into(),
            ));
        }
        if self.processors == 0 {
            return Err(ConfigError::ValidationError(
                "pools.processors must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            events: default_event_pool(),
            attachments: default_attachment_pool(),
            processors: default_processor_pool(),
        }
    }
}

/// TLS configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// PEM certificate chain path
    pub certificate: PathBuf,

    /// PEM private key path
    pub private_key: PathBuf,

    /// Protocol version allow-list, e.g. ["TLSv1.3", "TLSv1.2"];
    /// empty = rustls defaults
    #[serde(default)]
    pub protocols: Vec<String>,

    /// Cipher suite allow-list by IANA name; empty = rustls defaults
    #[serde(default)]
    pub ciphers: Vec<String>,
}

impl TlsConfig {
    /// Validate the TLS configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.certificate.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "tls.certificate must not be empty".into(),
            ));
        }
        if self.private_key.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "tls.private_key must not be empty".into(),
            ));
        }
        for proto in &self.protocols {
            if proto != "TLSv1.2" && proto != "TLSv1.3" {
                return Err(ConfigError::ValidationError(format!(
                    "Unsupported TLS protocol version: {proto}"
                )));
            }
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit compact single-line output instead of the full format
    #[serde(default)]
    pub compact: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            compact: false,
        }
    }
}

const fn default_true() -> bool {
    true
}

const fn default_backlog() -> u32 {
    128
}

const fn default_accept_timeout_ms() -> u64 {
    1000
}

fn default_poller_count() -> usize {
    num_cpus::get().min(2)
}

const fn default_selector_timeout_ms() -> u64 {
    1000
}

const fn default_sweep_interval_ms() -> u64 {
    1000
}

const fn default_event_capacity() -> usize {
    1024
}

const fn default_max_connections() -> usize {
    1024
}

const fn default_idle_timeout_ms() -> i64 {
    60_000
}

const fn default_buffer_size() -> usize {
    16 * 1024
}

const fn default_memory_reserve_kb() -> usize {
    1024
}

const fn default_drain_timeout_ms() -> u64 {
    5000
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

const fn default_queue_depth() -> usize {
    1024
}

const fn default_event_pool() -> usize {
    512
}

const fn default_attachment_pool() -> usize {
    512
}

const fn default_processor_pool() -> usize {
    256
}

fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default_config();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_poller_count_default() {
        let config = PollerConfig::default();
        assert!(config.count >= 1);
        assert!(config.count <= 2);
    }

    #[test]
    fn test_idle_timeout_policy() {
        let mut config = ConnectionConfig::default();

        config.idle_timeout_ms = 2000;
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(2)));

        // Zero and negative values mean "never expire"
        config.idle_timeout_ms = 0;
        assert_eq!(config.idle_timeout(), None);

        config.idle_timeout_ms = -1;
        assert_eq!(config.idle_timeout(), None);
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let mut config = Config::default_config();
        config.poller.count = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default_config();
        config.connection.max_connections = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default_config();
        config.worker.queue_depth = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default_config();
        config.pools.events = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default_config();
        config.pools.attachments = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default_config();
        config.pools.processors = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tls_protocol_allowlist_validation() {
        let tls = TlsConfig {
            certificate: "/etc/conduit/cert.pem".into(),
            private_key: "/etc/conduit/key.pem".into(),
            protocols: vec!["TLSv1.3".into()],
            ciphers: vec![],
        };
        assert!(tls.validate().is_ok());

        let tls = TlsConfig {
            certificate: "/etc/conduit/cert.pem".into(),
            private_key: "/etc/conduit/key.pem".into(),
            protocols: vec!["SSLv3".into()],
            ciphers: vec![],
        };
        assert!(tls.validate().is_err());
    }
}
