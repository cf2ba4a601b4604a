//! Error types for conduit
//!
//! This module defines the error hierarchy for the connector. All errors are
//! categorized by subsystem and include recovery hints so callers can decide
//! between retrying, dropping a single connection, or failing the endpoint.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Top-level error type for conduit
#[derive(Debug, Error)]
pub enum ConduitError {
    /// Configuration errors (file parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Listener bind/accept errors
    #[error("Listener error: {0}")]
    Listener(#[from] ListenerError),

    /// Connection handling errors
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// TLS setup and handshake errors
    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    /// Endpoint lifecycle errors
    #[error("Endpoint error: {0}")]
    Endpoint(#[from] EndpointError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ConduitError {
    /// Check if this error is recoverable (can retry operation)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::Listener(e) => e.is_recoverable(),
            Self::Connection(e) => e.is_recoverable(),
            Self::Tls(e) => e.is_recoverable(),
            Self::Endpoint(e) => e.is_recoverable(),
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
            ),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Config errors are generally not recoverable without user intervention
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }
}

/// Listener bind/accept errors
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to create the listening socket
    #[error("Failed to create listening socket: {0}")]
    SocketCreation(String),

    /// Failed to set a socket option
    #[error("Failed to set socket option {option}: {reason}")]
    SocketOption { option: String, reason: String },

    /// Failed to bind to address
    #[error("Failed to bind to {addr}: {reason}")]
    BindError { addr: SocketAddr, reason: String },

    /// Failed to accept a connection
    #[error("Accept error: {0}")]
    AcceptError(String),

    /// I/O error
    #[error("Listener I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl ListenerError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::SocketCreation(_) => false,
            Self::SocketOption { .. } => false,
            Self::BindError { .. } => false,
            Self::AcceptError(_) => true,
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionReset
            ),
        }
    }

    /// Create a socket option error
    pub fn socket_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SocketOption {
            option: option.into(),
            reason: reason.into(),
        }
    }

    /// Create a bind error
    pub fn bind(addr: SocketAddr, reason: impl Into<String>) -> Self {
        Self::BindError {
            addr,
            reason: reason.into(),
        }
    }
}

/// Connection handling errors
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Connection limit reached
    #[error("Connection limit reached ({current}/{max})")]
    LimitReached { current: usize, max: usize },

    /// Connection was closed
    #[error("Connection closed: {reason}")]
    Closed { reason: String },

    /// File transfer failure
    #[error("File transfer error: {0}")]
    TransferError(String),

    /// The file shrank while a transfer was in flight
    #[error("File transfer configured to send more data than is available: {path}")]
    FileTruncated { path: String },

    /// Shutdown in progress
    #[error("Endpoint is shutting down")]
    ShuttingDown,

    /// Connection registration was already cancelled
    #[error("Connection registration already cancelled")]
    AlreadyCancelled,

    /// I/O error
    #[error("Connection I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl ConnectionError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::LimitReached { .. } => true,
            Self::Closed { .. } => false,
            Self::TransferError(_) => false,
            Self::FileTruncated { .. } => false,
            Self::ShuttingDown => false,
            Self::AlreadyCancelled => false,
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
            ),
        }
    }

    /// Create a limit reached error
    pub const fn limit_reached(current: usize, max: usize) -> Self {
        Self::LimitReached { current, max }
    }

    /// Create a closed error
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::Closed {
            reason: reason.into(),
        }
    }

    /// Create a transfer error
    pub fn transfer(msg: impl Into<String>) -> Self {
        Self::TransferError(msg.into())
    }
}

/// TLS setup and handshake errors
#[derive(Debug, Error)]
pub enum TlsError {
    /// Certificate file could not be read or contained no certificates
    #[error("Failed to load certificate from {path}: {reason}")]
    Certificate { path: String, reason: String },

    /// Private key file could not be read or contained no keys
    #[error("Failed to load private key from {path}: {reason}")]
    PrivateKey { path: String, reason: String },

    /// Requested protocol version is not supported
    #[error("Unsupported TLS protocol version: {0}")]
    UnsupportedProtocol(String),

    /// Requested cipher suite is not supported
    #[error("Unsupported cipher suite: {0}")]
    UnsupportedCipher(String),

    /// Server configuration could not be built
    #[error("Failed to build TLS server configuration: {0}")]
    ConfigBuild(String),

    /// Handshake failed
    #[error("TLS handshake failed: {0}")]
    HandshakeFailed(String),

    /// I/O error during handshake
    #[error("TLS I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl TlsError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Certificate { .. } => false,
            Self::PrivateKey { .. } => false,
            Self::UnsupportedProtocol(_) => false,
            Self::UnsupportedCipher(_) => false,
            Self::ConfigBuild(_) => false,
            // A failed handshake only loses that one connection
            Self::HandshakeFailed(_) => true,
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ),
        }
    }

    /// Create a certificate error
    pub fn certificate(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Certificate {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a private key error
    pub fn private_key(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PrivateKey {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Endpoint lifecycle errors
#[derive(Debug, Error)]
pub enum EndpointError {
    /// The endpoint is already running
    #[error("Endpoint is already running")]
    AlreadyRunning,

    /// The endpoint is not running
    #[error("Endpoint is not running")]
    NotRunning,

    /// Poller threads did not exit within the bounded shutdown wait
    #[error("Shutdown timed out with {remaining} poller(s) still running")]
    ShutdownTimeout { remaining: usize },

    /// A worker or poller thread failed to spawn
    #[error("Failed to spawn {role} thread: {reason}")]
    ThreadSpawn { role: String, reason: String },

    /// I/O error
    #[error("Endpoint I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl EndpointError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::AlreadyRunning => true,
            Self::NotRunning => true,
            Self::ShutdownTimeout { .. } => false,
            Self::ThreadSpawn { .. } => false,
            Self::IoError(_) => false,
        }
    }

    /// Create a thread spawn error
    pub fn thread_spawn(role: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ThreadSpawn {
            role: role.into(),
            reason: reason.into(),
        }
    }
}

/// Type alias for Result with ConduitError
pub type Result<T> = std::result::Result<T, ConduitError>;
