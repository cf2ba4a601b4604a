//! conduit: multi-threaded non-blocking TCP connector
//!
//! This crate provides a reactor-style TCP endpoint: one acceptor thread, a
//! small set of poller threads multiplexing socket readiness, and a bounded
//! worker pool running protocol handlers. TLS termination and zero-copy file
//! transfer are built in; the protocol itself is supplied by the caller.
//!
//! # Features
//!
//! - **Poller reactors**: N threads, each owning its own readiness
//!   multiplexer; connections are pinned to a poller round-robin
//! - **Bounded dispatch**: fixed worker pool with inline fallback, so a
//!   saturated queue slows producers instead of dropping work
//! - **Admission gate**: the acceptor blocks at `max_connections` and the
//!   listener backlog absorbs the overflow
//! - **TLS termination**: rustls-driven non-blocking handshakes
//! - **Sendfile**: kernel zero-copy transfer on Linux plaintext sockets,
//!   chunked fallback elsewhere
//! - **Graceful shutdown**: every open connection observes a `Stop`, pollers
//!   check in on a countdown latch with a bounded wait
//!
//! # Architecture
//!
//! ```text
//! Client → Acceptor → Poller (readiness) → Worker (handler)
//!              ↓            ↓                   ↓
//!        LimitLatch    timeout sweep      ConnectionHandler
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use conduit::config::Config;
//! use conduit::endpoint::Endpoint;
//! use conduit::handler::EchoHandler;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = Config::default_config();
//! config.listen.address = "127.0.0.1:8080".parse()?;
//!
//! let endpoint = Endpoint::new(config, Arc::new(EchoHandler))?;
//! endpoint.start()?;
//! // ... serve until shutdown ...
//! endpoint.stop()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration types and loading
//! - [`conn`]: Connection, attachment and sendfile state
//! - [`endpoint`]: Endpoint lifecycle, pollers, workers, admission
//! - [`error`]: Error types
//! - [`handler`]: The protocol handler surface
//! - [`pool`]: Recyclable object pools
//! - [`tls`]: TLS configuration and handshake driving

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod conn;
pub mod endpoint;
pub mod error;
pub mod handler;
pub mod pool;
pub mod tls;

// Re-export commonly used types at the crate root
pub use config::{Config, ConnectionConfig, ListenConfig, PollerConfig, TlsConfig, WorkerConfig};
pub use conn::{Attachment, Conn, Connection, InterestSet, SendfileProgress, SendfileTransfer};
pub use endpoint::Endpoint;
pub use error::{
    ConduitError, ConfigError, ConnectionError, EndpointError, ListenerError, Result, TlsError,
};
pub use handler::{ConnectionHandler, DispatchReason, EchoHandler, SocketState};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
