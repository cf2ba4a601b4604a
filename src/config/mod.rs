//! Configuration module for conduit
//!
//! This module provides configuration types and loading utilities.
//!
//! # Example
//!
//! ```no_run
//! use conduit::config::{load_config, Config};
//!
//! let config = load_config("/etc/conduit/config.json").unwrap();
//! println!("Listening on: {}", config.listen.address);
//! ```

mod loader;
mod types;

pub use loader::{create_default_config, load_config, load_config_str, load_config_with_env};
pub use types::{
    Config, ConnectionConfig, ListenConfig, LogConfig, PollerConfig, PoolConfig, TlsConfig,
    WorkerConfig,
};
