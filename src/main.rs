//! conduit: multi-threaded non-blocking TCP connector
//!
//! This is the main entry point for the standalone server binary, which runs
//! the endpoint with the built-in echo handler.
//!
//! # Usage
//!
//! ```bash
//! # Run with default configuration
//! ./conduit
//!
//! # Run with custom configuration
//! ./conduit -c /path/to/config.json
//!
//! # Run with environment overrides
//! CONDUIT_LOG_LEVEL=debug ./conduit
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use conduit::config::{load_config_with_env, Config};
use conduit::endpoint::Endpoint;
use conduit::handler::EchoHandler;

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: PathBuf,
    /// Generate default configuration
    generate_config: bool,
    /// Check configuration only
    check_config: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("/etc/conduit/config.json");
        let mut generate_config = false;
        let mut check_config = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "-g" | "--generate-config" => {
                    generate_config = true;
                }
                "--check" => {
                    check_config = true;
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("conduit v{}", conduit::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", arg);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            generate_config,
            check_config,
        }
    }
}

fn print_help() {
    println!(
        r#"conduit v{}

Multi-threaded non-blocking TCP connector.

USAGE:
    conduit [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Configuration file path [default: /etc/conduit/config.json]
    -g, --generate-config   Generate default configuration and exit
    --check                 Check configuration and exit
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT:
    CONDUIT_LISTEN_ADDR      Override listen address
    CONDUIT_LOG_LEVEL        Override log level (trace, debug, info, warn, error)
    CONDUIT_MAX_CONNECTIONS  Override maximum connections
    CONDUIT_POLLER_COUNT     Override poller thread count
    CONDUIT_WORKER_COUNT     Override worker thread count
"#,
        conduit::VERSION
    );
}

/// Initialize logging
fn init_logging(config: &Config) {
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    if config.log.compact {
        subscriber.compact().init();
    } else {
        subscriber.init();
    }
}

/// Main application entry point
fn main() -> Result<()> {
    // Parse arguments
    let args = Args::parse();

    // Handle generate-config
    if args.generate_config {
        conduit::config::create_default_config(&args.config_path)?;
        println!("Generated default configuration at {:?}", args.config_path);
        return Ok(());
    }

    // Load configuration
    let config = load_config_with_env(&args.config_path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to load configuration from {:?}: {}",
            args.config_path,
            e
        )
    })?;

    // Handle check-config
    if args.check_config {
        println!("Configuration is valid");
        return Ok(());
    }

    // Initialize logging
    init_logging(&config);

    info!("conduit v{}", conduit::VERSION);
    info!("Configuration loaded from {:?}", args.config_path);

    let endpoint = Endpoint::new(config, Arc::new(EchoHandler))?;
    endpoint.start()?;
    if let Some(addr) = endpoint.local_addr() {
        info!("Listening on {}", addr);
    }

    // Block until SIGINT/SIGTERM, then stop the endpoint
    let (tx, rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })?;
    let _ = rx.recv();

    info!("Shutdown signal received");
    endpoint.stop()?;
    info!("Shutdown complete");

    Ok(())
}
