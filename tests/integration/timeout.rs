//! Idle timeout sweep tests

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use conduit::endpoint::Endpoint;
use conduit::handler::DispatchReason;

use super::{test_config, RecordingHandler};

#[test]
fn test_idle_connection_expires_with_timeout_reason() {
    let mut config = test_config();
    config.connection.idle_timeout_ms = 200;
    config.poller.sweep_interval_ms = 100;

    let handler = Arc::new(RecordingHandler::default());
    let endpoint = Endpoint::new(config, Arc::clone(&handler) as _).unwrap();
    endpoint.start().unwrap();
    let addr = endpoint.local_addr().unwrap();

    let mut client = TcpStream::connect(addr).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    client.write_all(b"ping").unwrap();
    let mut buf = [0u8; 4];
    client.read_exact(&mut buf).unwrap();

    // Go idle past the timeout; the sweep closes the connection
    let mut probe = [0u8; 16];
    assert_eq!(client.read(&mut probe).unwrap(), 0);

    let releases = handler.releases();
    assert_eq!(releases, vec![DispatchReason::Timeout]);

    endpoint.stop().unwrap();
    assert_eq!(endpoint.current_connections(), 0);
}

#[test]
fn test_activity_defers_expiry() {
    let mut config = test_config();
    config.connection.idle_timeout_ms = 500;
    config.poller.sweep_interval_ms = 100;

    let endpoint = Endpoint::new(config, Arc::new(conduit::handler::EchoHandler)).unwrap();
    endpoint.start().unwrap();
    let addr = endpoint.local_addr().unwrap();

    let mut client = TcpStream::connect(addr).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    // Keep touching the connection for longer than the idle timeout
    for _ in 0..5 {
        std::thread::sleep(Duration::from_millis(200));
        client.write_all(b"keepalive").unwrap();
        let mut buf = [0u8; 9];
        client.read_exact(&mut buf).unwrap();
    }

    endpoint.stop().unwrap();
}

#[test]
fn test_non_positive_timeout_never_expires() {
    let mut config = test_config();
    config.connection.idle_timeout_ms = -1;
    config.poller.sweep_interval_ms = 100;

    let handler = Arc::new(RecordingHandler::default());
    let endpoint = Endpoint::new(config, Arc::clone(&handler) as _).unwrap();
    endpoint.start().unwrap();
    let addr = endpoint.local_addr().unwrap();

    let mut client = TcpStream::connect(addr).unwrap();
    client.write_all(b"idle").unwrap();
    let mut buf = [0u8; 4];
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    client.read_exact(&mut buf).unwrap();

    // Many sweep intervals pass without the connection being expired
    std::thread::sleep(Duration::from_millis(600));
    assert!(handler.releases().is_empty());

    // Still alive
    client.write_all(b"ping").unwrap();
    client.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"ping");

    drop(client);
    endpoint.stop().unwrap();
}
