//! Graceful shutdown tests
//!
//! Stopping the endpoint must hand every open connection to the handler with
//! a stop reason, unwind the poller threads within the bounded latch wait,
//! and leave the endpoint restartable.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

use conduit::endpoint::Endpoint;
use conduit::handler::{DispatchReason, EchoHandler};

use super::{test_config, RecordingHandler};

#[test]
fn test_open_connections_observe_stop() {
    let handler = Arc::new(RecordingHandler::default());
    let endpoint = Endpoint::new(test_config(), Arc::clone(&handler) as _).unwrap();
    endpoint.start().unwrap();
    let addr = endpoint.local_addr().unwrap();

    let mut clients = Vec::new();
    for i in 0..3 {
        let mut client = TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let payload = format!("hold-{i}");
        client.write_all(payload.as_bytes()).unwrap();
        let mut buf = vec![0u8; payload.len()];
        client.read_exact(&mut buf).unwrap();
        clients.push(client);
    }

    endpoint.stop().unwrap();

    let releases = handler.releases();
    assert_eq!(releases.len(), 3);
    assert!(releases.iter().all(|r| *r == DispatchReason::Stop));

    // Every held client sees the socket closed from the server side
    for mut client in clients {
        let mut buf = [0u8; 16];
        assert_eq!(client.read(&mut buf).unwrap(), 0);
    }
}

#[test]
fn test_stop_is_bounded() {
    let endpoint = Endpoint::new(test_config(), Arc::new(EchoHandler)).unwrap();
    endpoint.start().unwrap();

    let _idle = TcpStream::connect(endpoint.local_addr().unwrap()).unwrap();

    let started = Instant::now();
    endpoint.stop().unwrap();
    // selector timeout (100ms) + drain timeout (5s) is the ceiling; a clean
    // unwind is far faster
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_restart_after_stop() {
    let endpoint = Endpoint::new(test_config(), Arc::new(EchoHandler)).unwrap();

    for round in 0..2 {
        endpoint.start().unwrap();
        let addr = endpoint.local_addr().unwrap();

        let mut client = TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let payload = format!("round-{round}");
        client.write_all(payload.as_bytes()).unwrap();
        let mut buf = vec![0u8; payload.len()];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(buf, payload.as_bytes());

        drop(client);
        endpoint.stop().unwrap();
        assert!(!endpoint.is_running());
    }
}
