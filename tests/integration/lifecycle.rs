//! Connection lifecycle tests
//!
//! Full accept → poll → dispatch → echo paths, concurrent clients, and the
//! admission gate under load.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use conduit::endpoint::Endpoint;
use conduit::handler::EchoHandler;

use super::{test_config, RecordingHandler};

fn connect(addr: std::net::SocketAddr) -> TcpStream {
    let client = TcpStream::connect(addr).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    client
}

fn roundtrip(client: &mut TcpStream, payload: &[u8]) {
    client.write_all(payload).unwrap();
    let mut buf = vec![0u8; payload.len()];
    client.read_exact(&mut buf).unwrap();
    assert_eq!(buf, payload);
}

#[test]
fn test_sequential_roundtrips_on_one_connection() {
    let endpoint = Endpoint::new(test_config(), Arc::new(EchoHandler)).unwrap();
    endpoint.start().unwrap();
    let addr = endpoint.local_addr().unwrap();

    let mut client = connect(addr);
    for i in 0..20 {
        roundtrip(&mut client, format!("message-{i}").as_bytes());
    }

    drop(client);
    endpoint.stop().unwrap();
}

#[test]
fn test_concurrent_clients_single_dispatch() {
    let mut config = test_config();
    config.poller.count = 2;
    config.worker.count = 4;

    let handler = Arc::new(RecordingHandler::default());
    let endpoint = Endpoint::new(config, Arc::clone(&handler) as _).unwrap();
    endpoint.start().unwrap();
    let addr = endpoint.local_addr().unwrap();

    let mut joins = Vec::new();
    for id in 0..8 {
        joins.push(thread::spawn(move || {
            let mut client = connect(addr);
            for i in 0..50 {
                roundtrip(&mut client, format!("client-{id}-{i}").as_bytes());
            }
        }));
    }
    for join in joins {
        join.join().unwrap();
    }

    assert!(
        !handler.overlap_detected(),
        "a connection was dispatched to two workers at once"
    );
    endpoint.stop().unwrap();
}

#[test]
fn test_admission_gate_blocks_then_serves() {
    let mut config = test_config();
    config.connection.max_connections = 2;

    let endpoint = Endpoint::new(config, Arc::new(EchoHandler)).unwrap();
    endpoint.start().unwrap();
    let addr = endpoint.local_addr().unwrap();

    // Fill both admission slots and keep them open
    let mut first = connect(addr);
    roundtrip(&mut first, b"one");
    let mut second = connect(addr);
    roundtrip(&mut second, b"two");

    // The third connection parks in the listener backlog; its echo cannot
    // arrive until a slot frees up
    let mut third = connect(addr);
    third.write_all(b"three").unwrap();

    let release = thread::spawn(move || {
        thread::sleep(Duration::from_millis(400));
        drop(first);
    });

    let mut buf = [0u8; 5];
    third.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"three");
    release.join().unwrap();

    drop(second);
    drop(third);
    endpoint.stop().unwrap();
    assert_eq!(endpoint.current_connections(), 0);
}

#[test]
fn test_pause_while_gate_full_blocks_next_admission() {
    let mut config = test_config();
    config.connection.max_connections = 1;

    let endpoint = Endpoint::new(config, Arc::new(EchoHandler)).unwrap();
    endpoint.start().unwrap();
    let addr = endpoint.local_addr().unwrap();

    // Occupy the only slot; the acceptor now waits on the admission gate
    let mut first = connect(addr);
    roundtrip(&mut first, b"hold");

    // The second client parks in the listener backlog
    let mut second = connect(addr);
    second.write_all(b"next").unwrap();

    endpoint.pause();

    // Freeing the slot wakes the acceptor, but it must park instead of
    // admitting the backlogged client
    drop(first);
    second
        .set_read_timeout(Some(Duration::from_millis(400)))
        .unwrap();
    let mut buf = [0u8; 4];
    assert!(
        second.read_exact(&mut buf).is_err(),
        "client admitted while paused"
    );

    endpoint.resume();
    second
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    second.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"next");

    drop(second);
    endpoint.stop().unwrap();
}

#[test]
fn test_many_clients_served_within_limit() {
    let mut config = test_config();
    config.connection.max_connections = 4;

    let endpoint = Endpoint::new(config, Arc::new(EchoHandler)).unwrap();
    endpoint.start().unwrap();
    let addr = endpoint.local_addr().unwrap();

    // More clients than slots, each short-lived; all must be served
    for i in 0..16 {
        let mut client = connect(addr);
        roundtrip(&mut client, format!("burst-{i}").as_bytes());
    }

    endpoint.stop().unwrap();
    assert_eq!(endpoint.current_connections(), 0);
}
