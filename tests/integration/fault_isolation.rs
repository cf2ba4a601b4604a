//! Handler fault isolation tests
//!
//! A panicking handler must cost exactly its own connection: the admission
//! slot comes back, `release` still runs, and the worker threads keep
//! serving everyone else.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use conduit::conn::{Attachment, Conn, Connection, InterestSet};
use conduit::endpoint::Endpoint;
use conduit::handler::{ConnectionHandler, DispatchReason, SocketState};

use super::test_config;

/// Echoes normally, but any request starting with "boom" trips a panic
/// inside `process`.
#[derive(Default)]
struct TrippingHandler {
    releases: Mutex<Vec<DispatchReason>>,
}

impl TrippingHandler {
    fn releases(&self) -> Vec<DispatchReason> {
        self.releases.lock().unwrap().clone()
    }
}

impl ConnectionHandler for TrippingHandler {
    fn process(
        &self,
        conn: &mut Connection,
        attachment: &mut Attachment,
        reason: DispatchReason,
    ) -> SocketState {
        match reason {
            DispatchReason::ReadReady => {
                let appended = match conn.fill_read_buffer() {
                    Ok(n) => n,
                    Err(_) => return SocketState::Closed,
                };
                if appended == 0 && conn.peer_closed() {
                    return SocketState::Closed;
                }
                let data = conn.take_read_buffer();
                assert!(!data.starts_with(b"boom"), "injected handler fault");
                if !data.is_empty() {
                    conn.queue_write(&data);
                }
                match conn.flush_pending() {
                    Ok(true) => SocketState::Open,
                    Ok(false) => {
                        attachment.interest = InterestSet::WRITE;
                        SocketState::Long
                    }
                    Err(_) => SocketState::Closed,
                }
            }
            DispatchReason::WriteReady => match conn.flush_pending() {
                Ok(true) => SocketState::Open,
                Ok(false) => {
                    attachment.interest = InterestSet::WRITE;
                    SocketState::Long
                }
                Err(_) => SocketState::Closed,
            },
            _ => SocketState::Closed,
        }
    }

    fn release(&self, _conn: &Conn, reason: DispatchReason) {
        self.releases.lock().unwrap().push(reason);
    }
}

fn connect(addr: std::net::SocketAddr) -> TcpStream {
    let client = TcpStream::connect(addr).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    client
}

#[test]
fn test_panicking_handler_costs_only_its_connection() {
    let mut config = test_config();
    config.connection.max_connections = 2;

    let handler = Arc::new(TrippingHandler::default());
    let endpoint = Endpoint::new(config, Arc::clone(&handler) as _).unwrap();
    endpoint.start().unwrap();
    let addr = endpoint.local_addr().unwrap();

    // More faulting clients than admission slots or worker threads: a
    // leaked slot or a dead worker would leave a later client hanging
    for _ in 0..4 {
        let mut client = connect(addr);
        client.write_all(b"boom").unwrap();
        let mut buf = [0u8; 16];
        let read = client.read(&mut buf).unwrap();
        assert_eq!(read, 0, "faulted connection should be torn down");
    }

    // The endpoint is still fully serviceable
    let mut client = connect(addr);
    client.write_all(b"hello").unwrap();
    let mut buf = [0u8; 5];
    client.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"hello");

    drop(client);
    endpoint.stop().unwrap();
    assert_eq!(endpoint.current_connections(), 0);

    let errors = handler
        .releases()
        .into_iter()
        .filter(|r| *r == DispatchReason::Error)
        .count();
    assert_eq!(errors, 4, "every faulted connection must be released");
}
