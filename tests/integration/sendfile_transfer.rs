//! File transfer through the poller's sendfile path
//!
//! A small request/response handler: any inbound bytes trigger a transfer of
//! a fixture file, preceded by a short header so the drain-before-transfer
//! ordering is exercised end to end.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use conduit::conn::{Attachment, Connection, InterestSet, SendfileTransfer};
use conduit::endpoint::Endpoint;
use conduit::handler::{ConnectionHandler, DispatchReason, SocketState};

use super::test_config;

const HEADER: &[u8] = b"OK\n";

/// Serves the configured file for every request received.
struct FileServeHandler {
    path: PathBuf,
    keep_alive: bool,
}

impl ConnectionHandler for FileServeHandler {
    fn process(
        &self,
        conn: &mut Connection,
        attachment: &mut Attachment,
        reason: DispatchReason,
    ) -> SocketState {
        match reason {
            DispatchReason::ReadReady => {
                if conn.fill_read_buffer().is_err() {
                    return SocketState::Closed;
                }
                let request = conn.take_read_buffer();
                if request.is_empty() {
                    return if conn.peer_closed() {
                        SocketState::Closed
                    } else {
                        SocketState::Open
                    };
                }

                let len = std::fs::metadata(&self.path).unwrap().len();
                conn.queue_write(HEADER);
                match SendfileTransfer::open(&self.path, 0, len, self.keep_alive) {
                    Ok(transfer) => {
                        attachment.sendfile = Some(transfer);
                        attachment.interest = InterestSet::NONE;
                        SocketState::Long
                    }
                    Err(_) => SocketState::Closed,
                }
            }
            DispatchReason::WriteReady => SocketState::Open,
            _ => SocketState::Closed,
        }
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn fixture_file(len: usize) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&pattern(len)).unwrap();
    file.flush().unwrap();
    file
}

fn serve(file_len: usize, keep_alive: bool) -> (Endpoint, tempfile::NamedTempFile) {
    let file = fixture_file(file_len);
    let handler = FileServeHandler {
        path: file.path().to_path_buf(),
        keep_alive,
    };
    let endpoint = Endpoint::new(test_config(), Arc::new(handler)).unwrap();
    endpoint.start().unwrap();
    (endpoint, file)
}

#[test]
fn test_sendfile_byte_exact() {
    const LEN: usize = 1024 * 1024;
    let (endpoint, _file) = serve(LEN, false);

    let mut client = TcpStream::connect(endpoint.local_addr().unwrap()).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    client.write_all(b"GET").unwrap();

    let mut body = Vec::new();
    client.read_to_end(&mut body).unwrap();
    assert_eq!(body.len(), HEADER.len() + LEN);
    assert_eq!(&body[..HEADER.len()], HEADER);
    assert_eq!(&body[HEADER.len()..], &pattern(LEN)[..]);

    endpoint.stop().unwrap();
}

#[test]
fn test_sendfile_survives_slow_reader() {
    const LEN: usize = 256 * 1024;
    let (endpoint, _file) = serve(LEN, false);

    let mut client = TcpStream::connect(endpoint.local_addr().unwrap()).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    client.write_all(b"GET").unwrap();

    // Drain slowly in small chunks so the server hits EAGAIN and has to
    // re-arm write interest repeatedly
    let mut body = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match client.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                body.extend_from_slice(&chunk[..n]);
                thread::sleep(Duration::from_millis(1));
            }
            Err(e) => panic!("read failed: {e}"),
        }
    }
    assert_eq!(body.len(), HEADER.len() + LEN);
    assert_eq!(&body[HEADER.len()..], &pattern(LEN)[..]);

    endpoint.stop().unwrap();
}

#[test]
fn test_sendfile_keep_alive_serves_repeat_requests() {
    const LEN: usize = 64 * 1024;
    let (endpoint, _file) = serve(LEN, true);

    let mut client = TcpStream::connect(endpoint.local_addr().unwrap()).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();

    let expected = pattern(LEN);
    for _ in 0..2 {
        client.write_all(b"GET").unwrap();
        let mut body = vec![0u8; HEADER.len() + LEN];
        client.read_exact(&mut body).unwrap();
        assert_eq!(&body[..HEADER.len()], HEADER);
        assert_eq!(&body[HEADER.len()..], &expected[..]);
    }

    drop(client);
    endpoint.stop().unwrap();
}
