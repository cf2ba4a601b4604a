//! TLS termination tests
//!
//! The endpoint terminates TLS with a self-signed fixture certificate; the
//! client side runs rustls with certificate verification disabled (the
//! fixture is not anchored anywhere).

use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, SignatureScheme};

use conduit::config::TlsConfig;
use conduit::endpoint::Endpoint;
use conduit::handler::EchoHandler;

use super::test_config;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

#[derive(Debug)]
struct AcceptAnyCert(rustls::crypto::CryptoProvider);

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0
            .signature_verification_algorithms
            .supported_schemes()
    }
}

fn client_config() -> Arc<ClientConfig> {
    let provider = rustls::crypto::aws_lc_rs::default_provider();
    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider)))
        .with_no_client_auth();
    Arc::new(config)
}

fn tls_endpoint(protocols: Vec<String>) -> Endpoint {
    let mut config = test_config();
    config.tls = Some(TlsConfig {
        certificate: fixture("cert.pem"),
        private_key: fixture("key.pem"),
        protocols,
        ciphers: Vec::new(),
    });
    let endpoint = Endpoint::new(config, Arc::new(EchoHandler)).unwrap();
    endpoint.start().unwrap();
    endpoint
}

fn tls_roundtrip(endpoint: &Endpoint, payload: &[u8]) {
    let mut tcp = TcpStream::connect(endpoint.local_addr().unwrap()).unwrap();
    tcp.set_read_timeout(Some(Duration::from_secs(10))).unwrap();

    let server_name = ServerName::try_from("localhost").unwrap();
    let mut session = ClientConnection::new(client_config(), server_name).unwrap();
    let mut stream = rustls::Stream::new(&mut session, &mut tcp);

    stream.write_all(payload).unwrap();
    let mut buf = vec![0u8; payload.len()];
    stream.read_exact(&mut buf).unwrap();
    assert_eq!(buf, payload);
}

#[test]
fn test_tls_echo_roundtrip() {
    let endpoint = tls_endpoint(Vec::new());
    tls_roundtrip(&endpoint, b"encrypted roundtrip");
    endpoint.stop().unwrap();
}

#[test]
fn test_tls13_only_endpoint() {
    let endpoint = tls_endpoint(vec!["TLSv1.3".into()]);
    tls_roundtrip(&endpoint, b"tls13");
    endpoint.stop().unwrap();
}

#[test]
fn test_tls_sequential_messages() {
    let endpoint = tls_endpoint(Vec::new());

    let mut tcp = TcpStream::connect(endpoint.local_addr().unwrap()).unwrap();
    tcp.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    let server_name = ServerName::try_from("localhost").unwrap();
    let mut session = ClientConnection::new(client_config(), server_name).unwrap();
    let mut stream = rustls::Stream::new(&mut session, &mut tcp);

    for i in 0..10 {
        let payload = format!("secret-{i}");
        stream.write_all(payload.as_bytes()).unwrap();
        let mut buf = vec![0u8; payload.len()];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(buf, payload.as_bytes());
    }

    drop(stream);
    endpoint.stop().unwrap();
}

#[test]
fn test_plain_client_against_tls_endpoint_is_dropped() {
    let endpoint = tls_endpoint(Vec::new());

    let mut tcp = TcpStream::connect(endpoint.local_addr().unwrap()).unwrap();
    tcp.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    // Not a ClientHello; the handshake fails and the server closes
    tcp.write_all(b"plaintext garbage").unwrap();

    let mut buf = [0u8; 64];
    loop {
        match tcp.read(&mut buf) {
            Ok(0) => break,
            // A fatal alert may arrive before the close
            Ok(_) => {}
            Err(_) => break,
        }
    }

    endpoint.stop().unwrap();
}
