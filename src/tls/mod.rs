//! TLS provider
//!
//! Builds a `rustls::ServerConfig` from operator-supplied PEM files and
//! drives the non-blocking server-side handshake one readiness event at a
//! time. All cryptography is delegated to rustls; this module only moves
//! bytes between the socket and the session.

use std::fs::File;
use std::io::{self, BufReader};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ServerConfig, SupportedProtocolVersion};
use tracing::{debug, warn};

use crate::config::TlsConfig;
use crate::conn::Connection;
use crate::error::TlsError;

/// Result of advancing a handshake by one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// More handshake bytes expected from the peer
    NeedRead,
    /// Outbound handshake records could not be fully written
    NeedWrite,
    /// Handshake finished; application data may flow
    Complete,
    /// Handshake failed; the connection must be dropped
    Failed,
}

/// Build a server configuration from PEM files and allow-lists.
///
/// # Errors
///
/// Returns `TlsError` when the certificate chain or private key cannot be
/// loaded, or when an allow-list excludes everything rustls supports.
pub fn build_server_config(config: &TlsConfig) -> Result<Arc<ServerConfig>, TlsError> {
    let certs = load_certificates(config)?;
    let key = load_private_key(config)?;

    let mut provider = rustls::crypto::aws_lc_rs::default_provider();
    if !config.ciphers.is_empty() {
        provider
            .cipher_suites
            .retain(|suite| config.ciphers.iter().any(|name| suite_matches(suite, name)));
        if provider.cipher_suites.is_empty() {
            return Err(TlsError::UnsupportedCipher(config.ciphers.join(", ")));
        }
        debug!(
            "Cipher allow-list kept {} suite(s)",
            provider.cipher_suites.len()
        );
    }

    let versions = protocol_versions(&config.protocols)?;

    let server_config = ServerConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(&versions)
        .map_err(|e| TlsError::ConfigBuild(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| TlsError::ConfigBuild(e.to_string()))?;

    Ok(Arc::new(server_config))
}

fn load_certificates(config: &TlsConfig) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let path = config.certificate.display().to_string();
    let file = File::open(&config.certificate)
        .map_err(|e| TlsError::certificate(&path, e.to_string()))?;
    let mut reader = BufReader::new(file);

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<_, _>>()
        .map_err(|e| TlsError::certificate(&path, e.to_string()))?;

    if certs.is_empty() {
        return Err(TlsError::certificate(&path, "no certificates found"));
    }
    Ok(certs)
}

fn load_private_key(config: &TlsConfig) -> Result<PrivateKeyDer<'static>, TlsError> {
    let path = config.private_key.display().to_string();
    let file = File::open(&config.private_key)
        .map_err(|e| TlsError::private_key(&path, e.to_string()))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TlsError::private_key(&path, e.to_string()))?
        .ok_or_else(|| TlsError::private_key(&path, "no private key found"))
}

fn protocol_versions(
    names: &[String],
) -> Result<Vec<&'static SupportedProtocolVersion>, TlsError> {
    if names.is_empty() {
        return Ok(rustls::ALL_VERSIONS.to_vec());
    }
    names
        .iter()
        .map(|name| match name.as_str() {
            "TLSv1.2" => Ok(&rustls::version::TLS12),
            "TLSv1.3" => Ok(&rustls::version::TLS13),
            other => Err(TlsError::UnsupportedProtocol(other.to_string())),
        })
        .collect()
}

fn suite_matches(suite: &rustls::SupportedCipherSuite, name: &str) -> bool {
    format!("{:?}", suite.suite()).eq_ignore_ascii_case(name)
}

/// Advance a connection's handshake using current socket readiness.
///
/// Plaintext connections report `Complete` immediately. Each call pumps
/// pending handshake records in both directions until the socket blocks or
/// the handshake resolves.
pub fn drive_handshake(conn: &mut Connection) -> HandshakeStatus {
    let Some((tls, stream)) = conn.tls_io() else {
        return HandshakeStatus::Complete;
    };
    if !tls.is_handshaking() {
        return HandshakeStatus::Complete;
    }

    loop {
        // Flush our half of the handshake first
        while tls.wants_write() {
            match tls.write_tls(stream) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return HandshakeStatus::NeedWrite;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!("Handshake write failed: {}", e);
                    return HandshakeStatus::Failed;
                }
            }
        }

        if !tls.is_handshaking() {
            return HandshakeStatus::Complete;
        }

        match tls.read_tls(stream) {
            Ok(0) => {
                // Peer went away mid-handshake
                return HandshakeStatus::Failed;
            }
            Ok(_) => {
                if let Err(e) = tls.process_new_packets() {
                    warn!("Handshake rejected: {}", e);
                    // Push the fatal alert out, best effort
                    let _ = tls.write_tls(stream);
                    return HandshakeStatus::Failed;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if tls.wants_write() {
                    continue;
                }
                return HandshakeStatus::NeedRead;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                warn!("Handshake read failed: {}", e);
                return HandshakeStatus::Failed;
            }
        }
    }
}
