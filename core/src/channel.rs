//! Secure channel: TCP to port 443 wrapped in a verified TLS session.
//!
//! # Design
//! The `Connector` trait is the crate's I/O seam — the orchestrator only ever
//! sees `Box<dyn Channel>`, so tests can substitute a plain-TCP connector
//! while production always goes through `TlsConnector`. `TlsConnector`
//! drives the handshake to completion inside `connect`, so DNS, TCP, TLS,
//! and certificate failures all surface from the open step and a failed open
//! never leaks a socket.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};
use tracing::debug;

use crate::error::UpdateError;

/// Default port for every cloud connection.
pub const HTTPS_PORT: u16 = 443;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// A bidirectional byte stream carrying one HTTP exchange.
pub trait Channel: Read + Write {}

impl<T: Read + Write> Channel for T {}

/// Opens channels to the cloud. Implemented by `TlsConnector` in production
/// and by plain-TCP stand-ins in tests.
pub trait Connector {
    fn connect(&self, host: &str, port: u16) -> Result<Box<dyn Channel>, UpdateError>;
}

/// TLS connector with certificate and hostname verification.
///
/// Minimum protocol version is TLS 1.2. Trust roots come from the system
/// store (`new`) or from a caller-supplied PEM bundle (`with_ca_bundle`).
/// Connect and read/write deadlines are always set; expiry surfaces as
/// `UpdateError::Timeout`.
#[derive(Clone)]
pub struct TlsConnector {
    config: Arc<ClientConfig>,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl TlsConnector {
    /// Build a connector trusting the system CA store.
    pub fn new() -> Result<TlsConnector, UpdateError> {
        let loaded = rustls_native_certs::load_native_certs();
        let mut roots = RootCertStore::empty();
        let (added, _ignored) = roots.add_parsable_certificates(loaded.certs);
        if added == 0 {
            return Err(UpdateError::TrustStore(
                "no usable CA certificates in the system store".to_string(),
            ));
        }
        Ok(TlsConnector::with_roots(roots))
    }

    /// Build a connector trusting only the certificates in a PEM bundle.
    pub fn with_ca_bundle(path: &Path) -> Result<TlsConnector, UpdateError> {
        let file = File::open(path).map_err(|err| {
            UpdateError::TrustStore(format!("cannot open {}: {err}", path.display()))
        })?;
        let mut reader = BufReader::new(file);
        let mut roots = RootCertStore::empty();
        for cert in rustls_pemfile::certs(&mut reader) {
            let cert = cert.map_err(|err| {
                UpdateError::TrustStore(format!("bad certificate in {}: {err}", path.display()))
            })?;
            roots.add(cert).map_err(|err| UpdateError::TrustStore(err.to_string()))?;
        }
        if roots.is_empty() {
            return Err(UpdateError::TrustStore(format!(
                "{} contains no certificates",
                path.display()
            )));
        }
        Ok(TlsConnector::with_roots(roots))
    }

    /// Override the default deadlines (10 s connect, 30 s read/write).
    pub fn timeouts(mut self, connect: Duration, io: Duration) -> TlsConnector {
        self.connect_timeout = connect;
        self.io_timeout = io;
        self
    }

    fn with_roots(roots: RootCertStore) -> TlsConnector {
        let config = ClientConfig::builder_with_protocol_versions(&[
            &rustls::version::TLS13,
            &rustls::version::TLS12,
        ])
        .with_root_certificates(roots)
        .with_no_client_auth();
        TlsConnector {
            config: Arc::new(config),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    fn open_tcp(&self, host: &str, port: u16) -> Result<TcpStream, UpdateError> {
        let addrs = (host, port).to_socket_addrs().map_err(|err| UpdateError::Connect {
            host: host.to_string(),
            source: err,
        })?;
        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(err) => last_err = Some(err),
            }
        }
        match last_err {
            Some(err) if err.kind() == io::ErrorKind::TimedOut => {
                Err(UpdateError::Timeout { operation: "connect" })
            }
            Some(err) => Err(UpdateError::Connect { host: host.to_string(), source: err }),
            // `to_socket_addrs` succeeded but produced no addresses.
            None => Err(UpdateError::InvalidHost(host.to_string())),
        }
    }
}

impl Connector for TlsConnector {
    fn connect(&self, host: &str, port: u16) -> Result<Box<dyn Channel>, UpdateError> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| UpdateError::InvalidHost(host.to_string()))?;

        let tcp = self.open_tcp(host, port)?;
        tcp.set_read_timeout(Some(self.io_timeout))
            .map_err(|err| UpdateError::io("set socket timeout", err))?;
        tcp.set_write_timeout(Some(self.io_timeout))
            .map_err(|err| UpdateError::io("set socket timeout", err))?;

        let mut conn = ClientConnection::new(self.config.clone(), server_name)
            .map_err(|err| UpdateError::Tls { host: host.to_string(), source: err })?;

        // Complete the handshake here so certificate and hostname problems
        // are reported by the open step, not the first request.
        let mut tcp = tcp;
        while conn.is_handshaking() {
            conn.complete_io(&mut tcp).map_err(|err| handshake_error(host, err))?;
        }
        debug!(host, port, "TLS session established");

        Ok(Box::new(StreamOwned::new(conn, tcp)))
    }
}

/// rustls reports handshake failures as `io::Error`s wrapping its own error
/// type; unwrap that layering so certificate problems show up as `Tls`.
fn handshake_error(host: &str, err: io::Error) -> UpdateError {
    if matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) {
        return UpdateError::Timeout { operation: "TLS handshake" };
    }
    let kind = err.kind();
    match err.into_inner().map(|inner| inner.downcast::<rustls::Error>()) {
        Some(Ok(tls)) => UpdateError::Tls { host: host.to_string(), source: *tls },
        Some(Err(other)) => {
            UpdateError::Io { operation: "TLS handshake", source: io::Error::new(kind, other) }
        }
        None => UpdateError::Io { operation: "TLS handshake", source: io::Error::from(kind) },
    }
}
