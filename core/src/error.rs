//! Error types for the update client.
//!
//! # Design
//! One enum for the whole pipeline, with a variant per failure class the
//! caller may want to distinguish: input validation, transport, protocol,
//! response semantics, integrity, local I/O, apply, and reporting. Timeouts
//! get their own variant so "server unreachable" is distinguishable from
//! "server rejected". `Report` wraps the underlying error because a failed
//! status report is an overall failure even when the update itself applied.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Errors returned by the update client.
#[derive(Debug)]
pub enum UpdateError {
    /// A required parameter was missing or empty; no network I/O attempted.
    MissingParameter(&'static str),

    /// The formatted request (or its body) exceeds the internal size cap.
    RequestTooLarge { actual: usize, limit: usize },

    /// The host string is not a valid server name or resolved to no address.
    InvalidHost(String),

    /// No usable CA certificates could be loaded for peer verification.
    TrustStore(String),

    /// DNS resolution or TCP connection failure.
    Connect { host: String, source: io::Error },

    /// TLS handshake, certificate, or hostname verification failure.
    Tls { host: String, source: rustls::Error },

    /// A network operation exceeded its deadline.
    Timeout { operation: &'static str },

    /// Read/write failure on the network or the local filesystem.
    Io { operation: &'static str, source: io::Error },

    /// The response violated the minimal HTTP/1.1 framing this client speaks:
    /// malformed status line, missing header separator, missing or invalid
    /// `Content-Length`, or a body shorter than declared.
    Protocol(String),

    /// The server answered with a status other than 200. No redirects are
    /// followed and no retries are attempted.
    Status(u16),

    /// The check response carried a download URL but lacked one of the
    /// companion fields (`checksum`, `update`, `version`).
    MalformedResponse(String),

    /// The server offered a download over a transport other than HTTPS.
    InsecureUrl(String),

    /// The downloaded image's digest differs from the declared checksum.
    ChecksumMismatch { expected: String, actual: String },

    /// The destination opened for the download is not a regular file.
    NotRegularFile(PathBuf),

    /// The request payload could not be serialized to JSON.
    Serialize(serde_json::Error),

    /// The apply script could not be spawned.
    Apply { script: PathBuf, source: io::Error },

    /// Posting the status report failed after the update was processed.
    Report(Box<UpdateError>),
}

impl UpdateError {
    /// Classify an I/O failure, promoting timeout kinds to `Timeout`.
    pub(crate) fn io(operation: &'static str, source: io::Error) -> UpdateError {
        match source.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
                UpdateError::Timeout { operation }
            }
            _ => UpdateError::Io { operation, source },
        }
    }
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateError::MissingParameter(name) => {
                write!(f, "missing required parameter: {name}")
            }
            UpdateError::RequestTooLarge { actual, limit } => {
                write!(f, "request of {actual} bytes exceeds the {limit}-byte limit")
            }
            UpdateError::InvalidHost(host) => write!(f, "invalid host: {host}"),
            UpdateError::TrustStore(msg) => write!(f, "cannot load trust roots: {msg}"),
            UpdateError::Connect { host, source } => {
                write!(f, "cannot connect to {host}: {source}")
            }
            UpdateError::Tls { host, source } => {
                write!(f, "TLS failure for {host}: {source}")
            }
            UpdateError::Timeout { operation } => write!(f, "{operation} timed out"),
            UpdateError::Io { operation, source } => {
                write!(f, "{operation} failed: {source}")
            }
            UpdateError::Protocol(msg) => write!(f, "protocol error: {msg}"),
            UpdateError::Status(code) => write!(f, "server returned status {code}"),
            UpdateError::MalformedResponse(msg) => {
                write!(f, "malformed update response: {msg}")
            }
            UpdateError::InsecureUrl(url) => {
                write!(f, "refusing insecure download url: {url}")
            }
            UpdateError::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {expected}, computed {actual}")
            }
            UpdateError::NotRegularFile(path) => {
                write!(f, "{} is not a regular file", path.display())
            }
            UpdateError::Serialize(err) => write!(f, "cannot serialize request: {err}"),
            UpdateError::Apply { script, source } => {
                write!(f, "cannot run apply script {}: {source}", script.display())
            }
            UpdateError::Report(err) => write!(f, "status report failed: {err}"),
        }
    }
}

impl std::error::Error for UpdateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            UpdateError::Connect { source, .. }
            | UpdateError::Io { source, .. }
            | UpdateError::Apply { source, .. } => Some(source),
            UpdateError::Tls { source, .. } => Some(source),
            UpdateError::Serialize(source) => Some(source),
            UpdateError::Report(source) => Some(source.as_ref()),
            _ => None,
        }
    }
}
