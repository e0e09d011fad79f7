//! Minimal over-the-air update client for constrained devices.
//!
//! # Overview
//! One linear workflow: ask the device cloud whether an update exists,
//! download it over HTTPS, verify its SHA-256 checksum, optionally invoke an
//! external apply script, and report the result. The HTTP engine is
//! deliberately minimal — hand-rolled HTTP/1.1 framing over a verified TLS
//! session, sized for exactly this workflow and nothing more.
//!
//! # Design
//! - Fully synchronous, blocking I/O; one outstanding network operation at a
//!   time; no retries anywhere.
//! - Every socket, TLS session, buffer, and file descriptor is owned by one
//!   value and released on every exit path (RAII, no manual cleanup ladders).
//! - The network seam is the `Connector` trait: production uses
//!   `TlsConnector`, tests inject their own transport.
//! - Response JSON is parsed by a narrow flat-field scanner, not a JSON
//!   library; request JSON is serialized with serde so escaping is correct.

pub mod body;
pub mod channel;
pub mod checksum;
pub mod error;
pub mod exchange;
pub mod scan;
pub mod types;
pub mod update;

pub use channel::{Channel, Connector, TlsConnector};
pub use error::UpdateError;
pub use types::{DeviceContext, UpdateDescriptor, UpdateOutcome};
pub use update::UpdateClient;
