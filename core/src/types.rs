//! Domain types threaded through one orchestration run.
//!
//! # Design
//! Request payloads (`CheckRequest`, `StatusReport`) are serde structs so
//! device properties and tokens are always correctly escaped — never spliced
//! into JSON by hand. The `UpdateDescriptor` is deliberately NOT a serde
//! type: the check response is parsed by the narrow field extractor, and
//! keeping the descriptor plain makes that boundary explicit.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::UpdateError;

/// Caller-supplied inputs, immutable for the duration of one run.
#[derive(Debug, Clone)]
pub struct DeviceContext {
    /// Device cloud endpoint, with or without an `https://` prefix.
    pub host: String,
    /// Product identifier from the cloud's token list.
    pub product: String,
    /// CloudAPI access token, sent as the `Authorization` header.
    pub token: String,
    /// Unique device identifier.
    pub device: String,
    /// Currently installed firmware version.
    pub version: String,
    /// Extra device properties folded into the check request body.
    pub properties: Vec<(String, String)>,
    /// Where to save the downloaded image.
    pub image_path: PathBuf,
    /// Optional script invoked with the image path to apply the update.
    pub apply_script: Option<PathBuf>,
    /// Delete the image when checksum verification fails. Off by default so
    /// operators can inspect the corrupt download.
    pub remove_on_mismatch: bool,
}

impl DeviceContext {
    /// Reject missing or empty required inputs before any network activity.
    pub fn validate(&self) -> Result<(), UpdateError> {
        if self.host.is_empty() {
            return Err(UpdateError::MissingParameter("host"));
        }
        if self.product.is_empty() {
            return Err(UpdateError::MissingParameter("product"));
        }
        if self.token.is_empty() {
            return Err(UpdateError::MissingParameter("token"));
        }
        if self.device.is_empty() {
            return Err(UpdateError::MissingParameter("device"));
        }
        if self.version.is_empty() {
            return Err(UpdateError::MissingParameter("version"));
        }
        if self.image_path.as_os_str().is_empty() {
            return Err(UpdateError::MissingParameter("image path"));
        }
        Ok(())
    }
}

/// Body of `POST /tok/provision/update`.
#[derive(Debug, Serialize)]
pub struct CheckRequest<'a> {
    pub id: &'a str,
    pub product: &'a str,
    pub version: &'a str,
    #[serde(flatten)]
    pub properties: BTreeMap<&'a str, &'a str>,
}

/// Body of `POST /tok/provision/updateReport`.
#[derive(Debug, Serialize)]
pub struct StatusReport<'a> {
    pub success: bool,
    pub id: &'a str,
    pub update: &'a str,
}

/// The four fields describing an available update, parsed from the check
/// response. Presence of `url` is what signals "update available"; when it
/// is present, all three companions are required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateDescriptor {
    /// Absolute HTTPS download URL.
    pub url: String,
    /// Lowercase hex SHA-256 of the image.
    pub checksum: String,
    /// Opaque update identifier, echoed back in the status report.
    pub update: String,
    /// Display version of the offered firmware.
    pub version: String,
}

/// Terminal state of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The cloud reported no update for this device. Nothing was downloaded.
    UpToDate,
    /// An update was downloaded, verified, optionally applied, and reported.
    Applied {
        version: String,
        /// Exit status of the apply script; `None` when no script was
        /// configured, `Some(-1)` when the script died on a signal.
        script_status: Option<i32>,
    },
}
