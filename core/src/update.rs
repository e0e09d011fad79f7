//! Update orchestrator: the one linear check → download → verify → apply →
//! report workflow.
//!
//! # Design
//! `UpdateClient` is stateless apart from its connector; every run threads an
//! immutable `DeviceContext` through the steps and fails fast on the first
//! error. Request bodies are built by standalone `build_*` functions and the
//! check response is parsed by a standalone `parse_*` function, so the
//! request/response logic is testable without any I/O. Each of the three
//! HTTP calls is attempted exactly once — retry policy deliberately does not
//! exist at any layer.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::Command;

use tracing::{debug, info, warn};

use crate::body;
use crate::channel::{Connector, HTTPS_PORT};
use crate::checksum;
use crate::error::UpdateError;
use crate::exchange::{self, Method, Request, Response};
use crate::scan;
use crate::types::{CheckRequest, DeviceContext, StatusReport, UpdateDescriptor, UpdateOutcome};

const CHECK_PATH: &str = "tok/provision/update";
const REPORT_PATH: &str = "tok/provision/updateReport";

/// Cap on the serialized check body (device properties included).
const MAX_CHECK_BODY_BYTES: usize = 4096;

/// The public entry point: sequences one full update attempt.
pub struct UpdateClient<C> {
    connector: C,
}

impl<C: Connector> UpdateClient<C> {
    pub fn new(connector: C) -> UpdateClient<C> {
        UpdateClient { connector }
    }

    /// Run one update cycle. Returns `UpToDate` when the cloud offers
    /// nothing, `Applied` when an update was downloaded, verified,
    /// optionally applied, and reported.
    pub fn run(&self, ctx: &DeviceContext) -> Result<UpdateOutcome, UpdateError> {
        ctx.validate()?;
        let check_body = build_check_body(ctx)?;

        info!(host = %ctx.host, "checking for update");
        let response = self.post(&ctx.host, CHECK_PATH, &ctx.token, &check_body)?;
        let check_response = body::read_to_string(response)?;
        debug!(response = %check_response, "check response");

        let Some(descriptor) = parse_update_descriptor(&check_response)? else {
            info!("no update available");
            return Ok(UpdateOutcome::UpToDate);
        };
        info!(version = %descriptor.version, "update available");

        self.download(&descriptor.url, &ctx.image_path)?;

        info!(path = %ctx.image_path.display(), "verifying update checksum");
        let actual = checksum::sha256_hex(&ctx.image_path)?;
        if actual != descriptor.checksum {
            if ctx.remove_on_mismatch {
                if let Err(err) = fs::remove_file(&ctx.image_path) {
                    warn!(path = %ctx.image_path.display(), %err, "cannot remove corrupt image");
                }
            }
            return Err(UpdateError::ChecksumMismatch {
                expected: descriptor.checksum,
                actual,
            });
        }

        let script_status = match &ctx.apply_script {
            Some(script) => Some(apply_update(script, &ctx.image_path)?),
            None => None,
        };
        let success = script_status.map_or(true, |code| code == 0);

        self.report(ctx, &descriptor.update, success)
            .map_err(|err| UpdateError::Report(Box::new(err)))?;

        Ok(UpdateOutcome::Applied { version: descriptor.version, script_status })
    }

    fn post(
        &self,
        endpoint: &str,
        path: &str,
        token: &str,
        body: &str,
    ) -> Result<Response, UpdateError> {
        let authority = endpoint_authority(endpoint);
        let (host, port) = split_authority(authority)?;
        let channel = self.connector.connect(host, port)?;
        let headers = [("Content-Type", "application/json"), ("Authorization", token)];
        exchange::exchange(
            channel,
            &Request {
                method: Method::Post,
                host: authority,
                path,
                headers: &headers,
                body: Some(body.as_bytes()),
            },
        )
    }

    fn download(&self, url: &str, path: &Path) -> Result<u64, UpdateError> {
        let (host, port, url_path) = parse_https_url(url)?;
        info!(url, path = %path.display(), "downloading update");
        let channel = self.connector.connect(host, port)?;
        let host_header = if port == HTTPS_PORT {
            host.to_string()
        } else {
            format!("{host}:{port}")
        };
        let headers = [("Accept", "*/*")];
        let response = exchange::exchange(
            channel,
            &Request {
                method: Method::Get,
                host: &host_header,
                path: url_path,
                headers: &headers,
                body: None,
            },
        )?;
        body::download_to_file(response, path)
    }

    fn report(
        &self,
        ctx: &DeviceContext,
        update_id: &str,
        success: bool,
    ) -> Result<(), UpdateError> {
        let body = build_report_body(success, &ctx.device, update_id)?;
        info!(success, update = update_id, "posting update report");
        self.post(&ctx.host, REPORT_PATH, &ctx.token, &body)?;
        Ok(())
    }
}

/// Serialize the check request body, enforcing the size cap before any
/// connection is opened.
pub fn build_check_body(ctx: &DeviceContext) -> Result<String, UpdateError> {
    let properties: BTreeMap<&str, &str> =
        ctx.properties.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    let request = CheckRequest {
        id: &ctx.device,
        product: &ctx.product,
        version: &ctx.version,
        properties,
    };
    let body = serde_json::to_string(&request).map_err(UpdateError::Serialize)?;
    if body.len() > MAX_CHECK_BODY_BYTES {
        return Err(UpdateError::RequestTooLarge {
            actual: body.len(),
            limit: MAX_CHECK_BODY_BYTES,
        });
    }
    Ok(body)
}

/// Interpret the check response.
///
/// No `url` field means "no update available" and is a success, not an
/// error. A `url` with any of `checksum`/`update`/`version` missing is a
/// malformed response and is never treated as "no update".
pub fn parse_update_descriptor(body: &str) -> Result<Option<UpdateDescriptor>, UpdateError> {
    let Some(url) = scan::extract(body, "url") else {
        return Ok(None);
    };
    let checksum = scan::extract(body, "checksum").ok_or_else(|| {
        UpdateError::MalformedResponse("update offer is missing \"checksum\"".to_string())
    })?;
    let update = scan::extract(body, "update").ok_or_else(|| {
        UpdateError::MalformedResponse("update offer is missing \"update\"".to_string())
    })?;
    let version = scan::extract(body, "version").ok_or_else(|| {
        UpdateError::MalformedResponse("update offer is missing \"version\"".to_string())
    })?;
    Ok(Some(UpdateDescriptor { url, checksum, update, version }))
}

/// Serialize the status report body.
pub fn build_report_body(
    success: bool,
    device: &str,
    update_id: &str,
) -> Result<String, UpdateError> {
    serde_json::to_string(&StatusReport { success, id: device, update: update_id })
        .map_err(UpdateError::Serialize)
}

/// Spawn the apply script directly (no shell) with the image path as its
/// only argument and wait for it. A non-zero exit is returned, not raised:
/// it feeds the report's `success` field but does not fail the run.
fn apply_update(script: &Path, image: &Path) -> Result<i32, UpdateError> {
    info!(script = %script.display(), image = %image.display(), "applying update");
    let status = Command::new(script)
        .arg(image)
        .status()
        .map_err(|err| UpdateError::Apply { script: script.to_path_buf(), source: err })?;
    let code = status.code().unwrap_or(-1);
    if code == 0 {
        info!("update applied");
    } else {
        warn!(code, "apply script exited non-zero");
    }
    Ok(code)
}

/// Split an `https://` URL into host, port (default 443), and the path
/// without its leading slash. Anything not `https://`-prefixed is refused:
/// updates are never fetched over an insecure transport, whatever the
/// server says.
fn parse_https_url(url: &str) -> Result<(&str, u16, &str), UpdateError> {
    let rest = url
        .strip_prefix("https://")
        .ok_or_else(|| UpdateError::InsecureUrl(url.to_string()))?;
    let (authority, path) = match rest.find('/') {
        Some(at) => (&rest[..at], &rest[at + 1..]),
        None => (rest, ""),
    };
    let (host, port) = split_authority(authority)?;
    Ok((host, port, path))
}

/// The check/report endpoint may be given with or without the scheme.
fn endpoint_authority(endpoint: &str) -> &str {
    endpoint.strip_prefix("https://").unwrap_or(endpoint).trim_end_matches('/')
}

fn split_authority(authority: &str) -> Result<(&str, u16), UpdateError> {
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| UpdateError::InvalidHost(authority.to_string()))?;
            (host, port)
        }
        None => (authority, HTTPS_PORT),
    };
    if host.is_empty() {
        return Err(UpdateError::InvalidHost(authority.to_string()));
    }
    Ok((host, port))
}
