//! Mock device cloud for the update client's integration tests.
//!
//! Serves the three provisioning endpoints the client speaks to. The shared
//! `CloudState` is fully inspectable: tests configure the offer (as raw JSON,
//! so malformed offers can be served on purpose), the image bytes, and an
//! optionally required authorization token, then assert on the recorded
//! check and report requests afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A well-formed update offer, as the real cloud would return it.
#[derive(Clone, Debug, Serialize)]
pub struct UpdateOffer {
    pub url: String,
    pub checksum: String,
    pub update: String,
    pub version: String,
}

impl UpdateOffer {
    /// Offer `image` at `url`, with a freshly generated update id and the
    /// image's real checksum.
    pub fn new(url: impl Into<String>, image: &[u8], version: impl Into<String>) -> UpdateOffer {
        UpdateOffer {
            url: url.into(),
            checksum: sha256_hex(image),
            update: Uuid::new_v4().to_string(),
            version: version.into(),
        }
    }
}

/// Lowercase hex SHA-256, for building offer checksums.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

/// Check request body as the client sends it; extra device properties are
/// captured by the flattened map.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CheckRequest {
    pub id: String,
    pub product: String,
    pub version: String,
    #[serde(flatten)]
    pub properties: HashMap<String, String>,
}

/// Status report body as the client sends it.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Report {
    pub success: bool,
    pub id: String,
    pub update: String,
}

#[derive(Debug, Default)]
pub struct CloudState {
    /// Offer served to the next check; `None` means "no update available".
    pub offer: Option<Value>,
    /// Bytes served by the download route.
    pub image: Vec<u8>,
    /// When set, every request must carry this `Authorization` value.
    pub token: Option<String>,
    /// Every check request received, in order.
    pub checks: Vec<CheckRequest>,
    /// Every report received, in order.
    pub reports: Vec<Report>,
}

pub type Cloud = Arc<RwLock<CloudState>>;

pub fn app(cloud: Cloud) -> Router {
    Router::new()
        .route("/tok/provision/update", post(check_update))
        .route("/tok/provision/updateReport", post(report_update))
        .route("/images/update.bin", get(download_image))
        .with_state(cloud)
}

pub async fn run(listener: TcpListener, cloud: Cloud) -> Result<(), std::io::Error> {
    axum::serve(listener, app(cloud)).await
}

async fn check_update(
    State(cloud): State<Cloud>,
    headers: HeaderMap,
    Json(request): Json<CheckRequest>,
) -> Result<Json<Value>, StatusCode> {
    let mut state = cloud.write().await;
    authorize(&state, &headers)?;
    state.checks.push(request);
    match &state.offer {
        Some(offer) => Ok(Json(offer.clone())),
        None => Ok(Json(json!({}))),
    }
}

async fn download_image(State(cloud): State<Cloud>) -> Vec<u8> {
    cloud.read().await.image.clone()
}

async fn report_update(
    State(cloud): State<Cloud>,
    headers: HeaderMap,
    Json(report): Json<Report>,
) -> Result<Json<Value>, StatusCode> {
    let mut state = cloud.write().await;
    authorize(&state, &headers)?;
    state.reports.push(report);
    Ok(Json(json!({})))
}

fn authorize(state: &CloudState, headers: &HeaderMap) -> Result<(), StatusCode> {
    let Some(expected) = &state.token else {
        return Ok(());
    };
    let given = headers.get("authorization").and_then(|value| value.to_str().ok());
    if given == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}
