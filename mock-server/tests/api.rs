use std::sync::Arc;

use axum::http::{self, Request, StatusCode};
use http_body_util::BodyExt;
use mock_server::{app, Cloud, CloudState, UpdateOffer};
use tokio::sync::RwLock;
use tower::ServiceExt;

fn cloud() -> Cloud {
    Arc::new(RwLock::new(CloudState::default()))
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

fn check_request(body: &str, token: Option<&str>) -> Request<String> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/tok/provision/update")
        .header(http::header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(http::header::AUTHORIZATION, token);
    }
    builder.body(body.to_string()).unwrap()
}

// --- check ---

#[tokio::test]
async fn check_without_offer_returns_empty_object() {
    let cloud = cloud();
    let resp = app(cloud.clone())
        .oneshot(check_request(r#"{"id":"d1","product":"p1","version":"1.0"}"#, None))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert!(body.as_object().unwrap().is_empty());

    let state = cloud.read().await;
    assert_eq!(state.checks.len(), 1);
    assert_eq!(state.checks[0].id, "d1");
}

#[tokio::test]
async fn check_with_offer_returns_descriptor() {
    let cloud = cloud();
    let offer = UpdateOffer::new("https://cdn.example.com/fw.bin", b"image", "2.0.0");
    cloud.write().await.offer = Some(serde_json::to_value(&offer).unwrap());

    let resp = app(cloud)
        .oneshot(check_request(
            r#"{"id":"d1","product":"p1","version":"1.0","model":"pro"}"#,
            None,
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["url"], "https://cdn.example.com/fw.bin");
    assert_eq!(body["version"], "2.0.0");
    assert_eq!(body["checksum"], offer.checksum);
    assert_eq!(body["update"], offer.update);
}

#[tokio::test]
async fn check_records_extra_properties() {
    let cloud = cloud();
    app(cloud.clone())
        .oneshot(check_request(
            r#"{"id":"d1","product":"p1","version":"1.0","region":"eu"}"#,
            None,
        ))
        .await
        .unwrap();

    let state = cloud.read().await;
    assert_eq!(
        state.checks[0].properties.get("region").map(String::as_str),
        Some("eu")
    );
}

#[tokio::test]
async fn check_with_wrong_token_is_unauthorized() {
    let cloud = cloud();
    cloud.write().await.token = Some("secret".to_string());

    let resp = app(cloud.clone())
        .oneshot(check_request(r#"{"id":"d1","product":"p1","version":"1.0"}"#, Some("wrong")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(cloud.read().await.checks.is_empty());
}

#[tokio::test]
async fn check_with_malformed_body_is_unprocessable() {
    let resp = app(cloud())
        .oneshot(check_request(r#"{"product":"p1"}"#, None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

// --- download ---

#[tokio::test]
async fn download_serves_configured_image() {
    let cloud = cloud();
    cloud.write().await.image = b"firmware-image".to_vec();

    let resp = app(cloud)
        .oneshot(
            Request::builder()
                .uri("/images/update.bin")
                .body(String::new())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_bytes(resp).await.as_ref(), b"firmware-image");
}

// --- report ---

#[tokio::test]
async fn report_is_recorded() {
    let cloud = cloud();
    let resp = app(cloud.clone())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/tok/provision/updateReport")
                .header(http::header::CONTENT_TYPE, "application/json")
                .body(r#"{"success":true,"id":"d1","update":"u-7"}"#.to_string())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let state = cloud.read().await;
    assert_eq!(state.reports.len(), 1);
    assert!(state.reports[0].success);
    assert_eq!(state.reports[0].update, "u-7");
}
