//! Health, metrics and cross-cutting response headers.

mod common;

use axum::http::StatusCode;
use common::{get_request, TestApp};

#[tokio::test]
async fn health_check_reports_backends() {
    let app = TestApp::spawn();

    let response = app.send(get_request("/health", None)).await;
    assert_eq!(response.status, StatusCode::OK);

    let body = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "invitation-service-test");
    assert_eq!(body["checks"]["database"], "up");
    assert_eq!(body["checks"]["token_store"], "up");
}

#[tokio::test]
async fn responses_carry_security_headers_and_request_id() {
    let app = TestApp::spawn();

    let response = app
        .send(
            axum::http::Request::builder()
                .uri("/health")
                .header("x-request-id", "req-42")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.headers["x-request-id"], "req-42");
    assert_eq!(response.headers["x-content-type-options"], "nosniff");
    assert_eq!(response.headers["x-frame-options"], "DENY");
    assert_eq!(response.headers["cache-control"], "no-store");
}

#[tokio::test]
async fn metrics_endpoint_renders_text() {
    let app = TestApp::spawn();

    let response = app.send(get_request("/metrics", None)).await;
    assert_eq!(response.status, StatusCode::OK);
}
