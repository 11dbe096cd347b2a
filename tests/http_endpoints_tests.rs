//! HTTP surface integration tests: `/health`, `/metrics`, `/ws` existence,
//! unknown routes, and CORS configuration, driven through a real router via
//! `axum-test` rather than calling handlers directly.

use std::sync::Arc;

use frameyard_server::config::Config;
use frameyard_server::server::AppState;
use frameyard_server::websocket::create_router;

async fn test_state() -> (Arc<AppState>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.persistence.data_dir = dir.path().to_string_lossy().to_string();
    let state = AppState::new(config).await.unwrap();
    (state, dir)
}

#[tokio::test]
async fn health_endpoint_returns_json_snapshot() {
    let (state, _dir) = test_state().await;
    let app = create_router("*").with_state(state);
    let server = axum_test::TestServer::new(app).expect("test server should start");

    let response = server.get("/health").await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    assert!(body.get("uptimeMs").is_some());
    assert!(body.get("roomsIndexed").is_some());
}

#[tokio::test]
async fn healthz_alias_matches_health() {
    let (state, _dir) = test_state().await;
    let app = create_router("*").with_state(state);
    let server = axum_test::TestServer::new(app).expect("test server should start");

    let response = server.get("/healthz").await;
    response.assert_status_ok();
}

#[tokio::test]
async fn health_endpoint_honors_html_format_query() {
    let (state, _dir) = test_state().await;
    let app = create_router("*").with_state(state);
    let server = axum_test::TestServer::new(app).expect("test server should start");

    let response = server.get("/health").add_query_param("format", "html").await;
    response.assert_status_ok();
    let body = response.text();
    assert!(body.contains("<html>"));
}

#[tokio::test]
async fn metrics_endpoint_returns_prometheus_text() {
    let (state, _dir) = test_state().await;
    let app = create_router("*").with_state(state);
    let server = axum_test::TestServer::new(app).expect("test server should start");

    let response = server.get("/metrics").await;
    response.assert_status_ok();
    let body = response.text();
    assert!(body.contains("# HELP"), "should contain HELP comment lines");
    assert!(body.contains("# TYPE"), "should contain TYPE annotations");
}

#[tokio::test]
async fn websocket_route_exists() {
    let (state, _dir) = test_state().await;
    let app = create_router("*").with_state(state);
    let server = axum_test::TestServer::new(app).expect("test server should start");

    // A plain GET without an upgrade handshake will not succeed, but the
    // route must be registered, so the failure must not be a 404.
    let response = server.get("/ws").await;
    assert_ne!(response.status_code(), axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let (state, _dir) = test_state().await;
    let app = create_router("*").with_state(state);
    let server = axum_test::TestServer::new(app).expect("test server should start");

    let response = server.get("/nonexistent").await;
    response.assert_status(axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn permissive_cors_with_wildcard_serves_health() {
    let (state, _dir) = test_state().await;
    let app = create_router("*").with_state(state);
    let server = axum_test::TestServer::new(app).expect("test server should start");

    let response = server.get("/health").await;
    response.assert_status_ok();
}

#[tokio::test]
async fn specific_cors_origins_still_serve_health() {
    let (state, _dir) = test_state().await;
    let app = create_router("http://localhost:3000,http://example.com").with_state(state);
    let server = axum_test::TestServer::new(app).expect("test server should start");

    let response = server.get("/health").await;
    response.assert_status_ok();
}
