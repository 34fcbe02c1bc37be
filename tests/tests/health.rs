//! Tests for health check endpoints.
//!
//! The health registry is process-global, so probes that flip component
//! state live in a single test.

use axum::http::StatusCode;
use integration_tests::setup::TestContext;
use serde_json::Value;

#[tokio::test]
async fn test_health_follows_event_store() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let response = server.get("/health").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["event_store_connected"], true);
    assert_eq!(body["persistence_connected"], true);
    assert!(body["metrics"]["segment_recalculations"].is_u64());
    server.get("/health/ready").await.assert_status_ok();

    ctx.set_event_store_failure(true);

    let response = server.get("/health").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["event_store_connected"], false);
    let components = body["components"].as_array().cloned().unwrap_or_default();
    let event_store = components
        .iter()
        .find(|c| c["name"] == "event_store")
        .expect("event_store component");
    assert_eq!(event_store["healthy"], false);

    server
        .get("/health/ready")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);

    // Liveness ignores data sources.
    server.get("/health/live").await.assert_status_ok();

    ctx.set_event_store_failure(false);
    server.get("/health/ready").await.assert_status_ok();
}
