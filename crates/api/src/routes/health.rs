//! Health check endpoints.

use axum::{extract::State, http::StatusCode, Json};
use telemetry::{health, metrics};

use crate::response::HealthResponse;
use crate::state::AppState;

/// Pings both data sources and records the result in the health registry.
async fn refresh(state: &AppState) {
    if state.service.event_store().ping().await {
        health().event_store.set_healthy();
    } else {
        health().event_store.set_unhealthy("event store unreachable");
    }

    if state.service.persistence().ping().await {
        health().persistence.set_healthy();
    } else {
        health().persistence.set_unhealthy("persistence unreachable");
    }
}

/// GET /health - Full health check.
pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    refresh(&state).await;
    let report = health().report();

    let code = if report.status.is_serving() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = HealthResponse {
        status: format!("{:?}", report.status).to_lowercase(),
        event_store_connected: health().event_store.is_healthy(),
        persistence_connected: health().persistence.is_healthy(),
        components: report.components,
        metrics: metrics().snapshot(),
    };
    (code, Json(body))
}

/// GET /health/ready - Readiness probe (recalculation can run).
pub async fn ready_handler(State(state): State<AppState>) -> StatusCode {
    refresh(&state).await;
    if health().is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /health/live - Liveness probe (service is running).
pub async fn live_handler() -> StatusCode {
    if health().is_alive() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
