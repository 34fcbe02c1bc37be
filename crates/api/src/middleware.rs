//! Request middleware.

use axum::{extract::Request, middleware::Next, response::Response};
use telemetry::metrics;

/// Tracks requests currently being served.
pub async fn track_in_flight(request: Request, next: Next) -> Response {
    metrics().requests_in_flight.inc();
    let response = next.run(request).await;
    metrics().requests_in_flight.dec();
    response
}
