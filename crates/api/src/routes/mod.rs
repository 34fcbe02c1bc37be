//! API routes.

pub mod cohorts;
pub mod health;
pub mod segments;
pub mod users;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::middleware::track_in_flight;
use crate::state::AppState;

/// Creates the API router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/segments",
            get(segments::list_segments).post(segments::create_segment),
        )
        .route(
            "/segments/:id",
            get(segments::get_segment)
                .patch(segments::update_segment)
                .delete(segments::delete_segment),
        )
        .route("/segments/:id/recalculate", post(segments::recalculate))
        .route("/segments/:id/users", get(segments::list_users))
        .route(
            "/cohorts",
            get(cohorts::list_cohorts).post(cohorts::create_cohort),
        )
        .route(
            "/cohorts/:id",
            get(cohorts::get_cohort)
                .patch(cohorts::update_cohort)
                .delete(cohorts::delete_cohort),
        )
        .route("/cohorts/:id/recalculate", post(cohorts::recalculate))
        .route("/cohorts/:id/users", get(cohorts::list_users))
        .route(
            "/cohorts/:id/analytics",
            get(cohorts::analytics_history).post(cohorts::calculate_analytics),
        )
        .route("/cohorts/:id/retention", get(cohorts::retention_curve))
        .route("/users/:user_id/segments", get(users::user_segments))
        .route("/users/:user_id/cohorts", get(users::user_cohorts))
        .route("/health", get(health::health_handler))
        .route("/health/ready", get(health::ready_handler))
        .route("/health/live", get(health::live_handler))
        // Layers are applied innermost-first (the last `.layer` is outermost),
        // preserving the order cors -> trace -> compression -> in-flight.
        .layer(middleware::from_fn(track_in_flight))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
