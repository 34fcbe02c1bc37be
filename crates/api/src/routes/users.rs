//! Per-user membership lookups.

use axum::{extract::State, Json};
use engine_core::{Cohort, Segment};

use crate::extractors::ApiPath;
use crate::response::ApiError;
use crate::state::AppState;

/// GET /users/:user_id/segments
pub async fn user_segments(
    State(state): State<AppState>,
    ApiPath(user_id): ApiPath<String>,
) -> Result<Json<Vec<Segment>>, ApiError> {
    Ok(Json(state.service.query.list_user_segments(&user_id).await?))
}

/// GET /users/:user_id/cohorts
pub async fn user_cohorts(
    State(state): State<AppState>,
    ApiPath(user_id): ApiPath<String>,
) -> Result<Json<Vec<Cohort>>, ApiError> {
    Ok(Json(state.service.query.list_user_cohorts(&user_id).await?))
}
