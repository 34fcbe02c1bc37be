//! Segment endpoints.

use axum::{extract::State, http::StatusCode, Json};
use engine_core::{NewSegment, Page, Segment, SegmentMembership, SegmentPatch};
use uuid::Uuid;

use crate::extractors::{ApiJson, ApiPath, ApiQuery};
use crate::response::ApiError;
use crate::state::AppState;

/// GET /segments
pub async fn list_segments(State(state): State<AppState>) -> Result<Json<Vec<Segment>>, ApiError> {
    Ok(Json(state.service.query.list_segments().await?))
}

/// POST /segments - create and compute the first snapshot.
pub async fn create_segment(
    State(state): State<AppState>,
    ApiJson(definition): ApiJson<NewSegment>,
) -> Result<(StatusCode, Json<Segment>), ApiError> {
    let segment = state.service.segments.create_segment(definition).await?;
    Ok((StatusCode::CREATED, Json(segment)))
}

/// GET /segments/:id
pub async fn get_segment(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<Segment>, ApiError> {
    Ok(Json(state.service.query.get_segment(id).await?))
}

/// PATCH /segments/:id
pub async fn update_segment(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(patch): ApiJson<SegmentPatch>,
) -> Result<Json<Segment>, ApiError> {
    Ok(Json(state.service.segments.update_segment(id, patch).await?))
}

/// DELETE /segments/:id
pub async fn delete_segment(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.service.segments.delete_segment(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /segments/:id/recalculate
pub async fn recalculate(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<Segment>, ApiError> {
    Ok(Json(state.service.segments.recalculate(id).await?))
}

/// GET /segments/:id/users?limit&offset
pub async fn list_users(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
    ApiQuery(page): ApiQuery<Page>,
) -> Result<Json<Vec<SegmentMembership>>, ApiError> {
    Ok(Json(state.service.query.list_segment_users(id, page).await?))
}
