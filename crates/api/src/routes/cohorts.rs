//! Cohort and retention endpoints.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use engine_core::{
    Cohort, CohortAnalytics, CohortMembership, CohortPatch, NewCohort, Page, RetentionPoint,
    DEFAULT_CURVE_PERIODS,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::extractors::{ApiJson, ApiPath, ApiQuery};
use crate::response::ApiError;
use crate::state::AppState;

/// Body of `POST /cohorts/:id/analytics`.
#[derive(Debug, Deserialize)]
pub struct AnalyticsRequest {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CurveParams {
    pub periods: Option<u32>,
}

/// GET /cohorts
pub async fn list_cohorts(State(state): State<AppState>) -> Result<Json<Vec<Cohort>>, ApiError> {
    Ok(Json(state.service.query.list_cohorts().await?))
}

/// POST /cohorts
pub async fn create_cohort(
    State(state): State<AppState>,
    ApiJson(definition): ApiJson<NewCohort>,
) -> Result<(StatusCode, Json<Cohort>), ApiError> {
    let cohort = state.service.cohorts.create_cohort(definition).await?;
    Ok((StatusCode::CREATED, Json(cohort)))
}

/// GET /cohorts/:id
pub async fn get_cohort(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<Cohort>, ApiError> {
    Ok(Json(state.service.query.get_cohort(id).await?))
}

/// PATCH /cohorts/:id
pub async fn update_cohort(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(patch): ApiJson<CohortPatch>,
) -> Result<Json<Cohort>, ApiError> {
    Ok(Json(state.service.cohorts.update_cohort(id, patch).await?))
}

/// DELETE /cohorts/:id - also drops memberships and cached analytics.
pub async fn delete_cohort(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.service.cohorts.delete_cohort(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /cohorts/:id/recalculate
pub async fn recalculate(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<Cohort>, ApiError> {
    Ok(Json(state.service.cohorts.recalculate(id).await?))
}

/// GET /cohorts/:id/users?limit&offset
pub async fn list_users(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
    ApiQuery(page): ApiQuery<Page>,
) -> Result<Json<Vec<CohortMembership>>, ApiError> {
    Ok(Json(state.service.query.list_cohort_users(id, page).await?))
}

/// POST /cohorts/:id/analytics - compute one period and cache it.
pub async fn calculate_analytics(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<AnalyticsRequest>,
) -> Result<Json<CohortAnalytics>, ApiError> {
    let row = state
        .service
        .retention
        .calculate(id, request.period_start, request.period_end)
        .await?;
    Ok(Json(row))
}

/// GET /cohorts/:id/analytics
pub async fn analytics_history(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<Vec<CohortAnalytics>>, ApiError> {
    Ok(Json(state.service.retention.get_history(id).await?))
}

/// GET /cohorts/:id/retention?periods
pub async fn retention_curve(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
    ApiQuery(params): ApiQuery<CurveParams>,
) -> Result<Json<Vec<RetentionPoint>>, ApiError> {
    let periods = params.periods.unwrap_or(DEFAULT_CURVE_PERIODS);
    Ok(Json(
        state
            .service
            .retention
            .get_retention_curve(id, periods)
            .await?,
    ))
}
