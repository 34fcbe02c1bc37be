//! Retention analytics over HTTP.

use axum::http::StatusCode;
use chrono::Duration;
use engine_core::{Cohort, CohortAnalytics, RetentionPoint};
use integration_tests::{fixtures, setup::TestContext};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

async fn ten_user_cohort(ctx: &TestContext) -> Cohort {
    ctx.events.extend(fixtures::signups(10));
    let response = ctx
        .server()
        .post("/cohorts")
        .json(&fixtures::cohort_body(
            "jan",
            "signup",
            fixtures::jan(1),
            fixtures::jan(7),
        ))
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json()
}

/// Six of ten members active in the period gives 60% retention.
#[tokio::test]
async fn test_period_retention() {
    let ctx = TestContext::new();
    let server = ctx.server();
    let cohort = ten_user_cohort(&ctx).await;
    ctx.events.extend(fixtures::pageviews(6, fixtures::jan(9)));

    let response = server
        .post(&format!("/cohorts/{}/analytics", cohort.id))
        .json(&json!({ "period_start": fixtures::jan(8), "period_end": fixtures::jan(14) }))
        .await;
    response.assert_status_ok();
    let row: CohortAnalytics = response.json();

    assert_eq!(row.active_users, 6);
    assert_eq!(row.churned_users, 4);
    assert_eq!(row.retention_rate, 60);
    assert_eq!(row.metrics.total_users, 10);
    assert_eq!(row.metrics.retention_rate, 60);

    let history: Vec<CohortAnalytics> = server
        .get(&format!("/cohorts/{}/analytics", cohort.id))
        .await
        .json();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].metrics, row.metrics);
}

#[tokio::test]
async fn test_retention_curve_windows() {
    let ctx = TestContext::new();
    let server = ctx.server();
    let cohort = ten_user_cohort(&ctx).await;
    ctx.events.extend(fixtures::pageviews(5, fixtures::jan(10)));

    let curve: Vec<RetentionPoint> = server
        .get(&format!("/cohorts/{}/retention", cohort.id))
        .add_query_param("periods", 4)
        .await
        .json();

    let periods: Vec<u32> = curve.iter().map(|p| p.period).collect();
    assert_eq!(periods, vec![0, 1, 2, 3]);
    for pair in curve.windows(2) {
        assert_eq!(pair[0].period_end, pair[1].period_start);
    }
    for point in &curve {
        assert_eq!(
            point.period_start,
            cohort.start_date + Duration::days(7 * point.period as i64)
        );
        assert_eq!(point.period_end - point.period_start, Duration::days(7));
        assert!(point.retention_rate <= 100);
    }
    assert_eq!(curve[0].retention_rate, 100);
    assert_eq!(curve[1].retention_rate, 50);
    assert_eq!(curve[3].active_users, 0);

    // A second request is served from the cached rows.
    let queries = ctx.events.query_count();
    let again: Vec<RetentionPoint> = server
        .get(&format!("/cohorts/{}/retention", cohort.id))
        .add_query_param("periods", 4)
        .await
        .json();
    assert_eq!(again, curve);
    assert_eq!(ctx.events.query_count(), queries);
}

#[tokio::test]
async fn test_empty_cohort_retention_is_zero() {
    let ctx = TestContext::new();
    let server = ctx.server();
    let cohort: Cohort = server
        .post("/cohorts")
        .json(&fixtures::cohort_body(
            "nobody",
            "signup",
            fixtures::jan(1),
            fixtures::jan(7),
        ))
        .await
        .json();
    assert_eq!(cohort.user_count, 0);

    let curve: Vec<RetentionPoint> = server
        .get(&format!("/cohorts/{}/retention", cohort.id))
        .add_query_param("periods", 2)
        .await
        .json();
    assert_eq!(curve.len(), 2);
    assert!(curve.iter().all(|p| p.retention_rate == 0));
}

#[tokio::test]
async fn test_retention_parameter_errors() {
    let ctx = TestContext::new();
    let server = ctx.server();
    let cohort = ten_user_cohort(&ctx).await;

    for periods in [0, 105] {
        let response = server
            .get(&format!("/cohorts/{}/retention", cohort.id))
            .add_query_param("periods", periods)
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>()["code"], "VALID_001");
    }

    let response = server
        .post(&format!("/cohorts/{}/analytics", cohort.id))
        .json(&json!({ "period_start": fixtures::jan(14), "period_end": fixtures::jan(8) }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let response = server
        .get(&format!("/cohorts/{}/retention", uuid::Uuid::new_v4()))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
}

/// Recalculating a cohort invalidates its cached analytics.
#[tokio::test]
async fn test_recalculation_drops_cached_analytics() {
    let ctx = TestContext::new();
    let server = ctx.server();
    let cohort = ten_user_cohort(&ctx).await;

    server
        .get(&format!("/cohorts/{}/retention", cohort.id))
        .add_query_param("periods", 2)
        .await
        .assert_status_ok();

    let recalculated: Cohort = server
        .post(&format!("/cohorts/{}/recalculate", cohort.id))
        .await
        .json();
    assert_eq!(recalculated.user_count, 10);

    let history: Vec<CohortAnalytics> = server
        .get(&format!("/cohorts/{}/analytics", cohort.id))
        .await
        .json();
    assert!(history.is_empty());
}

/// A failed period computation leaves no analytics row behind.
#[tokio::test]
async fn test_event_store_failure_writes_no_analytics() {
    let ctx = TestContext::new();
    let server = ctx.server();
    let cohort = ten_user_cohort(&ctx).await;

    ctx.set_event_store_failure(true);
    let response = server
        .post(&format!("/cohorts/{}/analytics", cohort.id))
        .json(&json!({ "period_start": fixtures::jan(8), "period_end": fixtures::jan(14) }))
        .await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.json::<Value>()["code"], "DATA_001");

    let response = server
        .get(&format!("/cohorts/{}/retention", cohort.id))
        .add_query_param("periods", 2)
        .await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);

    ctx.set_event_store_failure(false);
    let history: Vec<CohortAnalytics> = server
        .get(&format!("/cohorts/{}/analytics", cohort.id))
        .await
        .json();
    assert!(history.is_empty());
}
