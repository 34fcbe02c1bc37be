//! Cohort lifecycle over HTTP.

use axum::http::StatusCode;
use engine_core::{Cohort, CohortMembership, Persistence};
use integration_tests::{fixtures, setup::TestContext};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

async fn create(ctx: &TestContext, body: Value) -> Cohort {
    let response = ctx.server().post("/cohorts").json(&body).await;
    response.assert_status(StatusCode::CREATED);
    response.json()
}

/// A member joins at their earliest qualifying event; out-of-window users are excluded.
#[tokio::test]
async fn test_earliest_join_within_window() {
    let ctx = TestContext::with_events(vec![
        fixtures::event("A", "signup", fixtures::jan(5)),
        fixtures::event("A", "signup", fixtures::jan(3)),
        fixtures::event("B", "signup", fixtures::jan(9)),
    ]);
    let server = ctx.server();

    let cohort = create(
        &ctx,
        fixtures::cohort_body("first week", "signup", fixtures::jan(1), fixtures::jan(7)),
    )
    .await;
    assert_eq!(cohort.user_count, 1);

    let members: Vec<CohortMembership> = server
        .get(&format!("/cohorts/{}/users", cohort.id))
        .await
        .json();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].user_id, "A");
    assert_eq!(members[0].joined_at, fixtures::jan(3));

    let body: Value = server
        .get(&format!("/cohorts/{}/users", cohort.id))
        .await
        .json();
    assert_eq!(body[0]["joined_at"], "2025-01-03T00:00:00Z");

    let cohorts: Vec<Cohort> = server.get("/users/B/cohorts").await.json();
    assert!(cohorts.is_empty());
}

#[tokio::test]
async fn test_min_occurrences_and_property_filter() {
    let ctx = TestContext::with_events(vec![
        fixtures::event("A", "purchase", fixtures::jan(2))
            .with_properties(json!({ "plan": "pro" })),
        fixtures::event("A", "purchase", fixtures::jan(4))
            .with_properties(json!({ "plan": "pro" })),
        fixtures::event("B", "purchase", fixtures::jan(2))
            .with_properties(json!({ "plan": "free" })),
        fixtures::event("B", "purchase", fixtures::jan(3))
            .with_properties(json!({ "plan": "free" })),
    ]);

    let cohort = create(
        &ctx,
        json!({
            "name": "repeat pro buyers",
            "start_date": fixtures::jan(1),
            "end_date": fixtures::jan(7),
            "criteria": {
                "event_name": "purchase",
                "min_occurrences": 2,
                "property_filter": { "field": "plan", "operator": "equals", "value": "pro" }
            }
        }),
    )
    .await;

    let members = ctx.service.query.list_cohort_users(cohort.id, Default::default()).await.unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].user_id, "A");
    assert_eq!(members[0].joined_at, fixtures::jan(2));
}

#[tokio::test]
async fn test_window_validation_and_update() {
    let ctx = TestContext::with_events(vec![
        fixtures::event("A", "signup", fixtures::jan(3)),
        fixtures::event("B", "signup", fixtures::jan(10)),
    ]);
    let server = ctx.server();

    let response = server
        .post("/cohorts")
        .json(&fixtures::cohort_body(
            "backwards",
            "signup",
            fixtures::jan(7),
            fixtures::jan(1),
        ))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["code"], "VALID_001");

    let cohort = create(
        &ctx,
        fixtures::cohort_body("first week", "signup", fixtures::jan(1), fixtures::jan(7)),
    )
    .await;

    let updated: Cohort = server
        .patch(&format!("/cohorts/{}", cohort.id))
        .json(&json!({ "end_date": fixtures::jan(14) }))
        .await
        .json();
    assert_eq!(updated.user_count, 2);

    let response = server
        .patch(&format!("/cohorts/{}", cohort.id))
        .json(&json!({ "start_date": fixtures::jan(20) }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let stored: Cohort = server.get(&format!("/cohorts/{}", cohort.id)).await.json();
    assert_eq!(stored.start_date, fixtures::jan(1));
    assert_eq!(stored.user_count, 2);
}

/// Deleting a cohort drops memberships and cached analytics, and breaks
/// segments that reference it.
#[tokio::test]
async fn test_delete_cohort_cascades() {
    let ctx = TestContext::with_events(fixtures::signups(3));
    let server = ctx.server();
    let cohort = create(
        &ctx,
        fixtures::cohort_body("jan", "signup", fixtures::jan(1), fixtures::jan(7)),
    )
    .await;

    server
        .post(&format!("/cohorts/{}/analytics", cohort.id))
        .json(&json!({ "period_start": fixtures::jan(8), "period_end": fixtures::jan(14) }))
        .await
        .assert_status_ok();

    let response = server
        .post("/segments")
        .json(&json!({ "name": "in jan", "criteria": { "type": "cohort", "cohort_id": cohort.id } }))
        .await;
    response.assert_status(StatusCode::CREATED);
    let segment: Value = response.json();
    assert_eq!(segment["user_count"], 3);

    server
        .delete(&format!("/cohorts/{}", cohort.id))
        .await
        .assert_status(StatusCode::NO_CONTENT);

    assert!(ctx.store.cohort_member_ids(cohort.id).await.unwrap().is_empty());
    assert!(ctx.store.list_analytics(cohort.id).await.unwrap().is_empty());

    let response = server
        .post(&format!("/segments/{}/recalculate", segment["id"].as_str().unwrap()))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
}

/// Event store outages fail cohort rebuilds with DATA_001 and keep the
/// previous membership, count and cached analytics.
#[tokio::test]
async fn test_event_store_failure_preserves_cohort_snapshot() {
    let ctx = TestContext::with_events(fixtures::signups(3));
    let server = ctx.server();
    let cohort = create(
        &ctx,
        fixtures::cohort_body("jan", "signup", fixtures::jan(1), fixtures::jan(7)),
    )
    .await;
    server
        .post(&format!("/cohorts/{}/analytics", cohort.id))
        .json(&json!({ "period_start": fixtures::jan(8), "period_end": fixtures::jan(14) }))
        .await
        .assert_status_ok();

    ctx.events.push(fixtures::event("late", "signup", fixtures::jan(12)));
    ctx.set_event_store_failure(true);

    let response = server
        .post(&format!("/cohorts/{}/recalculate", cohort.id))
        .await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.json::<Value>()["code"], "DATA_001");

    let response = server
        .patch(&format!("/cohorts/{}", cohort.id))
        .json(&json!({ "end_date": fixtures::jan(14) }))
        .await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.json::<Value>()["code"], "DATA_001");

    let response = server
        .patch(&format!("/cohorts/{}", cohort.id))
        .json(&json!({ "criteria": { "event_name": "login" } }))
        .await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);

    let stored: Cohort = server.get(&format!("/cohorts/{}", cohort.id)).await.json();
    assert_eq!(stored.end_date, fixtures::jan(7));
    assert_eq!(stored.criteria, cohort.criteria);
    assert_eq!(stored.user_count, 3);
    assert_eq!(stored.last_calculated, cohort.last_calculated);
    assert_eq!(ctx.store.cohort_member_ids(cohort.id).await.unwrap().len(), 3);
    assert_eq!(ctx.store.list_analytics(cohort.id).await.unwrap().len(), 1);

    ctx.set_event_store_failure(false);
    let rebuilt: Cohort = server
        .patch(&format!("/cohorts/{}", cohort.id))
        .json(&json!({ "end_date": fixtures::jan(14) }))
        .await
        .json();
    assert_eq!(rebuilt.user_count, 4);
}
