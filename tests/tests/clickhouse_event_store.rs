//! ClickHouse-backed event store against a real server.
//!
//! Requires Docker (or `SEGMENTATION_TEST_CLICKHOUSE_URL`); run with
//! `cargo test -- --ignored`.

use analytics::{AnalyticsService, MemoryStore};
use clickhouse_client::{count_events, insert_events, truncate_events};
use engine_core::{CohortCriteria, EventQuery, EventStore, NewCohort, NewSegment, SegmentCriteria};
use integration_tests::{fixtures, setup::ClickHouseContext};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_clickhouse_queries() {
    let ctx = ClickHouseContext::new().await;
    truncate_events(&ctx.client).await.ok();

    let mut events = fixtures::signup_events();
    events.push(
        fixtures::event("B", "purchase", fixtures::jan(3)).with_properties(json!({ "amount": 40 })),
    );
    assert_eq!(insert_events(&ctx.client, &events).await.unwrap(), 4);
    assert_eq!(count_events(&ctx.client).await.unwrap(), 4);
    assert!(ctx.store.ping().await);

    let signups = ctx
        .store
        .distinct_users(&EventQuery::named("signup"))
        .await
        .unwrap();
    assert_eq!(signups.into_iter().collect::<Vec<_>>(), vec!["A", "B"]);

    let windowed = ctx
        .store
        .query_events(&EventQuery::all().between(fixtures::jan(2), fixtures::jan(3)))
        .await
        .unwrap();
    assert_eq!(windowed.len(), 3);
    assert_eq!(windowed[2].properties["amount"], 40);

    let active = ctx
        .store
        .count_distinct_users(
            &EventQuery::all()
                .between(fixtures::jan(1), fixtures::jan(31))
                .for_users(vec!["A".into(), "Z".into()]),
        )
        .await
        .unwrap();
    assert_eq!(active, 1);

    let none = ctx
        .store
        .count_distinct_users(&EventQuery::all().for_users(vec![]))
        .await
        .unwrap();
    assert_eq!(none, 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_service_over_clickhouse() {
    let ctx = ClickHouseContext::new().await;
    truncate_events(&ctx.client).await.ok();
    insert_events(&ctx.client, &fixtures::signup_events())
        .await
        .unwrap();

    let service = AnalyticsService::new(Arc::new(ctx.store.clone()), Arc::new(MemoryStore::new()));

    let segment = service
        .segments
        .create_segment(NewSegment::new("signed up", SegmentCriteria::event("signup")))
        .await
        .unwrap();
    assert_eq!(segment.user_count, 2);

    let cohort = service
        .cohorts
        .create_cohort(NewCohort::new(
            "jan",
            fixtures::jan(1),
            fixtures::jan(7),
            CohortCriteria::new("signup"),
        ))
        .await
        .unwrap();
    let members = service
        .query
        .list_cohort_users(cohort.id, Default::default())
        .await
        .unwrap();
    assert_eq!(members[0].joined_at, fixtures::jan(1));
}
