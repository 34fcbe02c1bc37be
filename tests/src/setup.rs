//! Common test setup functions.

use analytics::{AnalyticsService, MemoryStore};
use api::{router, state::AppState};
use axum::Router;
use axum_test::TestServer;
use clickhouse_client::{init_schema, ClickHouseClient, ClickHouseConfig, ClickHouseEventStore};
use engine_core::EventRecord;
use std::sync::Arc;

use crate::containers::TestContainers;
use crate::mocks::MockEventStore;

/// Test context with a mock event store and in-memory persistence.
///
/// Uses the real Axum router with all middleware, so requests follow the
/// same code paths as production.
pub struct TestContext {
    pub events: MockEventStore,
    pub store: MemoryStore,
    pub service: Arc<AnalyticsService>,
    pub router: Router,
}

impl TestContext {
    pub fn new() -> Self {
        let events = MockEventStore::new();
        let store = MemoryStore::new();
        let service = Arc::new(AnalyticsService::new(
            Arc::new(events.clone()),
            Arc::new(store.clone()),
        ));
        let router = router(AppState::new(service.clone()));

        Self {
            events,
            store,
            service,
            router,
        }
    }

    /// Context pre-loaded with `events`.
    pub fn with_events(events: impl IntoIterator<Item = EventRecord>) -> Self {
        let ctx = Self::new();
        ctx.events.extend(events);
        ctx
    }

    pub fn server(&self) -> TestServer {
        TestServer::new(self.router.clone()).expect("Failed to create test server")
    }

    /// Set the event store to fail (for error testing).
    pub fn set_event_store_failure(&self, should_fail: bool) {
        self.events.set_should_fail(should_fail);
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// ClickHouse testcontainer with the schema applied.
pub struct ClickHouseContext {
    pub containers: TestContainers,
    pub client: ClickHouseClient,
    pub store: ClickHouseEventStore,
}

impl ClickHouseContext {
    pub async fn new() -> Self {
        let containers = TestContainers::start().await;

        let config = ClickHouseConfig {
            url: containers.clickhouse_url.clone(),
            database: containers.clickhouse_database.clone(),
            ..ClickHouseConfig::default()
        };
        let client = ClickHouseClient::new(config);

        init_schema(&client)
            .await
            .expect("Failed to initialize schema");

        Self {
            containers,
            store: ClickHouseEventStore::new(client.clone()),
            client,
        }
    }
}
