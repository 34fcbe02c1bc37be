//! Mock implementations for testing.

use analytics::InMemoryEventStore;
use async_trait::async_trait;
use engine_core::{Error, EventQuery, EventRecord, EventStore, Result, UserId};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Event store that serves in-memory events and can be switched into failure.
///
/// Implements the same `EventStore` trait as the ClickHouse store, so the
/// router and services run their production code paths against it.
#[derive(Clone, Default)]
pub struct MockEventStore {
    inner: InMemoryEventStore,
    /// Simulate an unreachable store if set.
    should_fail: Arc<Mutex<bool>>,
    /// Number of queries served or rejected.
    queries: Arc<Mutex<usize>>,
}

impl MockEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: EventRecord) {
        self.inner.push(event);
    }

    pub fn extend(&self, events: impl IntoIterator<Item = EventRecord>) {
        self.inner.extend(events);
    }

    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Set failure mode for testing error handling.
    pub fn set_should_fail(&self, fail: bool) {
        *self.should_fail.lock() = fail;
    }

    pub fn query_count(&self) -> usize {
        *self.queries.lock()
    }

    fn check(&self) -> Result<()> {
        *self.queries.lock() += 1;
        if *self.should_fail.lock() {
            return Err(Error::event_store("mock event store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl EventStore for MockEventStore {
    async fn query_events(&self, query: &EventQuery) -> Result<Vec<EventRecord>> {
        self.check()?;
        self.inner.query_events(query).await
    }

    async fn distinct_users(&self, query: &EventQuery) -> Result<BTreeSet<UserId>> {
        self.check()?;
        self.inner.distinct_users(query).await
    }

    async fn count_distinct_users(&self, query: &EventQuery) -> Result<u64> {
        self.check()?;
        self.inner.count_distinct_users(query).await
    }

    async fn ping(&self) -> bool {
        !*self.should_fail.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_mock_serves_events() {
        let mock = MockEventStore::new();
        mock.push(EventRecord::new("u1", "signup", Utc::now()));

        let users = mock.distinct_users(&EventQuery::named("signup")).await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(mock.query_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_failure_mode() {
        let mock = MockEventStore::new();
        mock.set_should_fail(true);

        let err = mock.query_events(&EventQuery::all()).await.unwrap_err();
        assert_eq!(err.code(), "DATA_001");
        assert!(!mock.ping().await);
    }
}
