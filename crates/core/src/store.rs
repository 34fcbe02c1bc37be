//! Contracts for the event store and the persistence engine.
//!
//! The engine only reads from the [`EventStore`]. All writes to the
//! [`Persistence`] engine go through a [`Transaction`]: writes are staged
//! and become visible together on [`Transaction::commit`]. A transaction
//! dropped without commit is rolled back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{
    Cohort, CohortAnalytics, CohortMembership, Page, Segment, SegmentMembership, UserId,
};

/// One behavioral event as read from the event store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub user_id: UserId,
    pub event_name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub properties: serde_json::Value,
}

impl EventRecord {
    pub fn new(
        user_id: impl Into<UserId>,
        event_name: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            event_name: event_name.into(),
            timestamp,
            properties: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
        self.properties = properties;
        self
    }
}

/// Inclusive time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts <= self.end
    }
}

/// Event store filter. Unset fields do not constrain the result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventQuery {
    pub event_name: Option<String>,
    pub time_range: Option<TimeRange>,
    pub user_ids: Option<Vec<UserId>>,
}

impl EventQuery {
    /// Matches every event.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn named(event_name: impl Into<String>) -> Self {
        Self {
            event_name: Some(event_name.into()),
            ..Default::default()
        }
    }

    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.time_range = Some(TimeRange::new(start, end));
        self
    }

    pub fn for_users(mut self, user_ids: Vec<UserId>) -> Self {
        self.user_ids = Some(user_ids);
        self
    }

    /// Whether an event satisfies this filter.
    pub fn matches(&self, event: &EventRecord) -> bool {
        self.event_name
            .as_deref()
            .map_or(true, |name| event.event_name == name)
            && self
                .time_range
                .map_or(true, |range| range.contains(event.timestamp))
            && self
                .user_ids
                .as_ref()
                .map_or(true, |ids| ids.iter().any(|id| *id == event.user_id))
    }
}

/// Read access to behavioral events.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Fetch matching events.
    async fn query_events(&self, query: &EventQuery) -> Result<Vec<EventRecord>>;

    /// Distinct users with at least one matching event.
    async fn distinct_users(&self, query: &EventQuery) -> Result<BTreeSet<UserId>>;

    /// Number of distinct users with at least one matching event.
    async fn count_distinct_users(&self, query: &EventQuery) -> Result<u64>;

    /// Whether the store is reachable.
    async fn ping(&self) -> bool {
        self.count_distinct_users(&EventQuery::named("__ping__"))
            .await
            .is_ok()
    }
}

/// Staged write against the persistence engine.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Insert or replace a segment definition, keeping its snapshot fields.
    PutSegment(Segment),
    /// Delete a segment and all its membership rows.
    DeleteSegment(Uuid),
    /// Replace the full membership snapshot and set `user_count`/`last_calculated`.
    ReplaceSegmentMembers {
        segment_id: Uuid,
        members: Vec<SegmentMembership>,
        calculated_at: DateTime<Utc>,
    },
    PutCohort(Cohort),
    /// Delete a cohort, its membership rows, and its analytics rows.
    DeleteCohort(Uuid),
    /// Replace the full membership snapshot and drop cached analytics.
    ReplaceCohortMembers {
        cohort_id: Uuid,
        members: Vec<CohortMembership>,
        calculated_at: DateTime<Utc>,
    },
    /// Insert or replace the row for `(cohort_id, period_start, period_end)`.
    ///
    /// `population_as_of` is the cohort's `last_calculated` when the row's
    /// membership was read. The write is rejected with a conflict if the
    /// cohort has been rebuilt since.
    UpsertAnalytics {
        row: CohortAnalytics,
        population_as_of: Option<DateTime<Utc>>,
    },
}

/// A unit of work against the persistence engine.
#[async_trait]
pub trait Transaction: Send {
    /// Stage a write. Nothing is visible until commit.
    fn stage(&mut self, op: WriteOp);

    /// Apply every staged write atomically.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard staged writes.
    async fn rollback(self: Box<Self>);
}

/// Transactional store for definitions, memberships, and analytics.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>>;

    async fn get_segment(&self, id: Uuid) -> Result<Option<Segment>>;
    async fn list_segments(&self) -> Result<Vec<Segment>>;
    async fn list_segment_members(&self, segment_id: Uuid, page: Page)
        -> Result<Vec<SegmentMembership>>;
    async fn count_segment_members(&self, segment_id: Uuid) -> Result<u64>;
    async fn list_user_segments(&self, user_id: &str) -> Result<Vec<Segment>>;

    async fn get_cohort(&self, id: Uuid) -> Result<Option<Cohort>>;
    async fn list_cohorts(&self) -> Result<Vec<Cohort>>;
    async fn list_cohort_members(&self, cohort_id: Uuid, page: Page)
        -> Result<Vec<CohortMembership>>;
    /// Every member user id of a cohort.
    async fn cohort_member_ids(&self, cohort_id: Uuid) -> Result<Vec<UserId>>;
    async fn list_user_cohorts(&self, user_id: &str) -> Result<Vec<Cohort>>;

    async fn get_analytics(
        &self,
        cohort_id: Uuid,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<Option<CohortAnalytics>>;
    /// Cached analytics rows, most recent `period_start` first.
    async fn list_analytics(&self, cohort_id: Uuid) -> Result<Vec<CohortAnalytics>>;

    /// Whether the store is reachable.
    async fn ping(&self) -> bool {
        self.list_segments().await.is_ok()
    }
}
