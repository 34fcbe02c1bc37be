//! [`EventStore`] backed by the ClickHouse `events` table.

use async_trait::async_trait;
use chrono::DateTime;
use clickhouse::query::Query;
use clickhouse::Row;
use engine_core::{Error, EventQuery, EventRecord, EventStore, Result, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use tracing::debug;

use crate::client::ClickHouseClient;
use crate::health::check_connection;

/// Row layout of the `events` table. `timestamp` is epoch milliseconds.
#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct EventRow {
    pub user_id: String,
    pub event_name: String,
    pub timestamp: i64,
    pub properties: String,
}

impl From<&EventRecord> for EventRow {
    fn from(event: &EventRecord) -> Self {
        Self {
            user_id: event.user_id.clone(),
            event_name: event.event_name.clone(),
            timestamp: event.timestamp.timestamp_millis(),
            properties: event.properties.to_string(),
        }
    }
}

impl TryFrom<EventRow> for EventRecord {
    type Error = Error;

    fn try_from(row: EventRow) -> Result<Self> {
        let timestamp = DateTime::from_timestamp_millis(row.timestamp).ok_or_else(|| {
            Error::event_store(format!("timestamp {} out of range", row.timestamp))
        })?;
        let properties = if row.properties.is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            serde_json::from_str(&row.properties).map_err(|e| {
                Error::event_store(format!(
                    "malformed properties for user {}: {}",
                    row.user_id, e
                ))
            })?
        };
        Ok(EventRecord {
            user_id: row.user_id,
            event_name: row.event_name,
            timestamp,
            properties,
        })
    }
}

/// Read-only event source over ClickHouse.
#[derive(Clone)]
pub struct ClickHouseEventStore {
    client: ClickHouseClient,
}

impl ClickHouseEventStore {
    pub fn new(client: ClickHouseClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ClickHouseClient {
        &self.client
    }

    /// Builds `{select} FROM events [WHERE ...] {tail}` with binds in clause order.
    fn build(&self, select: &str, query: &EventQuery, tail: &str) -> Query {
        let sql = format!("{} FROM events{}{}", select, where_clause(query), tail);

        let mut q = self.client.inner().query(&sql);
        if let Some(name) = &query.event_name {
            q = q.bind(name.as_str());
        }
        if let Some(range) = &query.time_range {
            q = q
                .bind(range.start.timestamp_millis())
                .bind(range.end.timestamp_millis());
        }
        if let Some(ids) = &query.user_ids {
            q = q.bind(ids.as_slice());
        }
        q
    }

    async fn run<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = clickhouse::error::Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.client.timeout(), fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(Error::event_store(format!("{} failed: {}", op, e))),
            Err(_) => Err(Error::event_store(format!(
                "{} timed out after {}s",
                op,
                self.client.config().timeout_secs
            ))),
        }
    }
}

/// `WHERE` clause for `query`; empty when nothing is filtered.
fn where_clause(query: &EventQuery) -> String {
    let mut clauses = Vec::new();
    if query.event_name.is_some() {
        clauses.push("event_name = ?");
    }
    if query.time_range.is_some() {
        clauses.push("timestamp >= fromUnixTimestamp64Milli(toInt64(?), 'UTC')");
        clauses.push("timestamp <= fromUnixTimestamp64Milli(toInt64(?), 'UTC')");
    }
    if query.user_ids.is_some() {
        clauses.push("has(?, user_id)");
    }

    if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    }
}

/// An explicit empty user list can never match.
fn excludes_everyone(query: &EventQuery) -> bool {
    query.user_ids.as_ref().is_some_and(|ids| ids.is_empty())
}

#[async_trait]
impl EventStore for ClickHouseEventStore {
    async fn query_events(&self, query: &EventQuery) -> Result<Vec<EventRecord>> {
        if excludes_everyone(query) {
            return Ok(Vec::new());
        }

        let rows: Vec<EventRow> = self
            .run(
                "query_events",
                self.build(
                    "SELECT user_id, event_name, toUnixTimestamp64Milli(timestamp), properties",
                    query,
                    " ORDER BY timestamp, user_id",
                )
                .fetch_all::<EventRow>(),
            )
            .await?;

        debug!(rows = rows.len(), "Fetched events from ClickHouse");
        rows.into_iter().map(EventRecord::try_from).collect()
    }

    async fn distinct_users(&self, query: &EventQuery) -> Result<BTreeSet<UserId>> {
        if excludes_everyone(query) {
            return Ok(BTreeSet::new());
        }

        let users: Vec<String> = self
            .run(
                "distinct_users",
                self.build("SELECT DISTINCT user_id", query, "")
                    .fetch_all::<String>(),
            )
            .await?;
        Ok(users.into_iter().collect())
    }

    async fn count_distinct_users(&self, query: &EventQuery) -> Result<u64> {
        if excludes_everyone(query) {
            return Ok(0);
        }

        self.run(
            "count_distinct_users",
            self.build("SELECT uniqExact(user_id)", query, "")
                .fetch_one::<u64>(),
        )
        .await
    }

    async fn ping(&self) -> bool {
        check_connection(&self.client).await
    }
}
