//! ClickHouse table schemas.
//!
//! - LowCardinality for event names
//! - DateTime64(3) for millisecond precision
//! - Properties kept as a JSON string

/// SQL for creating the events table.
///
/// Ordered by `(event_name, timestamp, user_id)` so the two hot filters,
/// name and window, prune granules.
pub const CREATE_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    user_id String,
    event_name LowCardinality(String),
    timestamp DateTime64(3, 'UTC'),
    properties String DEFAULT '{}',
    inserted_at DateTime DEFAULT now()
)
ENGINE = MergeTree()
PARTITION BY toYYYYMM(timestamp)
ORDER BY (event_name, timestamp, user_id)
SETTINGS index_granularity = 8192
"#;

/// `CREATE DATABASE` for the configured database name.
pub fn create_database(database: &str) -> String {
    format!("CREATE DATABASE IF NOT EXISTS `{}`", database.replace('`', ""))
}

/// Table DDL, run against the configured database.
pub fn all_tables() -> Vec<&'static str> {
    vec![CREATE_EVENTS_TABLE]
}

use crate::client::ClickHouseClient;
use engine_core::{Error, Result};
use tracing::info;

/// Creates the database and all tables if they don't exist.
pub async fn init_schema(client: &ClickHouseClient) -> Result<()> {
    let database = &client.config().database;
    client
        .server()
        .query(&create_database(database))
        .execute()
        .await
        .map_err(|e| Error::event_store(format!("schema init error: {}", e)))?;

    for sql in all_tables() {
        client
            .inner()
            .query(sql)
            .execute()
            .await
            .map_err(|e| Error::event_store(format!("schema init error: {}", e)))?;
    }

    info!(database = %database, "ClickHouse schema initialized");
    Ok(())
}
