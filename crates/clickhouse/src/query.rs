//! Maintenance queries for tests and admin.

use crate::client::ClickHouseClient;
use engine_core::{Error, Result};

/// Count all events in the table.
pub async fn count_events(client: &ClickHouseClient) -> Result<u64> {
    client
        .inner()
        .query("SELECT count() FROM events")
        .fetch_one::<u64>()
        .await
        .map_err(|e| Error::event_store(format!("query error: {}", e)))
}

/// Truncate all events (test cleanup).
pub async fn truncate_events(client: &ClickHouseClient) -> Result<()> {
    client
        .inner()
        .query("TRUNCATE TABLE IF EXISTS events")
        .execute()
        .await
        .map_err(|e| Error::event_store(format!("truncate error: {}", e)))
}
