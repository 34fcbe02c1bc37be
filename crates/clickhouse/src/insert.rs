//! Batch insert into the `events` table.
//!
//! The engine only reads events; this exists for seeding and test fixtures.

use crate::client::ClickHouseClient;
use crate::event_store::EventRow;
use engine_core::{Error, EventRecord, Result};
use tracing::debug;

/// Inserts `events` in one batch and returns how many were written.
pub async fn insert_events(client: &ClickHouseClient, events: &[EventRecord]) -> Result<usize> {
    if events.is_empty() {
        return Ok(0);
    }

    let start = std::time::Instant::now();

    let mut insert = client
        .inner()
        .insert("events")
        .map_err(|e| Error::event_store(format!("insert error: {}", e)))?;

    for event in events {
        insert
            .write(&EventRow::from(event))
            .await
            .map_err(|e| Error::event_store(format!("write error: {}", e)))?;
    }

    insert
        .end()
        .await
        .map_err(|e| Error::event_store(format!("end error: {}", e)))?;

    debug!(
        count = events.len(),
        latency_ms = %start.elapsed().as_millis(),
        "Inserted events"
    );

    Ok(events.len())
}
