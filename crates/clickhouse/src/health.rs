//! ClickHouse health checks.

use crate::client::ClickHouseClient;
use tracing::{debug, error};

/// `SELECT 1` against the configured server, bounded by the query timeout.
pub async fn check_connection(client: &ClickHouseClient) -> bool {
    let probe = client.inner().query("SELECT 1").fetch_one::<u8>();
    match tokio::time::timeout(client.timeout(), probe).await {
        Ok(Ok(_)) => {
            debug!("ClickHouse connection healthy");
            true
        }
        Ok(Err(e)) => {
            error!(error = %e, "ClickHouse health check failed");
            false
        }
        Err(_) => {
            error!(
                timeout_secs = client.config().timeout_secs,
                "ClickHouse health check timed out"
            );
            false
        }
    }
}
