//! Segmentation Engine
//!
//! Behavioral segmentation and cohort analytics over an event store:
//! - Rule-based segments with atomically swapped membership snapshots
//! - Time-windowed cohorts keyed by first qualifying event
//! - Weekly retention curves with per-period caching

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::signal;
use tracing::{error, info, warn};

use analytics::{AnalyticsService, InMemoryEventStore, MemoryStore};
use api::{router, AppState};
use clickhouse_client::{ClickHouseClient, ClickHouseConfig, ClickHouseEventStore};
use engine_core::{EventStore, Persistence};
use telemetry::{health, init_tracing_from_env};

/// Which event store backs recalculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum EventStoreKind {
    Clickhouse,
    Memory,
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Config {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,

    #[serde(default = "default_event_store")]
    event_store: EventStoreKind,

    #[serde(default)]
    clickhouse: ClickHouseConfig,

    /// JSON log lines; `LOG_JSON` still wins when set.
    #[serde(default)]
    log_json: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_event_store() -> EventStoreKind {
    EventStoreKind::Clickhouse
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            event_store: default_event_store(),
            clickhouse: ClickHouseConfig::default(),
            log_json: false,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = load_config()?;

    init_tracing_from_env(config.log_json);

    info!("Starting Segmentation Engine v{}", env!("CARGO_PKG_VERSION"));

    let events = build_event_store(&config).await;
    let persistence: Arc<dyn Persistence> = Arc::new(MemoryStore::new());

    check_health(events.as_ref(), persistence.as_ref()).await;

    let service = Arc::new(AnalyticsService::new(events, persistence));
    let app = router(AppState::new(service));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid server address")?;

    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}

/// Load configuration from files and environment.
fn load_config() -> Result<Config> {
    let config = config::Config::builder()
        .add_source(config::Config::try_from(&Config::default())?)
        .add_source(
            config::File::with_name("config/default")
                .required(false)
                .format(config::FileFormat::Toml),
        )
        .add_source(
            config::Environment::default()
                .separator("__")
                .prefix("SEGMENTATION")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    let mut config: Config = config
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    // Flat overrides; the `__` form cannot address underscored field names.
    if let Ok(url) = std::env::var("SEGMENTATION_CLICKHOUSE_URL") {
        config.clickhouse.url = url;
    }
    if let Ok(database) = std::env::var("SEGMENTATION_CLICKHOUSE_DATABASE") {
        config.clickhouse.database = database;
    }
    if let Ok(username) = std::env::var("SEGMENTATION_CLICKHOUSE_USERNAME") {
        config.clickhouse.username = Some(username);
    }
    if let Ok(password) = std::env::var("SEGMENTATION_CLICKHOUSE_PASSWORD") {
        config.clickhouse.password = Some(password);
    }

    Ok(config)
}

async fn build_event_store(config: &Config) -> Arc<dyn EventStore> {
    match config.event_store {
        EventStoreKind::Clickhouse => {
            let client = ClickHouseClient::new(config.clickhouse.clone());
            if config.clickhouse.init_schema {
                if let Err(e) = clickhouse_client::init_schema(&client).await {
                    // The table may already exist under a user without DDL rights.
                    error!(error = %e, "Failed to initialize ClickHouse schema");
                }
            }
            Arc::new(ClickHouseEventStore::new(client))
        }
        EventStoreKind::Memory => {
            warn!("Using the in-memory event store; events are not persisted");
            Arc::new(InMemoryEventStore::new())
        }
    }
}

/// Check component health on startup.
async fn check_health(events: &dyn EventStore, persistence: &dyn Persistence) {
    if events.ping().await {
        health().event_store.set_healthy();
        info!("Event store connection: healthy");
    } else {
        health().event_store.set_unhealthy("Connection failed");
        error!("Event store connection: unhealthy");
    }

    if persistence.ping().await {
        health().persistence.set_healthy();
        info!("Persistence: healthy");
    } else {
        health().persistence.set_unhealthy("Unavailable");
        error!("Persistence: unhealthy");
    }
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }
}
