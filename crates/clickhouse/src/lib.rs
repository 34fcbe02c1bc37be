//! ClickHouse-backed event store.

pub mod client;
pub mod config;
pub mod event_store;
pub mod health;
pub mod insert;
pub mod query;
pub mod schema;

pub use client::*;
pub use config::*;
pub use event_store::{ClickHouseEventStore, EventRow};
pub use health::check_connection;
pub use insert::insert_events;
pub use query::*;
pub use schema::init_schema;
