//! Application state shared across handlers.

use analytics::AnalyticsService;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AnalyticsService>,
}

impl AppState {
    pub fn new(service: Arc<AnalyticsService>) -> Self {
        Self { service }
    }
}
