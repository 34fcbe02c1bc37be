use engine_core::{EventStore, Persistence};
use std::sync::Arc;

use crate::cohorts::CohortBuilder;
use crate::evaluator::RuleEvaluator;
use crate::query::QueryFacade;
use crate::retention::RetentionCalculator;
use crate::segments::SegmentManager;

/// All analytics components wired to one event store and one persistence layer.
pub struct AnalyticsService {
    pub evaluator: Arc<RuleEvaluator>,
    pub segments: SegmentManager,
    pub cohorts: CohortBuilder,
    pub retention: RetentionCalculator,
    pub query: QueryFacade,
    events: Arc<dyn EventStore>,
    persistence: Arc<dyn Persistence>,
}

impl AnalyticsService {
    pub fn new(events: Arc<dyn EventStore>, persistence: Arc<dyn Persistence>) -> Self {
        let evaluator = Arc::new(RuleEvaluator::new(events.clone(), persistence.clone()));
        Self {
            segments: SegmentManager::new(persistence.clone(), evaluator.clone()),
            cohorts: CohortBuilder::new(events.clone(), persistence.clone()),
            retention: RetentionCalculator::new(events.clone(), persistence.clone()),
            query: QueryFacade::new(persistence.clone()),
            evaluator,
            events,
            persistence,
        }
    }

    pub fn event_store(&self) -> &Arc<dyn EventStore> {
        &self.events
    }

    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.persistence
    }
}
