pub mod cohorts;
pub mod evaluator;
pub mod memory;
pub mod query;
pub mod retention;
pub mod segments;
pub mod service;

pub use cohorts::CohortBuilder;
pub use evaluator::{check_criteria, check_property_rule, RuleEvaluator};
pub use memory::{InMemoryEventStore, MemoryStore, MemoryTransaction};
pub use query::QueryFacade;
pub use retention::RetentionCalculator;
pub use segments::SegmentManager;
pub use service::AnalyticsService;
