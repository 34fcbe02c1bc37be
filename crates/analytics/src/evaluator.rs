//! Rule evaluator: turns segment criteria into a set of user ids.

use engine_core::{
    Error, EventQuery, EventStore, LogicalOperator, Persistence, Result, RuleOperator,
    SegmentCriteria, SegmentRule, UserId,
};
use serde_json::Value;
use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use telemetry::metrics;
use tracing::debug;

type UserSet = BTreeSet<UserId>;

type EvalFuture<'a> = Pin<Box<dyn Future<Output = Result<UserSet>> + Send + 'a>>;

/// Evaluates [`SegmentCriteria`] against the event store.
///
/// Read-only: never writes to either collaborator.
pub struct RuleEvaluator {
    events: Arc<dyn EventStore>,
    persistence: Arc<dyn Persistence>,
}

impl RuleEvaluator {
    pub fn new(events: Arc<dyn EventStore>, persistence: Arc<dyn Persistence>) -> Self {
        Self {
            events,
            persistence,
        }
    }

    /// Returns the users matching `criteria`.
    ///
    /// The whole tree is checked for executability before any query runs, so
    /// an unsupported rule fails with a classification error and no I/O.
    pub async fn evaluate(&self, criteria: &SegmentCriteria) -> Result<UserSet> {
        check_criteria(criteria)?;
        let start = Instant::now();
        let users = self.eval(criteria).await?;
        debug!(
            criteria = criteria.kind(),
            users = users.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Criteria evaluated"
        );
        Ok(users)
    }

    fn eval<'a>(&'a self, criteria: &'a SegmentCriteria) -> EvalFuture<'a> {
        Box::pin(async move {
            match criteria {
                SegmentCriteria::Event { rules } => self.eval_event_rules(rules).await,
                SegmentCriteria::Property { rules } => self.eval_property_rules(rules).await,
                SegmentCriteria::Cohort { cohort_id } => {
                    if self.persistence.get_cohort(*cohort_id).await?.is_none() {
                        return Err(Error::cohort_not_found(*cohort_id));
                    }
                    let ids = self.persistence.cohort_member_ids(*cohort_id).await?;
                    Ok(ids.into_iter().collect())
                }
                SegmentCriteria::Composite { operator, criteria } => {
                    let mut acc: Option<UserSet> = None;
                    for child in criteria {
                        let users = self.eval(child).await?;
                        acc = Some(match (acc, operator) {
                            (None, _) => users,
                            (Some(prev), LogicalOperator::And) => {
                                prev.intersection(&users).cloned().collect()
                            }
                            (Some(mut prev), LogicalOperator::Or) => {
                                prev.extend(users);
                                prev
                            }
                        });
                    }
                    Ok(acc.unwrap_or_default())
                }
            }
        })
    }

    async fn eval_event_rules(&self, rules: &[SegmentRule]) -> Result<UserSet> {
        let mut acc: Option<UserSet> = None;
        for rule in rules {
            let users = match &rule.operator {
                RuleOperator::Equals => self.users_with_events(&event_names(rule)?).await?,
                RuleOperator::In => self.users_with_events(&event_names(rule)?).await?,
                RuleOperator::NotEquals | RuleOperator::NotIn => {
                    let excluded = self.users_with_events(&event_names(rule)?).await?;
                    let everyone = self.distinct_users(&EventQuery::all()).await?;
                    everyone.difference(&excluded).cloned().collect()
                }
                other => return Err(unsupported_for("event", other)),
            };
            acc = Some(intersect(acc, users));
        }
        Ok(acc.unwrap_or_default())
    }

    async fn eval_property_rules(&self, rules: &[SegmentRule]) -> Result<UserSet> {
        if rules.is_empty() {
            return Ok(UserSet::new());
        }

        let events = self.timed(self.events.query_events(&EventQuery::all())).await?;

        let mut acc: Option<UserSet> = None;
        for rule in rules {
            let mut users = UserSet::new();
            for event in &events {
                if !users.contains(&event.user_id) && rule.matches_properties(&event.properties)? {
                    users.insert(event.user_id.clone());
                }
            }
            acc = Some(intersect(acc, users));
        }
        Ok(acc.unwrap_or_default())
    }

    async fn users_with_events(&self, names: &[String]) -> Result<UserSet> {
        let mut users = UserSet::new();
        for name in names {
            users.extend(self.distinct_users(&EventQuery::named(name.clone())).await?);
        }
        Ok(users)
    }

    async fn distinct_users(&self, query: &EventQuery) -> Result<UserSet> {
        self.timed(self.events.distinct_users(query)).await
    }

    async fn timed<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let start = Instant::now();
        metrics().event_store_queries.inc();
        let result = fut.await;
        metrics()
            .event_store_latency_ms
            .observe(start.elapsed().as_millis() as u64);
        if result.is_err() {
            metrics().event_store_errors.inc();
        }
        result
    }
}

fn intersect(acc: Option<UserSet>, users: UserSet) -> UserSet {
    match acc {
        None => users,
        Some(prev) => prev.intersection(&users).cloned().collect(),
    }
}

/// Event names referenced by an event rule's value.
fn event_names(rule: &SegmentRule) -> Result<Vec<String>> {
    match (&rule.operator, &rule.value) {
        (RuleOperator::Equals | RuleOperator::NotEquals, Value::String(name)) => {
            Ok(vec![name.clone()])
        }
        (RuleOperator::In | RuleOperator::NotIn, Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    Error::classification(format!(
                        "event rule '{}' expects event names, got {}",
                        rule.operator, item
                    ))
                })
            })
            .collect(),
        (op, value) => Err(Error::classification(format!(
            "event rule '{}' cannot use value {}",
            op, value
        ))),
    }
}

fn unsupported_for(kind: &str, op: &RuleOperator) -> Error {
    Error::classification(format!("unsupported operator '{}' for {} rules", op, kind))
}

/// Verifies every rule in the tree can be executed.
pub fn check_criteria(criteria: &SegmentCriteria) -> Result<()> {
    match criteria {
        SegmentCriteria::Event { rules } => {
            for rule in rules {
                match rule.operator {
                    RuleOperator::Equals
                    | RuleOperator::NotEquals
                    | RuleOperator::In
                    | RuleOperator::NotIn => {
                        event_names(rule)?;
                    }
                    ref other => return Err(unsupported_for("event", other)),
                }
            }
            Ok(())
        }
        SegmentCriteria::Property { rules } => rules.iter().try_for_each(check_property_rule),
        SegmentCriteria::Cohort { .. } => Ok(()),
        SegmentCriteria::Composite { criteria, .. } => criteria.iter().try_for_each(check_criteria),
    }
}

/// Verifies a property rule can be executed.
pub fn check_property_rule(rule: &SegmentRule) -> Result<()> {
    if rule.field.is_empty() {
        return Err(Error::classification("property rule requires a field"));
    }
    match (&rule.operator, &rule.value) {
        (RuleOperator::Unsupported(_), _) => Err(unsupported_for("property", &rule.operator)),
        (RuleOperator::In | RuleOperator::NotIn, value) if !value.is_array() => {
            Err(Error::classification(format!(
                "operator '{}' requires an array value",
                rule.operator
            )))
        }
        _ => Ok(()),
    }
}
