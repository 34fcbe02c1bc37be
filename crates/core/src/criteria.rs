//! Criteria types for segment and cohort definitions.
//!
//! Criteria are closed sum types. Operators the engine does not know still
//! deserialize (as [`RuleOperator::Unsupported`]) so that evaluation can
//! reject them with a classification error naming the operator.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use uuid::Uuid;
use validator::Validate;

use crate::error::{Error, Result};

/// Comparison operator of a [`SegmentRule`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RuleOperator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
    In,
    NotIn,
    /// Any operator name outside the rule language.
    Unsupported(String),
}

impl RuleOperator {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::Contains => "contains",
            Self::GreaterThan => "greater_than",
            Self::LessThan => "less_than",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::Unsupported(name) => name,
        }
    }
}

impl From<String> for RuleOperator {
    fn from(name: String) -> Self {
        match name.as_str() {
            "equals" => Self::Equals,
            "not_equals" => Self::NotEquals,
            "contains" => Self::Contains,
            "greater_than" => Self::GreaterThan,
            "less_than" => Self::LessThan,
            "in" => Self::In,
            "not_in" => Self::NotIn,
            _ => Self::Unsupported(name),
        }
    }
}

impl From<RuleOperator> for String {
    fn from(op: RuleOperator) -> Self {
        match op {
            RuleOperator::Unsupported(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for RuleOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single `field operator value` rule.
///
/// For event rules `field` is ignored and `value` names an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRule {
    #[serde(default)]
    pub field: String,
    pub operator: RuleOperator,
    pub value: Value,
}

impl SegmentRule {
    pub fn new(field: impl Into<String>, operator: RuleOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// Rule matching users who performed `event_name`.
    pub fn event(event_name: impl Into<String>) -> Self {
        Self::new("_", RuleOperator::Equals, Value::String(event_name.into()))
    }

    /// Evaluates the rule against an event's properties.
    ///
    /// A missing property never matches, except under `not_equals`/`not_in`.
    pub fn matches_properties(&self, properties: &Value) -> Result<bool> {
        let actual = properties.get(&self.field).unwrap_or(&Value::Null);
        compare_values(actual, &self.operator, &self.value)
    }
}

/// Boolean combinator of a composite criteria node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOperator {
    #[serde(alias = "and")]
    And,
    #[serde(alias = "or")]
    Or,
}

/// Segment membership criteria.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SegmentCriteria {
    /// Users who performed the named events (no time bound).
    Event { rules: Vec<SegmentRule> },
    /// Users with at least one event whose properties satisfy every rule.
    Property { rules: Vec<SegmentRule> },
    /// Members of an existing cohort.
    Cohort { cohort_id: Uuid },
    /// AND intersects, OR unions the child results.
    Composite {
        operator: LogicalOperator,
        #[serde(default)]
        criteria: Vec<SegmentCriteria>,
    },
}

impl SegmentCriteria {
    /// Shorthand for a single-event criteria.
    pub fn event(event_name: impl Into<String>) -> Self {
        Self::Event {
            rules: vec![SegmentRule::event(event_name)],
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Event { .. } => "event",
            Self::Property { .. } => "property",
            Self::Cohort { .. } => "cohort",
            Self::Composite { .. } => "composite",
        }
    }
}

/// Cohort qualifying-event criteria.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct CohortCriteria {
    /// Event that defines cohort entry.
    #[validate(length(min = 1, max = 200))]
    pub event_name: String,
    /// Optional filter on the qualifying event's properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_filter: Option<SegmentRule>,
    /// Minimum number of in-window occurrences (values <= 1 mean "at least once").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, max = 100000))]
    pub min_occurrences: Option<u32>,
}

impl CohortCriteria {
    pub fn new(event_name: impl Into<String>) -> Self {
        Self {
            event_name: event_name.into(),
            property_filter: None,
            min_occurrences: None,
        }
    }

    pub fn with_property_filter(mut self, filter: SegmentRule) -> Self {
        self.property_filter = Some(filter);
        self
    }

    pub fn with_min_occurrences(mut self, n: u32) -> Self {
        self.min_occurrences = Some(n);
        self
    }

    /// Effective occurrence threshold.
    pub fn threshold(&self) -> u64 {
        self.min_occurrences.map(u64::from).unwrap_or(1).max(1)
    }
}

/// Compares a property value against a rule value.
pub fn compare_values(actual: &Value, operator: &RuleOperator, expected: &Value) -> Result<bool> {
    let matched = match operator {
        RuleOperator::Equals => actual == expected,
        RuleOperator::NotEquals => actual != expected,
        RuleOperator::Contains => match (actual, expected) {
            (Value::String(a), Value::String(e)) => a.contains(e.as_str()),
            (Value::Array(items), e) => items.contains(e),
            _ => false,
        },
        RuleOperator::GreaterThan => numeric_cmp(actual, expected) == Some(Ordering::Greater),
        RuleOperator::LessThan => numeric_cmp(actual, expected) == Some(Ordering::Less),
        RuleOperator::In => expect_list(expected, operator)?.contains(actual),
        RuleOperator::NotIn => !expect_list(expected, operator)?.contains(actual),
        RuleOperator::Unsupported(name) => {
            return Err(Error::classification(format!(
                "unsupported operator '{}'",
                name
            )))
        }
    };
    Ok(matched)
}

fn expect_list<'a>(expected: &'a Value, operator: &RuleOperator) -> Result<&'a Vec<Value>> {
    expected.as_array().ok_or_else(|| {
        Error::classification(format!("operator '{}' requires an array value", operator))
    })
}

fn numeric_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    let a_num = a.as_f64()?;
    let b_num = b.as_f64()?;
    a_num.partial_cmp(&b_num)
}
