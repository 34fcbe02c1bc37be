//! Segment, cohort, membership, and analytics records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::criteria::{CohortCriteria, SegmentCriteria};
use crate::error::{Error, Result};

/// Opaque user identifier as stored in the event store.
pub type UserId = String;

/// A named, rule-defined set of users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub criteria: SegmentCriteria,
    /// Size of the current membership snapshot.
    pub user_count: u64,
    pub last_calculated: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Operator-supplied segment definition.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewSegment {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    pub criteria: SegmentCriteria,
}

impl NewSegment {
    pub fn new(name: impl Into<String>, criteria: SegmentCriteria) -> Self {
        Self {
            name: name.into(),
            description: None,
            criteria,
        }
    }

    /// Builds the segment row, before any membership has been computed.
    pub fn into_segment(self, now: DateTime<Utc>) -> Segment {
        Segment {
            id: Uuid::new_v4(),
            name: self.name,
            description: self.description,
            criteria: self.criteria,
            user_count: 0,
            last_calculated: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update of a segment definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct SegmentPatch {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    pub criteria: Option<SegmentCriteria>,
}

impl SegmentPatch {
    /// Applies the patch; returns whether criteria changed.
    pub fn apply(self, segment: &mut Segment, now: DateTime<Utc>) -> bool {
        if let Some(name) = self.name {
            segment.name = name;
        }
        if let Some(description) = self.description {
            segment.description = Some(description);
        }
        let criteria_changed = self.criteria.is_some();
        if let Some(criteria) = self.criteria {
            segment.criteria = criteria;
        }
        segment.updated_at = now;
        criteria_changed
    }
}

/// Bridge row between a segment and a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMembership {
    pub segment_id: Uuid,
    pub user_id: UserId,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl SegmentMembership {
    pub fn new(segment_id: Uuid, user_id: impl Into<UserId>) -> Self {
        Self {
            segment_id,
            user_id: user_id.into(),
            metadata: serde_json::Map::new(),
        }
    }
}

/// A set of users sharing a qualifying first event within a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cohort {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub criteria: CohortCriteria,
    pub user_count: u64,
    pub last_calculated: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cohort {
    /// Whether `ts` falls within `[start_date, end_date]`.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start_date <= ts && ts <= self.end_date
    }
}

/// Operator-supplied cohort definition.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewCohort {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[validate(nested)]
    pub criteria: CohortCriteria,
}

impl NewCohort {
    pub fn new(
        name: impl Into<String>,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        criteria: CohortCriteria,
    ) -> Self {
        Self {
            name: name.into(),
            description: None,
            start_date,
            end_date,
            criteria,
        }
    }

    pub fn into_cohort(self, now: DateTime<Utc>) -> Cohort {
        Cohort {
            id: Uuid::new_v4(),
            name: self.name,
            description: self.description,
            start_date: self.start_date,
            end_date: self.end_date,
            criteria: self.criteria,
            user_count: 0,
            last_calculated: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update of a cohort definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct CohortPatch {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    #[validate(nested)]
    pub criteria: Option<CohortCriteria>,
}

impl CohortPatch {
    /// Applies the patch; returns whether membership must be recomputed.
    pub fn apply(self, cohort: &mut Cohort, now: DateTime<Utc>) -> bool {
        if let Some(name) = self.name {
            cohort.name = name;
        }
        if let Some(description) = self.description {
            cohort.description = Some(description);
        }
        let recompute =
            self.start_date.is_some() || self.end_date.is_some() || self.criteria.is_some();
        if let Some(start) = self.start_date {
            cohort.start_date = start;
        }
        if let Some(end) = self.end_date {
            cohort.end_date = end;
        }
        if let Some(criteria) = self.criteria {
            cohort.criteria = criteria;
        }
        cohort.updated_at = now;
        recompute
    }
}

/// Rejects windows whose start is after their end.
pub fn validate_window(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
    if start > end {
        return Err(Error::validation(format!(
            "window start {} is after end {}",
            start.to_rfc3339(),
            end.to_rfc3339()
        )));
    }
    Ok(())
}

/// Bridge row between a cohort and a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortMembership {
    pub cohort_id: Uuid,
    pub user_id: UserId,
    /// Earliest qualifying event within the cohort window.
    pub joined_at: DateTime<Utc>,
}

/// Structured payload of a retention computation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsMetrics {
    pub total_users: u64,
    pub active_users: u64,
    pub churned_users: u64,
    pub retention_rate: u8,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

/// Cached retention row, keyed by `(cohort_id, period_start, period_end)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortAnalytics {
    pub cohort_id: Uuid,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub metrics: AnalyticsMetrics,
    pub retention_rate: u8,
    pub active_users: u64,
    pub churned_users: u64,
    /// Reserved until a revenue signal is wired in; always zero.
    pub revenue_generated: f64,
    pub calculated_at: DateTime<Utc>,
}

impl CohortAnalytics {
    pub fn from_metrics(cohort_id: Uuid, metrics: AnalyticsMetrics, now: DateTime<Utc>) -> Self {
        Self {
            cohort_id,
            period_start: metrics.period_start,
            period_end: metrics.period_end,
            retention_rate: metrics.retention_rate,
            active_users: metrics.active_users,
            churned_users: metrics.churned_users,
            revenue_generated: 0.0,
            calculated_at: now,
            metrics,
        }
    }

    pub fn total_users(&self) -> u64 {
        self.metrics.total_users
    }
}

/// One point of a retention curve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPoint {
    pub period: u32,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub retention_rate: u8,
    pub active_users: u64,
    pub churned_users: u64,
}

impl From<&CohortAnalytics> for RetentionPoint {
    fn from(row: &CohortAnalytics) -> Self {
        Self {
            period: 0,
            period_start: row.period_start,
            period_end: row.period_end,
            retention_rate: row.retention_rate,
            active_users: row.active_users,
            churned_users: row.churned_users,
        }
    }
}

/// Default page size for member listings.
pub const DEFAULT_PAGE_LIMIT: u32 = 100;

/// Largest page a caller may request.
pub const MAX_PAGE_LIMIT: u32 = 1000;

/// Limit/offset pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    DEFAULT_PAGE_LIMIT
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl Page {
    pub fn new(limit: u32, offset: u32) -> Self {
        Self { limit, offset }
    }

    /// Clamps the limit into `1..=MAX_PAGE_LIMIT`.
    pub fn clamped(self) -> Self {
        Self {
            limit: self.limit.clamp(1, MAX_PAGE_LIMIT),
            offset: self.offset,
        }
    }

    /// Applies the page to an ordered iterator.
    pub fn slice<T>(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.offset as usize)
            .take(self.limit as usize)
            .collect()
    }
}
