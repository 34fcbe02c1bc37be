//! Retention analytics calculator.
//!
//! Analytics rows double as the per-period cache: a curve reuses the stored
//! row for an exact `(cohort, period_start, period_end)` key and computes
//! only the missing windows.

use chrono::{DateTime, Utc};
use engine_core::{
    build_metrics, curve_windows, validate_periods, validate_window, AnalyticsMetrics, Cohort,
    CohortAnalytics, Error, EventQuery, EventStore, Persistence, Result, RetentionPoint, WriteOp,
};
use std::sync::Arc;
use std::time::Instant;
use telemetry::metrics;
use tracing::{debug, info};
use uuid::Uuid;

/// Computes and caches windowed retention for cohorts.
pub struct RetentionCalculator {
    events: Arc<dyn EventStore>,
    persistence: Arc<dyn Persistence>,
}

impl RetentionCalculator {
    pub fn new(events: Arc<dyn EventStore>, persistence: Arc<dyn Persistence>) -> Self {
        Self {
            events,
            persistence,
        }
    }

    /// Computes retention for one period and upserts the analytics row.
    pub async fn calculate(
        &self,
        cohort_id: Uuid,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<CohortAnalytics> {
        validate_window(period_start, period_end)?;
        let cohort = self.load(cohort_id).await?;
        self.calculate_for(&cohort, period_start, period_end).await
    }

    /// Weekly retention curve starting at the cohort's start date.
    ///
    /// Each window is independent: a point measures activity within its own
    /// 7-day slice, not retention since the cohort started.
    pub async fn get_retention_curve(
        &self,
        cohort_id: Uuid,
        periods: u32,
    ) -> Result<Vec<RetentionPoint>> {
        let periods = validate_periods(periods)?;
        let cohort = self.load(cohort_id).await?;

        let mut curve = Vec::with_capacity(periods as usize);
        for window in curve_windows(cohort.start_date, periods)? {
            let cached = self
                .persistence
                .get_analytics(cohort_id, window.start, window.end)
                .await?;

            let row = match cached {
                Some(row) => {
                    metrics().analytics_cache_hits.inc();
                    debug!(
                        cohort_id = %cohort_id,
                        period = window.period,
                        "Retention period served from cache"
                    );
                    row
                }
                None => self.calculate_for(&cohort, window.start, window.end).await?,
            };

            curve.push(RetentionPoint {
                period: window.period,
                ..RetentionPoint::from(&row)
            });
        }
        Ok(curve)
    }

    /// Cached analytics rows, most recent period first.
    pub async fn get_history(&self, cohort_id: Uuid) -> Result<Vec<CohortAnalytics>> {
        self.load(cohort_id).await?;
        self.persistence.list_analytics(cohort_id).await
    }

    /// Computes and stores one period. If the cohort is rebuilt while the
    /// period is being computed, the stale row is rejected at commit and the
    /// period is computed once more against the new population.
    async fn calculate_for(
        &self,
        cohort: &Cohort,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<CohortAnalytics> {
        match self.try_calculate(cohort, period_start, period_end).await {
            Err(Error::Conflict(reason)) => {
                debug!(cohort_id = %cohort.id, %reason, "Cohort rebuilt mid-computation, retrying");
                let fresh = self.load(cohort.id).await?;
                self.try_calculate(&fresh, period_start, period_end).await
            }
            other => other,
        }
    }

    async fn try_calculate(
        &self,
        cohort: &Cohort,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<CohortAnalytics> {
        let metrics_payload = self.compute(cohort.id, period_start, period_end).await?;
        let row = CohortAnalytics::from_metrics(cohort.id, metrics_payload, Utc::now());

        let mut tx = self.persistence.begin().await?;
        tx.stage(WriteOp::UpsertAnalytics {
            row: row.clone(),
            population_as_of: cohort.last_calculated,
        });
        tx.commit().await?;

        metrics().analytics_computed.inc();
        info!(
            cohort_id = %cohort.id,
            period_start = %period_start,
            period_end = %period_end,
            total_users = row.total_users(),
            active_users = row.active_users,
            retention_rate = row.retention_rate,
            "Retention calculated"
        );
        Ok(row)
    }

    async fn compute(
        &self,
        cohort_id: Uuid,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<AnalyticsMetrics> {
        let members = self.persistence.cohort_member_ids(cohort_id).await?;
        let total_users = members.len() as u64;

        let active_users = if members.is_empty() {
            0
        } else {
            let query = EventQuery::all()
                .between(period_start, period_end)
                .for_users(members);

            let start = Instant::now();
            metrics().event_store_queries.inc();
            let active = self
                .events
                .count_distinct_users(&query)
                .await
                .inspect_err(|_| metrics().event_store_errors.inc())?;
            metrics()
                .event_store_latency_ms
                .observe(start.elapsed().as_millis() as u64);
            active
        };

        build_metrics(total_users, active_users, period_start, period_end)
    }

    async fn load(&self, id: Uuid) -> Result<Cohort> {
        self.persistence
            .get_cohort(id)
            .await?
            .ok_or_else(|| Error::cohort_not_found(id))
    }
}
