//! Cohort builder.

use chrono::{DateTime, Utc};
use engine_core::{
    validate_window, Cohort, CohortMembership, CohortPatch, Error, EventQuery, EventStore,
    NewCohort, Persistence, Result, UserId, WriteOp,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use telemetry::metrics;
use tracing::{error, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::evaluator::check_property_rule;

/// Owns cohort definitions and their membership snapshots.
pub struct CohortBuilder {
    events: Arc<dyn EventStore>,
    persistence: Arc<dyn Persistence>,
}

impl CohortBuilder {
    pub fn new(events: Arc<dyn EventStore>, persistence: Arc<dyn Persistence>) -> Self {
        Self {
            events,
            persistence,
        }
    }

    /// Persists a new cohort together with its first membership snapshot.
    pub async fn create_cohort(&self, definition: NewCohort) -> Result<Cohort> {
        definition.validate()?;
        validate_window(definition.start_date, definition.end_date)?;
        if let Some(filter) = &definition.criteria.property_filter {
            check_property_rule(filter)?;
        }

        let cohort = definition.into_cohort(Utc::now());
        let members = self.compute(&cohort).await?;

        let mut tx = self.persistence.begin().await?;
        tx.stage(WriteOp::PutCohort(cohort.clone()));
        tx.stage(replace_members(cohort.id, members));
        tx.commit().await?;

        let stored = self.load(cohort.id).await?;
        info!(
            cohort_id = %stored.id,
            name = %stored.name,
            user_count = stored.user_count,
            "Cohort created"
        );
        Ok(stored)
    }

    /// Applies a patch, recalculating membership when the window or criteria change.
    pub async fn update_cohort(&self, id: Uuid, patch: CohortPatch) -> Result<Cohort> {
        patch.validate()?;
        if let Some(filter) = patch
            .criteria
            .as_ref()
            .and_then(|c| c.property_filter.as_ref())
        {
            check_property_rule(filter)?;
        }

        let mut cohort = self.load(id).await?;
        let recompute = patch.apply(&mut cohort, Utc::now());
        validate_window(cohort.start_date, cohort.end_date)?;

        let members = if recompute {
            Some(self.compute(&cohort).await?)
        } else {
            None
        };

        let mut tx = self.persistence.begin().await?;
        tx.stage(WriteOp::PutCohort(cohort));
        if let Some(members) = members {
            tx.stage(replace_members(id, members));
        }
        tx.commit().await?;

        let stored = self.load(id).await?;
        info!(
            cohort_id = %id,
            recalculated = recompute,
            user_count = stored.user_count,
            "Cohort updated"
        );
        Ok(stored)
    }

    /// Rebuilds the membership snapshot from the event store.
    pub async fn recalculate(&self, id: Uuid) -> Result<Cohort> {
        let cohort = self.load(id).await?;
        let members = self.compute(&cohort).await?;

        let mut tx = self.persistence.begin().await?;
        tx.stage(replace_members(id, members));
        tx.commit().await?;

        let stored = self.load(id).await?;
        info!(
            cohort_id = %id,
            user_count = stored.user_count,
            "Cohort recalculated"
        );
        Ok(stored)
    }

    /// Deletes the cohort, its memberships, and its cached analytics.
    pub async fn delete_cohort(&self, id: Uuid) -> Result<()> {
        self.load(id).await?;

        let mut tx = self.persistence.begin().await?;
        tx.stage(WriteOp::DeleteCohort(id));
        tx.commit().await?;

        info!(cohort_id = %id, "Cohort deleted");
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Cohort> {
        self.persistence
            .get_cohort(id)
            .await?
            .ok_or_else(|| Error::cohort_not_found(id))
    }

    async fn compute(&self, cohort: &Cohort) -> Result<Vec<CohortMembership>> {
        let start = Instant::now();
        match self.qualifying_members(cohort).await {
            Ok(members) => {
                metrics().cohort_recalculations.inc();
                metrics()
                    .recalculation_latency_ms
                    .observe(start.elapsed().as_millis() as u64);
                Ok(members)
            }
            Err(e) => {
                metrics().recalculation_failures.inc();
                warn!(
                    cohort_id = %cohort.id,
                    error = %e,
                    code = e.code(),
                    "Cohort build failed, keeping previous snapshot"
                );
                Err(e)
            }
        }
    }

    /// First qualifying event per user, honoring the occurrence threshold.
    async fn qualifying_members(&self, cohort: &Cohort) -> Result<Vec<CohortMembership>> {
        let criteria = &cohort.criteria;
        let query = EventQuery::named(criteria.event_name.clone())
            .between(cohort.start_date, cohort.end_date);

        let query_start = Instant::now();
        metrics().event_store_queries.inc();
        let events = self.events.query_events(&query).await.inspect_err(|_| {
            metrics().event_store_errors.inc();
        })?;
        metrics()
            .event_store_latency_ms
            .observe(query_start.elapsed().as_millis() as u64);

        let mut per_user: BTreeMap<UserId, (u64, DateTime<Utc>)> = BTreeMap::new();
        for event in events {
            if !cohort.contains(event.timestamp) {
                error!(
                    cohort_id = %cohort.id,
                    user_id = %event.user_id,
                    timestamp = %event.timestamp,
                    "Event store returned an event outside the requested window"
                );
                return Err(Error::invariant(format!(
                    "event at {} outside cohort window",
                    event.timestamp.to_rfc3339()
                )));
            }
            if let Some(filter) = &criteria.property_filter {
                if !filter.matches_properties(&event.properties)? {
                    continue;
                }
            }
            per_user
                .entry(event.user_id)
                .and_modify(|(count, first)| {
                    *count += 1;
                    if event.timestamp < *first {
                        *first = event.timestamp;
                    }
                })
                .or_insert((1, event.timestamp));
        }

        let threshold = criteria.threshold();
        Ok(per_user
            .into_iter()
            .filter(|(_, (count, _))| *count >= threshold)
            .map(|(user_id, (_, joined_at))| CohortMembership {
                cohort_id: cohort.id,
                user_id,
                joined_at,
            })
            .collect())
    }
}

fn replace_members(cohort_id: Uuid, members: Vec<CohortMembership>) -> WriteOp {
    WriteOp::ReplaceCohortMembers {
        cohort_id,
        members,
        calculated_at: Utc::now(),
    }
}
