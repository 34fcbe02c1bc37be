//! Segment membership manager.
//!
//! Every mutation evaluates the criteria first and only then opens a
//! transaction, so a failed evaluation never touches the stored snapshot.

use chrono::Utc;
use engine_core::{
    Error, NewSegment, Persistence, Result, Segment, SegmentMembership, SegmentPatch, UserId,
    WriteOp,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use telemetry::metrics;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::evaluator::{check_criteria, RuleEvaluator};

/// Owns segment definitions and their membership snapshots.
pub struct SegmentManager {
    persistence: Arc<dyn Persistence>,
    evaluator: Arc<RuleEvaluator>,
}

impl SegmentManager {
    pub fn new(persistence: Arc<dyn Persistence>, evaluator: Arc<RuleEvaluator>) -> Self {
        Self {
            persistence,
            evaluator,
        }
    }

    /// Persists a new segment together with its first membership snapshot.
    pub async fn create_segment(&self, definition: NewSegment) -> Result<Segment> {
        definition.validate()?;
        check_criteria(&definition.criteria)?;

        let now = Utc::now();
        let segment = definition.into_segment(now);
        let users = self.evaluate(&segment).await?;

        let mut tx = self.persistence.begin().await?;
        tx.stage(WriteOp::PutSegment(segment.clone()));
        tx.stage(replace_members(segment.id, users));
        tx.commit().await?;

        let stored = self.load(segment.id).await?;
        info!(
            segment_id = %stored.id,
            name = %stored.name,
            user_count = stored.user_count,
            "Segment created"
        );
        Ok(stored)
    }

    /// Applies a patch, recalculating membership when criteria change.
    pub async fn update_segment(&self, id: Uuid, patch: SegmentPatch) -> Result<Segment> {
        patch.validate()?;
        if let Some(criteria) = &patch.criteria {
            check_criteria(criteria)?;
        }

        let mut segment = self.load(id).await?;
        let criteria_changed = patch.apply(&mut segment, Utc::now());

        let members = if criteria_changed {
            Some(self.evaluate(&segment).await?)
        } else {
            None
        };

        let mut tx = self.persistence.begin().await?;
        tx.stage(WriteOp::PutSegment(segment));
        if let Some(users) = members {
            tx.stage(replace_members(id, users));
        }
        tx.commit().await?;

        let stored = self.load(id).await?;
        info!(
            segment_id = %id,
            recalculated = criteria_changed,
            user_count = stored.user_count,
            "Segment updated"
        );
        Ok(stored)
    }

    /// Re-evaluates the stored criteria and swaps in a fresh snapshot.
    pub async fn recalculate(&self, id: Uuid) -> Result<Segment> {
        let segment = self.load(id).await?;
        let users = self.evaluate(&segment).await?;

        let mut tx = self.persistence.begin().await?;
        tx.stage(replace_members(id, users));
        tx.commit().await?;

        let stored = self.load(id).await?;
        info!(
            segment_id = %id,
            user_count = stored.user_count,
            "Segment recalculated"
        );
        Ok(stored)
    }

    /// Deletes the segment and its membership rows.
    pub async fn delete_segment(&self, id: Uuid) -> Result<()> {
        self.load(id).await?;

        let mut tx = self.persistence.begin().await?;
        tx.stage(WriteOp::DeleteSegment(id));
        tx.commit().await?;

        info!(segment_id = %id, "Segment deleted");
        Ok(())
    }

    async fn load(&self, id: Uuid) -> Result<Segment> {
        self.persistence
            .get_segment(id)
            .await?
            .ok_or_else(|| Error::segment_not_found(id))
    }

    async fn evaluate(&self, segment: &Segment) -> Result<BTreeSet<UserId>> {
        let start = Instant::now();
        match self.evaluator.evaluate(&segment.criteria).await {
            Ok(users) => {
                metrics().segment_recalculations.inc();
                metrics()
                    .recalculation_latency_ms
                    .observe(start.elapsed().as_millis() as u64);
                Ok(users)
            }
            Err(e) => {
                metrics().recalculation_failures.inc();
                warn!(
                    segment_id = %segment.id,
                    error = %e,
                    code = e.code(),
                    "Segment evaluation failed, keeping previous snapshot"
                );
                Err(e)
            }
        }
    }
}

fn replace_members(segment_id: Uuid, users: BTreeSet<UserId>) -> WriteOp {
    WriteOp::ReplaceSegmentMembers {
        segment_id,
        members: users
            .into_iter()
            .map(|user| SegmentMembership::new(segment_id, user))
            .collect(),
        calculated_at: Utc::now(),
    }
}
