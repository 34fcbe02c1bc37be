//! Read-only lookups over stored definitions and membership snapshots.

use engine_core::{
    Cohort, CohortMembership, Error, Page, Persistence, Result, Segment, SegmentMembership,
};
use std::sync::Arc;
use uuid::Uuid;

/// Query facade. Never touches the event store, so reads stay cheap and
/// reflect the last committed snapshot.
pub struct QueryFacade {
    persistence: Arc<dyn Persistence>,
}

impl QueryFacade {
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self { persistence }
    }

    pub async fn list_segments(&self) -> Result<Vec<Segment>> {
        self.persistence.list_segments().await
    }

    pub async fn get_segment(&self, id: Uuid) -> Result<Segment> {
        self.persistence
            .get_segment(id)
            .await?
            .ok_or_else(|| Error::segment_not_found(id))
    }

    /// Members of a segment, ordered by user id.
    pub async fn list_segment_users(
        &self,
        id: Uuid,
        page: Page,
    ) -> Result<Vec<SegmentMembership>> {
        self.get_segment(id).await?;
        self.persistence
            .list_segment_members(id, page.clamped())
            .await
    }

    /// Segments the user currently belongs to. Unknown users get an empty list.
    pub async fn list_user_segments(&self, user_id: &str) -> Result<Vec<Segment>> {
        self.persistence.list_user_segments(user_id).await
    }

    pub async fn list_cohorts(&self) -> Result<Vec<Cohort>> {
        self.persistence.list_cohorts().await
    }

    pub async fn get_cohort(&self, id: Uuid) -> Result<Cohort> {
        self.persistence
            .get_cohort(id)
            .await?
            .ok_or_else(|| Error::cohort_not_found(id))
    }

    /// Members of a cohort, ordered by user id.
    pub async fn list_cohort_users(&self, id: Uuid, page: Page) -> Result<Vec<CohortMembership>> {
        self.get_cohort(id).await?;
        self.persistence.list_cohort_members(id, page.clamped()).await
    }

    pub async fn list_user_cohorts(&self, user_id: &str) -> Result<Vec<Cohort>> {
        self.persistence.list_user_cohorts(user_id).await
    }
}
