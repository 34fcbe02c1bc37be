//! In-process persistence engine and event store.
//!
//! [`MemoryStore`] keeps every relation behind one lock. A commit applies the
//! staged writes in place under the write lock and records the previous value
//! of every key it touches; if any write fails the log is replayed backwards,
//! so readers see either the old snapshot or the new one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use engine_core::{
    Cohort, CohortAnalytics, CohortMembership, Error, EventQuery, EventRecord, EventStore, Page,
    Persistence, Result, Segment, SegmentMembership, Transaction, UserId, WriteOp,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

type AnalyticsKey = (Uuid, DateTime<Utc>, DateTime<Utc>);
type SegmentRows = BTreeMap<UserId, SegmentMembership>;
type CohortRows = BTreeMap<UserId, CohortMembership>;

#[derive(Debug, Default)]
struct StoreState {
    segments: BTreeMap<Uuid, Segment>,
    segment_members: BTreeMap<Uuid, SegmentRows>,
    cohorts: BTreeMap<Uuid, Cohort>,
    cohort_members: BTreeMap<Uuid, CohortRows>,
    analytics: BTreeMap<AnalyticsKey, CohortAnalytics>,
}

/// Previous value of one key, restored on rollback.
enum Undo {
    Segment(Uuid, Option<Segment>),
    SegmentMembers(Uuid, Option<SegmentRows>),
    Cohort(Uuid, Option<Cohort>),
    CohortMembers(Uuid, Option<CohortRows>),
    Analytics(AnalyticsKey, Option<CohortAnalytics>),
}

fn restore<K: Ord, V>(map: &mut BTreeMap<K, V>, key: K, previous: Option<V>) {
    match previous {
        Some(value) => {
            map.insert(key, value);
        }
        None => {
            map.remove(&key);
        }
    }
}

impl StoreState {
    /// Applies every op or none of them.
    fn apply_all(&mut self, ops: Vec<WriteOp>) -> Result<()> {
        let mut log = Vec::new();
        for op in ops {
            if let Err(e) = self.apply(op, &mut log) {
                self.rollback(log);
                return Err(e);
            }
        }
        Ok(())
    }

    fn rollback(&mut self, log: Vec<Undo>) {
        for entry in log.into_iter().rev() {
            match entry {
                Undo::Segment(id, prev) => restore(&mut self.segments, id, prev),
                Undo::SegmentMembers(id, prev) => restore(&mut self.segment_members, id, prev),
                Undo::Cohort(id, prev) => restore(&mut self.cohorts, id, prev),
                Undo::CohortMembers(id, prev) => restore(&mut self.cohort_members, id, prev),
                Undo::Analytics(key, prev) => restore(&mut self.analytics, key, prev),
            }
        }
    }

    /// Drops every cached analytics row of a cohort.
    fn drop_analytics(&mut self, cohort_id: Uuid, log: &mut Vec<Undo>) {
        let keys: Vec<AnalyticsKey> = self
            .analytics
            .range((cohort_id, DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MIN_UTC)..)
            .take_while(|((id, _, _), _)| *id == cohort_id)
            .map(|(key, _)| *key)
            .collect();
        for key in keys {
            let previous = self.analytics.remove(&key);
            log.push(Undo::Analytics(key, previous));
        }
    }

    /// Validates an op before touching state, then records undo entries as it
    /// mutates.
    fn apply(&mut self, op: WriteOp, log: &mut Vec<Undo>) -> Result<()> {
        match op {
            WriteOp::PutSegment(mut segment) => {
                // Snapshot fields belong to ReplaceSegmentMembers.
                let previous = self.segments.get(&segment.id).cloned();
                match &previous {
                    Some(existing) => {
                        segment.user_count = existing.user_count;
                        segment.last_calculated = existing.last_calculated;
                    }
                    None => {
                        segment.user_count = 0;
                        segment.last_calculated = None;
                        let rows = self.segment_members.insert(segment.id, SegmentRows::new());
                        log.push(Undo::SegmentMembers(segment.id, rows));
                    }
                }
                log.push(Undo::Segment(segment.id, previous));
                self.segments.insert(segment.id, segment);
            }
            WriteOp::DeleteSegment(id) => {
                let previous = self
                    .segments
                    .remove(&id)
                    .ok_or_else(|| Error::segment_not_found(id))?;
                log.push(Undo::Segment(id, Some(previous)));
                let rows = self.segment_members.remove(&id);
                log.push(Undo::SegmentMembers(id, rows));
            }
            WriteOp::ReplaceSegmentMembers {
                segment_id,
                members,
                calculated_at,
            } => {
                if !self.segments.contains_key(&segment_id) {
                    return Err(Error::segment_not_found(segment_id));
                }

                let mut rows = SegmentRows::new();
                for member in members {
                    if member.segment_id != segment_id {
                        return Err(Error::invariant(format!(
                            "membership for segment {} staged under segment {}",
                            member.segment_id, segment_id
                        )));
                    }
                    rows.insert(member.user_id.clone(), member);
                }

                if let Some(segment) = self.segments.get_mut(&segment_id) {
                    log.push(Undo::Segment(segment_id, Some(segment.clone())));
                    segment.user_count = rows.len() as u64;
                    segment.last_calculated = Some(calculated_at);
                }
                let previous = self.segment_members.insert(segment_id, rows);
                log.push(Undo::SegmentMembers(segment_id, previous));
            }
            WriteOp::PutCohort(mut cohort) => {
                let previous = self.cohorts.get(&cohort.id).cloned();
                match &previous {
                    Some(existing) => {
                        cohort.user_count = existing.user_count;
                        cohort.last_calculated = existing.last_calculated;
                    }
                    None => {
                        cohort.user_count = 0;
                        cohort.last_calculated = None;
                        let rows = self.cohort_members.insert(cohort.id, CohortRows::new());
                        log.push(Undo::CohortMembers(cohort.id, rows));
                    }
                }
                log.push(Undo::Cohort(cohort.id, previous));
                self.cohorts.insert(cohort.id, cohort);
            }
            WriteOp::DeleteCohort(id) => {
                let previous = self
                    .cohorts
                    .remove(&id)
                    .ok_or_else(|| Error::cohort_not_found(id))?;
                log.push(Undo::Cohort(id, Some(previous)));
                let rows = self.cohort_members.remove(&id);
                log.push(Undo::CohortMembers(id, rows));
                self.drop_analytics(id, log);
            }
            WriteOp::ReplaceCohortMembers {
                cohort_id,
                members,
                calculated_at,
            } => {
                let cohort = self
                    .cohorts
                    .get(&cohort_id)
                    .ok_or_else(|| Error::cohort_not_found(cohort_id))?;

                let mut rows = CohortRows::new();
                for member in members {
                    if member.cohort_id != cohort_id || !cohort.contains(member.joined_at) {
                        return Err(Error::invariant(format!(
                            "membership of user {} joined at {} is outside cohort {} window",
                            member.user_id,
                            member.joined_at.to_rfc3339(),
                            cohort_id
                        )));
                    }
                    if rows.insert(member.user_id.clone(), member).is_some() {
                        return Err(Error::invariant(format!(
                            "duplicate membership staged for cohort {}",
                            cohort_id
                        )));
                    }
                }

                if let Some(cohort) = self.cohorts.get_mut(&cohort_id) {
                    log.push(Undo::Cohort(cohort_id, Some(cohort.clone())));
                    cohort.user_count = rows.len() as u64;
                    cohort.last_calculated = Some(calculated_at);
                }
                let previous = self.cohort_members.insert(cohort_id, rows);
                log.push(Undo::CohortMembers(cohort_id, previous));
                self.drop_analytics(cohort_id, log);
            }
            WriteOp::UpsertAnalytics {
                row,
                population_as_of,
            } => {
                let cohort = self
                    .cohorts
                    .get(&row.cohort_id)
                    .ok_or_else(|| Error::cohort_not_found(row.cohort_id))?;
                if cohort.last_calculated != population_as_of {
                    return Err(Error::conflict(format!(
                        "cohort {} was rebuilt while its retention was being computed",
                        row.cohort_id
                    )));
                }
                let key = (row.cohort_id, row.period_start, row.period_end);
                let previous = self.analytics.insert(key, row);
                log.push(Undo::Analytics(key, previous));
            }
        }
        Ok(())
    }
}

/// In-process transactional persistence engine.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Transaction over a [`MemoryStore`].
pub struct MemoryTransaction {
    state: Arc<RwLock<StoreState>>,
    ops: Vec<WriteOp>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    fn stage(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction { state, ops } = *self;
        let op_count = ops.len();

        state.write().apply_all(ops)?;

        debug!(ops = op_count, "Transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) {
        debug!(ops = self.ops.len(), "Transaction rolled back");
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        Ok(Box::new(MemoryTransaction {
            state: self.state.clone(),
            ops: Vec::new(),
        }))
    }

    async fn get_segment(&self, id: Uuid) -> Result<Option<Segment>> {
        Ok(self.state.read().segments.get(&id).cloned())
    }

    async fn list_segments(&self) -> Result<Vec<Segment>> {
        Ok(self.state.read().segments.values().cloned().collect())
    }

    async fn list_segment_members(
        &self,
        segment_id: Uuid,
        page: Page,
    ) -> Result<Vec<SegmentMembership>> {
        let state = self.state.read();
        Ok(state
            .segment_members
            .get(&segment_id)
            .map(|rows| page.slice(rows.values().cloned()))
            .unwrap_or_default())
    }

    async fn count_segment_members(&self, segment_id: Uuid) -> Result<u64> {
        let state = self.state.read();
        Ok(state
            .segment_members
            .get(&segment_id)
            .map_or(0, |rows| rows.len() as u64))
    }

    async fn list_user_segments(&self, user_id: &str) -> Result<Vec<Segment>> {
        let state = self.state.read();
        Ok(state
            .segment_members
            .iter()
            .filter(|(_, rows)| rows.contains_key(user_id))
            .filter_map(|(id, _)| state.segments.get(id).cloned())
            .collect())
    }

    async fn get_cohort(&self, id: Uuid) -> Result<Option<Cohort>> {
        Ok(self.state.read().cohorts.get(&id).cloned())
    }

    async fn list_cohorts(&self) -> Result<Vec<Cohort>> {
        Ok(self.state.read().cohorts.values().cloned().collect())
    }

    async fn list_cohort_members(
        &self,
        cohort_id: Uuid,
        page: Page,
    ) -> Result<Vec<CohortMembership>> {
        let state = self.state.read();
        Ok(state
            .cohort_members
            .get(&cohort_id)
            .map(|rows| page.slice(rows.values().cloned()))
            .unwrap_or_default())
    }

    async fn cohort_member_ids(&self, cohort_id: Uuid) -> Result<Vec<UserId>> {
        let state = self.state.read();
        Ok(state
            .cohort_members
            .get(&cohort_id)
            .map(|rows| rows.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_user_cohorts(&self, user_id: &str) -> Result<Vec<Cohort>> {
        let state = self.state.read();
        Ok(state
            .cohort_members
            .iter()
            .filter(|(_, rows)| rows.contains_key(user_id))
            .filter_map(|(id, _)| state.cohorts.get(id).cloned())
            .collect())
    }

    async fn get_analytics(
        &self,
        cohort_id: Uuid,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<Option<CohortAnalytics>> {
        Ok(self
            .state
            .read()
            .analytics
            .get(&(cohort_id, period_start, period_end))
            .cloned())
    }

    async fn list_analytics(&self, cohort_id: Uuid) -> Result<Vec<CohortAnalytics>> {
        let state = self.state.read();
        let mut rows: Vec<CohortAnalytics> = state
            .analytics
            .iter()
            .filter(|((id, _, _), _)| *id == cohort_id)
            .map(|(_, row)| row.clone())
            .collect();
        rows.sort_by(|a, b| {
            b.period_start
                .cmp(&a.period_start)
                .then(b.period_end.cmp(&a.period_end))
        });
        Ok(rows)
    }

    async fn ping(&self) -> bool {
        true
    }
}

/// Event store held in memory, for development and tests.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    events: Arc<RwLock<Vec<EventRecord>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: EventRecord) {
        self.events.write().push(event);
    }

    pub fn extend(&self, events: impl IntoIterator<Item = EventRecord>) {
        self.events.write().extend(events);
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    fn matching(&self, query: &EventQuery) -> Vec<EventRecord> {
        self.events
            .read()
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn query_events(&self, query: &EventQuery) -> Result<Vec<EventRecord>> {
        let mut events = self.matching(query);
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(events)
    }

    async fn distinct_users(&self, query: &EventQuery) -> Result<BTreeSet<UserId>> {
        Ok(self
            .events
            .read()
            .iter()
            .filter(|e| query.matches(e))
            .map(|e| e.user_id.clone())
            .collect())
    }

    async fn count_distinct_users(&self, query: &EventQuery) -> Result<u64> {
        Ok(self.distinct_users(query).await?.len() as u64)
    }

    async fn ping(&self) -> bool {
        true
    }
}
