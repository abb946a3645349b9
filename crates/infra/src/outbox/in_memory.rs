//! In-memory outbox for tests/dev.
//!
//! Emulates the two storage guarantees the mechanism depends on:
//! - transactional inserts ([`InMemoryTransaction`] commits or rolls back as a unit)
//! - skip-locked claims (a row held by a live [`InMemoryClaim`] is invisible to others)

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;

use mrp_core::{EventId, OutboxId};

use super::{
    DeliveryOutcome, NewOutboxRecord, OutboxClaim, OutboxError, OutboxRecord, OutboxStatus,
    OutboxStore, OutboxWriter, StatusCounts,
};

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    rows: BTreeMap<OutboxId, OutboxRecord>,
    locked: HashSet<OutboxId>,
    aggregate_locks: HashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl State {
    fn contains_event(&self, event_id: EventId) -> bool {
        self.rows.values().any(|r| r.event_id == event_id)
    }

    fn find_event_mut(&mut self, event_id: EventId) -> Option<&mut OutboxRecord> {
        self.rows.values_mut().find(|r| r.event_id == event_id)
    }
}

fn lock(state: &Mutex<State>) -> Result<MutexGuard<'_, State>, OutboxError> {
    state.lock().map_err(|_| OutboxError::Poisoned)
}

/// In-memory outbox store. Clones share the same rows.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOutboxStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Open a write transaction.
    pub fn begin(&self) -> InMemoryTransaction {
        InMemoryTransaction {
            state: Arc::clone(&self.state),
            pending: Vec::new(),
            aggregate_guards: Vec::new(),
        }
    }

    /// Every committed row, in insertion order.
    pub fn all(&self) -> Result<Vec<OutboxRecord>, OutboxError> {
        Ok(lock(&self.state)?.rows.values().cloned().collect())
    }

    pub fn get(&self, id: OutboxId) -> Result<Option<OutboxRecord>, OutboxError> {
        Ok(lock(&self.state)?.rows.get(&id).cloned())
    }

    /// Rewrite a committed row in place (tests use this to move time-based fields).
    pub fn update_with<F>(&self, id: OutboxId, f: F) -> Result<(), OutboxError>
    where
        F: FnOnce(&mut OutboxRecord),
    {
        let mut state = lock(&self.state)?;
        let row = state
            .rows
            .get_mut(&id)
            .ok_or_else(|| OutboxError::Storage(format!("no outbox row with id {id}")))?;
        f(row);
        Ok(())
    }
}

/// Open write transaction against an [`InMemoryOutboxStore`].
///
/// Inserts stay invisible until [`InMemoryTransaction::commit`]; dropping the
/// transaction rolls them back. Ids are allocated eagerly, like a database sequence,
/// so a rollback leaves a gap.
#[derive(Debug)]
pub struct InMemoryTransaction {
    state: Arc<Mutex<State>>,
    pending: Vec<OutboxRecord>,
    aggregate_guards: Vec<(String, OwnedMutexGuard<()>)>,
}

impl InMemoryTransaction {
    pub fn commit(self) -> Result<Vec<OutboxId>, OutboxError> {
        let mut state = lock(&self.state)?;
        if let Some(dup) = self.pending.iter().find(|r| state.contains_event(r.event_id)) {
            return Err(OutboxError::DuplicateEvent(dup.event_id));
        }
        let ids = self.pending.iter().map(|r| r.id).collect();
        for row in &self.pending {
            state.rows.insert(row.id, row.clone());
        }
        Ok(ids)
    }

    /// Discard every insert of this transaction.
    pub fn rollback(self) {}

    /// Release aggregate locks and forget the ones no other transaction waits on.
    fn release_aggregates(&mut self) {
        if self.aggregate_guards.is_empty() {
            return;
        }
        let held: Vec<String> = self
            .aggregate_guards
            .drain(..)
            .map(|(aggregate_id, _guard)| aggregate_id)
            .collect();
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        for aggregate_id in held {
            let idle = state
                .aggregate_locks
                .get(&aggregate_id)
                .is_some_and(|m| Arc::strong_count(m) == 1);
            if idle {
                state.aggregate_locks.remove(&aggregate_id);
            }
        }
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        self.release_aggregates();
    }
}

#[async_trait]
impl OutboxWriter for InMemoryTransaction {
    async fn insert(&mut self, record: NewOutboxRecord) -> Result<OutboxId, OutboxError> {
        let mut state = lock(&self.state)?;
        if state.contains_event(record.event_id)
            || self.pending.iter().any(|r| r.event_id == record.event_id)
        {
            return Err(OutboxError::DuplicateEvent(record.event_id));
        }
        state.next_id += 1;
        let id = OutboxId::new(state.next_id);
        self.pending.push(OutboxRecord::ready(id, record));
        Ok(id)
    }

    async fn lock_aggregate(&mut self, aggregate_id: &str) -> Result<(), OutboxError> {
        if self.aggregate_guards.iter().any(|(a, _)| a == aggregate_id) {
            return Ok(());
        }
        let mutex = {
            let mut state = lock(&self.state)?;
            Arc::clone(state.aggregate_locks.entry(aggregate_id.to_string()).or_default())
        };
        let guard = mutex.lock_owned().await;
        self.aggregate_guards.push((aggregate_id.to_string(), guard));
        Ok(())
    }

    async fn last_version(&mut self, aggregate_id: &str) -> Result<Option<i64>, OutboxError> {
        let state = lock(&self.state)?;
        let committed = state
            .rows
            .values()
            .filter(|r| r.aggregate_id == aggregate_id)
            .map(|r| r.version);
        let pending = self
            .pending
            .iter()
            .filter(|r| r.aggregate_id == aggregate_id)
            .map(|r| r.version);
        Ok(committed.chain(pending).max())
    }
}

/// Rows claimed from an [`InMemoryOutboxStore`].
#[derive(Debug)]
pub struct InMemoryClaim {
    state: Arc<Mutex<State>>,
    records: Vec<OutboxRecord>,
    outcomes: Vec<(OutboxId, DeliveryOutcome)>,
    released: bool,
}

impl InMemoryClaim {
    fn release(&mut self, state: &mut State) {
        for r in &self.records {
            state.locked.remove(&r.id);
        }
        self.released = true;
    }
}

impl Drop for InMemoryClaim {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let state = Arc::clone(&self.state);
        if let Ok(mut guard) = state.lock() {
            self.release(&mut guard);
        }
    }
}

#[async_trait]
impl OutboxClaim for InMemoryClaim {
    fn records(&self) -> &[OutboxRecord] {
        &self.records
    }

    async fn record_outcome(
        &mut self,
        id: OutboxId,
        outcome: &DeliveryOutcome,
    ) -> Result<(), OutboxError> {
        if !self.records.iter().any(|r| r.id == id) {
            return Err(OutboxError::Storage(format!("outbox row {id} is not part of this claim")));
        }
        self.outcomes.push((id, outcome.clone()));
        Ok(())
    }

    async fn commit(mut self) -> Result<(), OutboxError> {
        let state = Arc::clone(&self.state);
        let mut guard = lock(&state)?;
        for (id, outcome) in &self.outcomes {
            if let Some(row) = guard.rows.get_mut(id) {
                row.apply(outcome);
            }
        }
        self.release(&mut guard);
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    type Claim = InMemoryClaim;

    async fn claim_due(
        &self,
        limit: usize,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<InMemoryClaim, OutboxError> {
        let mut state = lock(&self.state)?;
        let mut due: Vec<&OutboxRecord> = state
            .rows
            .values()
            .filter(|r| !state.locked.contains(&r.id) && r.is_due(max_retries, now))
            .collect();
        due.sort_by_key(|r| (r.occurred_at, r.id));
        let records: Vec<OutboxRecord> = due.into_iter().take(limit).cloned().collect();

        for r in &records {
            state.locked.insert(r.id);
        }

        Ok(InMemoryClaim {
            state: Arc::clone(&self.state),
            records,
            outcomes: Vec::new(),
            released: false,
        })
    }

    async fn find_by_status(
        &self,
        status: OutboxStatus,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>, OutboxError> {
        let state = lock(&self.state)?;
        let mut rows: Vec<OutboxRecord> = state
            .rows
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.occurred_at, r.id));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn find_by_event_id(
        &self,
        event_id: EventId,
    ) -> Result<Option<OutboxRecord>, OutboxError> {
        let state = lock(&self.state)?;
        Ok(state.rows.values().find(|r| r.event_id == event_id).cloned())
    }

    async fn status_counts(&self) -> Result<StatusCounts, OutboxError> {
        let state = lock(&self.state)?;
        let mut counts = StatusCounts::default();
        for r in state.rows.values() {
            counts.add(r.status, 1);
        }
        Ok(counts)
    }

    async fn requeue_dead(&self, event_id: EventId) -> Result<OutboxRecord, OutboxError> {
        let mut state = lock(&self.state)?;
        let row = state
            .find_event_mut(event_id)
            .ok_or(OutboxError::NotFound(event_id))?;
        if row.status != OutboxStatus::Dead {
            return Err(OutboxError::InvalidTransition {
                event_id,
                from: row.status,
                to: OutboxStatus::Ready,
            });
        }
        row.requeue();
        Ok(row.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mrp_events::EventEnvelope;
    use serde_json::json;

    fn new_record(aggregate_id: &str, version: i64) -> NewOutboxRecord {
        let env = EventEnvelope::new(
            EventId::new(),
            "PartUpdated",
            version,
            Utc::now(),
            json!({"partId": 1}),
        );
        NewOutboxRecord::from_envelope(aggregate_id, &env).unwrap()
    }

    async fn seed(store: &InMemoryOutboxStore, n: usize) {
        let mut tx = store.begin();
        for i in 0..n {
            tx.insert(new_record(&i.to_string(), 1)).await.unwrap();
        }
        tx.commit().unwrap();
    }

    #[tokio::test]
    async fn rolled_back_inserts_leave_no_rows() {
        let store = InMemoryOutboxStore::new();
        let mut tx = store.begin();
        tx.insert(new_record("42", 1)).await.unwrap();
        tx.rollback();
        assert!(store.all().unwrap().is_empty());

        let mut tx = store.begin();
        tx.insert(new_record("42", 1)).await.unwrap();
        drop(tx);
        assert!(store.all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_event_ids_are_rejected() {
        let store = InMemoryOutboxStore::new();
        let rec = new_record("42", 1);
        let mut tx = store.begin();
        tx.insert(rec.clone()).await.unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin();
        let err = tx.insert(rec).await.unwrap_err();
        assert!(matches!(err, OutboxError::DuplicateEvent(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_claims_are_disjoint() {
        let store = InMemoryOutboxStore::new();
        seed(&store, 150).await;
        let now = Utc::now();

        let a = store.claim_due(100, 10, now).await.unwrap();
        let other = store.clone();
        let b = tokio::spawn(async move { other.claim_due(100, 10, now).await.unwrap() })
            .await
            .unwrap();
        assert_eq!(a.records().len(), 100);
        assert_eq!(b.records().len(), 50);

        let ids_a: HashSet<_> = a.records().iter().map(|r| r.id).collect();
        let ids_b: HashSet<_> = b.records().iter().map(|r| r.id).collect();
        assert!(ids_a.is_disjoint(&ids_b));

        a.commit().await.unwrap();
        b.commit().await.unwrap();
        assert_eq!(store.claim_due(200, 10, now).await.unwrap().records().len(), 150);
    }

    #[tokio::test]
    async fn dropped_claim_releases_rows_without_outcomes() {
        let store = InMemoryOutboxStore::new();
        seed(&store, 3).await;
        let now = Utc::now();

        let mut claim = store.claim_due(10, 10, now).await.unwrap();
        let id = claim.records()[0].id;
        claim
            .record_outcome(id, &DeliveryOutcome::Published { at: now })
            .await
            .unwrap();
        drop(claim);

        assert_eq!(store.get(id).unwrap().unwrap().status, OutboxStatus::Ready);
        assert_eq!(store.claim_due(10, 10, now).await.unwrap().records().len(), 3);
    }

    #[tokio::test]
    async fn committed_outcomes_are_applied() {
        let store = InMemoryOutboxStore::new();
        seed(&store, 2).await;
        let now = Utc::now();

        let mut claim = store.claim_due(10, 10, now).await.unwrap();
        let ids: Vec<_> = claim.records().iter().map(|r| r.id).collect();
        claim
            .record_outcome(ids[0], &DeliveryOutcome::Published { at: now })
            .await
            .unwrap();
        claim
            .record_outcome(
                ids[1],
                &DeliveryOutcome::Dead {
                    retry_count: 10,
                    error: "gone".into(),
                    tried_at: now,
                },
            )
            .await
            .unwrap();
        claim.commit().await.unwrap();

        let counts = store.status_counts().await.unwrap();
        assert_eq!(counts.published, 1);
        assert_eq!(counts.dead, 1);
        assert!(store.claim_due(10, 10, now).await.unwrap().records().is_empty());
    }

    #[tokio::test]
    async fn requeue_only_accepts_dead_rows() {
        let store = InMemoryOutboxStore::new();
        seed(&store, 1).await;
        let row = store.all().unwrap().remove(0);

        let err = store.requeue_dead(row.event_id).await.unwrap_err();
        assert!(matches!(
            err,
            OutboxError::InvalidTransition {
                from: OutboxStatus::Ready,
                ..
            }
        ));
        assert!(matches!(
            store.requeue_dead(EventId::new()).await.unwrap_err(),
            OutboxError::NotFound(_)
        ));

        store
            .update_with(row.id, |r| {
                r.apply(&DeliveryOutcome::Dead {
                    retry_count: 10,
                    error: "x".into(),
                    tried_at: Utc::now(),
                })
            })
            .unwrap();
        let requeued = store.requeue_dead(row.event_id).await.unwrap();
        assert_eq!(requeued.status, OutboxStatus::Ready);
        assert_eq!(requeued.retry_count, 0);
        assert!(requeued.last_error.is_none());
    }

    #[tokio::test]
    async fn aggregate_locks_are_forgotten_once_released() {
        let store = InMemoryOutboxStore::new();
        let lock_count = |s: &InMemoryOutboxStore| s.state.lock().unwrap().aggregate_locks.len();

        for i in 0..20 {
            let mut tx = store.begin();
            tx.lock_aggregate(&i.to_string()).await.unwrap();
            tx.insert(new_record(&i.to_string(), 1)).await.unwrap();
            if i % 2 == 0 {
                tx.commit().unwrap();
            } else {
                tx.rollback();
            }
        }
        assert_eq!(lock_count(&store), 0);

        let mut held = store.begin();
        held.lock_aggregate("7").await.unwrap();
        let other = store.clone();
        let waiter = tokio::spawn(async move {
            let mut tx = other.begin();
            tx.lock_aggregate("7").await.unwrap();
            tx.commit().unwrap();
        });
        tokio::task::yield_now().await;
        assert_eq!(lock_count(&store), 1);

        held.commit().unwrap();
        waiter.await.unwrap();
        assert_eq!(lock_count(&store), 0);
    }

    #[tokio::test]
    async fn last_version_sees_committed_and_own_pending_rows() {
        let store = InMemoryOutboxStore::new();
        let mut tx = store.begin();
        tx.insert(new_record("7", 1)).await.unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin();
        assert_eq!(tx.last_version("7").await.unwrap(), Some(1));
        tx.insert(new_record("7", 2)).await.unwrap();
        assert_eq!(tx.last_version("7").await.unwrap(), Some(2));
        assert_eq!(tx.last_version("8").await.unwrap(), None);
    }
}
