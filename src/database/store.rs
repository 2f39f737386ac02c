use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, Ordering},
        PoisonError, RwLock
    }
};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use itertools::Itertools;

use crate::{
    database::db_structs::{MatchOutcome, RatedEntity},
    error::StoreError,
    model::{period::ParticipantKey, structures::entity_class::EntityClass}
};

/// Narrow persistence contract for rated entities. `store` must be atomic
/// per entity and reject stale writes via the entity's `version` stamp.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn load(&self, class: EntityClass, id: i32) -> Result<RatedEntity, StoreError>;

    async fn store(&self, entity: &RatedEntity) -> Result<(), StoreError>;

    /// Every entity of the class eligible for rating; banned entities are
    /// excluded here, not by callers.
    async fn list_eligible(&self, class: EntityClass) -> Result<Vec<RatedEntity>, StoreError>;
}

/// Narrow persistence contract for match outcomes.
#[async_trait]
pub trait OutcomeStore: Send + Sync {
    async fn list_unprocessed(
        &self,
        before: DateTime<FixedOffset>
    ) -> Result<Vec<MatchOutcome>, StoreError>;

    async fn mark_processed(&self, id: i64) -> Result<(), StoreError>;
}

/// In-memory implementation of both stores. Reference semantics for the
/// contract and the backing store for tests; conflicts can be injected to
/// exercise the optimistic-retry path.
#[derive(Default)]
pub struct InMemoryStore {
    entities: RwLock<HashMap<ParticipantKey, RatedEntity>>,
    outcomes: RwLock<HashMap<i64, MatchOutcome>>,
    pending_conflicts: AtomicU32
}

impl InMemoryStore {
    pub fn new() -> InMemoryStore {
        InMemoryStore::default()
    }

    pub fn seed_entity(&self, entity: RatedEntity) {
        self.entities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity.key(), entity);
    }

    pub fn seed_outcome(&self, outcome: MatchOutcome) {
        self.outcomes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(outcome.id, outcome);
    }

    pub fn entity(&self, class: EntityClass, id: i32) -> Option<RatedEntity> {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(class, id))
            .cloned()
    }

    pub fn outcome(&self, id: i64) -> Option<MatchOutcome> {
        self.outcomes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Makes the next `n` entity stores fail with a write conflict.
    pub fn inject_conflicts(&self, n: u32) {
        self.pending_conflicts.store(n, Ordering::SeqCst);
    }

    fn take_pending_conflict(&self) -> bool {
        self.pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl EntityStore for InMemoryStore {
    async fn load(&self, class: EntityClass, id: i32) -> Result<RatedEntity, StoreError> {
        self.entity(class, id).ok_or(StoreError::NotFound)
    }

    async fn store(&self, entity: &RatedEntity) -> Result<(), StoreError> {
        if self.take_pending_conflict() {
            return Err(StoreError::Conflict);
        }

        let mut entities = self.entities.write().unwrap_or_else(PoisonError::into_inner);
        match entities.get_mut(&entity.key()) {
            Some(existing) => {
                if existing.version != entity.version {
                    return Err(StoreError::Conflict);
                }
                *existing = RatedEntity {
                    version: entity.version + 1,
                    ..entity.clone()
                };
            }
            None => {
                entities.insert(entity.key(), entity.clone());
            }
        }

        Ok(())
    }

    async fn list_eligible(&self, class: EntityClass) -> Result<Vec<RatedEntity>, StoreError> {
        Ok(self
            .entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|entity| entity.class == class && !entity.banned)
            .cloned()
            .sorted_by_key(|entity| entity.id)
            .collect_vec())
    }
}

#[async_trait]
impl OutcomeStore for InMemoryStore {
    async fn list_unprocessed(
        &self,
        before: DateTime<FixedOffset>
    ) -> Result<Vec<MatchOutcome>, StoreError> {
        Ok(self
            .outcomes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|outcome| !outcome.processed && outcome.timestamp <= before)
            .cloned()
            .sorted_by_key(|outcome| outcome.id)
            .collect_vec())
    }

    async fn mark_processed(&self, id: i64) -> Result<(), StoreError> {
        let mut outcomes = self.outcomes.write().unwrap_or_else(PoisonError::into_inner);
        match outcomes.get_mut(&id) {
            Some(outcome) => {
                outcome.processed = true;
                Ok(())
            }
            None => Err(StoreError::NotFound)
        }
    }
}
