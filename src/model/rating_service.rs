use std::{collections::HashMap, sync::Arc, time::Instant};

use chrono::Utc;
use strum::IntoEnumIterator;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    database::{
        db_structs::{
            MatchOutcome, OutcomeApplication, RankInfo, RatedEntity, RecomputeSummary, UpdatedTriples
        },
        store::{EntityStore, OutcomeStore}
    },
    error::{RatingError, StoreError},
    model::{
        constants::{
            DEFAULT_RANKED_DEVIATION_THRESHOLD, DEFAULT_TAU, MAX_STORE_ATTEMPTS, UNRANKED_GRADE
        },
        leaderboard::Leaderboard,
        period::{ParticipantKey, Period},
        ranks,
        structures::{
            entity_class::EntityClass,
            match_result::{MatchResult, TimeoutResolution},
            rating::RatingTriple
        }
    },
    utils::progress_utils::progress_bar
};

/// Process-lifetime tuning for the rating core.
#[derive(Debug, Clone, Copy)]
pub struct RatingConfig {
    /// Volatility-change constraint; identical for every participant within
    /// one period.
    pub tau: f64,
    /// Entities at or below this deviation are ranked.
    pub ranked_deviation_threshold: f64,
    pub timeout_resolution: TimeoutResolution
}

impl Default for RatingConfig {
    fn default() -> Self {
        RatingConfig {
            tau: DEFAULT_TAU,
            ranked_deviation_threshold: DEFAULT_RANKED_DEVIATION_THRESHOLD,
            timeout_resolution: TimeoutResolution::SubjectLoses
        }
    }
}

/// Orchestrates rating updates: single-outcome increments, the periodic
/// full-population recompute, and the leaderboard membership transitions
/// that follow both. The leaderboard is mutated here and nowhere else.
pub struct RatingService<E, O> {
    entities: Arc<E>,
    outcomes: Arc<O>,
    leaderboard: Arc<Leaderboard>,
    config: RatingConfig,
    entity_locks: Mutex<HashMap<ParticipantKey, Arc<Mutex<()>>>>,
    recompute_guard: Mutex<()>
}

impl<E: EntityStore, O: OutcomeStore> RatingService<E, O> {
    pub fn new(entities: Arc<E>, outcomes: Arc<O>, config: RatingConfig) -> RatingService<E, O> {
        RatingService {
            entities,
            outcomes,
            leaderboard: Arc::new(Leaderboard::new()),
            config,
            entity_locks: Mutex::new(HashMap::new()),
            recompute_guard: Mutex::new(())
        }
    }

    pub fn leaderboard(&self) -> Arc<Leaderboard> {
        self.leaderboard.clone()
    }

    /// Applies one recorded outcome: load both participants, compute the
    /// period posteriors, persist, flag the outcome processed and update
    /// leaderboard membership. A processed outcome is a no-op.
    pub async fn apply_match_outcome(
        &self,
        outcome: &MatchOutcome
    ) -> Result<OutcomeApplication, RatingError> {
        if outcome.processed {
            return Ok(OutcomeApplication::AlreadyProcessed);
        }

        let subject_key = outcome.subject_key();
        let counterpart_key = outcome.counterpart_key();
        let result = outcome.result.resolve(self.config.timeout_resolution);

        // Deterministic acquisition order so two updates touching the same
        // pair cannot deadlock.
        let mut keys = [subject_key, counterpart_key];
        keys.sort();
        let _first_guard = self.entity_lock(keys[0]).await.lock_owned().await;
        let _second_guard = if keys[0] != keys[1] {
            Some(self.entity_lock(keys[1]).await.lock_owned().await)
        } else {
            None
        };

        let mut attempts = 0;
        let (subject, counterpart) = loop {
            attempts += 1;

            let mut subject = self.load_entity(subject_key).await?;
            let mut counterpart = self.load_entity(counterpart_key).await?;
            let subject_prior = subject.triple();
            let counterpart_prior = counterpart.triple();

            let mut period = Period::new(self.config.tau);
            period.add_participant(subject_key, subject_prior);
            period.add_participant(counterpart_key, counterpart_prior);
            period.add_outcome(subject_key, counterpart_key, result)?;
            let posteriors = period.calculate()?;

            subject.apply_triple(&posteriors[&subject_key]);
            counterpart.apply_triple(&posteriors[&counterpart_key]);
            subject.matches_played += 1;
            counterpart.matches_played += 1;
            match result {
                MatchResult::Win => subject.wins += 1,
                MatchResult::Loss => counterpart.wins += 1
            }

            match self.store_pair(&subject, &counterpart).await {
                Ok(()) => {
                    log_transition(&subject, &subject_prior);
                    log_transition(&counterpart, &counterpart_prior);
                    break (subject, counterpart);
                }
                Err(StoreError::Conflict) if attempts < MAX_STORE_ATTEMPTS => {
                    warn!(
                        "Conflicting write while applying outcome {}, retrying (attempt {})",
                        outcome.id, attempts
                    );
                    continue;
                }
                Err(StoreError::Conflict) => {
                    return Err(RatingError::Conflict {
                        outcome_id: outcome.id,
                        attempts
                    })
                }
                Err(e) => return Err(RatingError::Store(e.to_string()))
            }
        };

        self.outcomes
            .mark_processed(outcome.id)
            .await
            .map_err(|e| RatingError::Store(e.to_string()))?;

        self.apply_leaderboard_transition(&subject);
        self.apply_leaderboard_transition(&counterpart);

        Ok(OutcomeApplication::Applied(UpdatedTriples { subject, counterpart }))
    }

    /// Recomputes the entire eligible population as one period. Entities
    /// with no outcomes still receive the no-match deviation growth update,
    /// and every class leaderboard is rebuilt wholesale afterwards.
    ///
    /// Concurrent recomputes serialize on an internal guard. Single-outcome
    /// updates are not blocked; one landing mid-recompute is best-effort and
    /// converges at the next rebuild.
    pub async fn run_periodic_recompute(&self) -> Result<RecomputeSummary, RatingError> {
        let _guard = self.recompute_guard.lock().await;
        let started = Instant::now();

        // One snapshot is the prior state for every participant; outcomes
        // never observe another outcome's posterior within the period.
        let mut snapshot: HashMap<ParticipantKey, RatedEntity> = HashMap::new();
        let mut period = Period::new(self.config.tau);
        for class in EntityClass::iter() {
            for entity in self.list_eligible(class).await? {
                period.add_participant(entity.key(), entity.triple());
                snapshot.insert(entity.key(), entity);
            }
        }

        let pending = self
            .outcomes
            .list_unprocessed(Utc::now().fixed_offset())
            .await
            .map_err(|e| RatingError::Store(e.to_string()))?;

        let mut attached = Vec::new();
        for outcome in pending {
            let subject_key = outcome.subject_key();
            let counterpart_key = outcome.counterpart_key();
            if !snapshot.contains_key(&subject_key) || !snapshot.contains_key(&counterpart_key) {
                // Ineligible participant; leave the outcome for a later pass
                warn!(
                    "Skipping outcome {}: participant missing from the eligible snapshot",
                    outcome.id
                );
                continue;
            }

            let result = outcome.result.resolve(self.config.timeout_resolution);
            period.add_outcome(subject_key, counterpart_key, result)?;

            if let Some(subject) = snapshot.get_mut(&subject_key) {
                subject.matches_played += 1;
                if result == MatchResult::Win {
                    subject.wins += 1;
                }
            }
            if let Some(counterpart) = snapshot.get_mut(&counterpart_key) {
                counterpart.matches_played += 1;
                if result == MatchResult::Loss {
                    counterpart.wins += 1;
                }
            }
            attached.push(outcome.id);
        }

        info!(
            "Recomputing {} entities with {} attached outcomes",
            period.participant_count(),
            attached.len()
        );
        let posteriors = period.calculate()?;

        let bar = progress_bar(snapshot.len() as u64, "Persisting posterior ratings".to_string());
        let mut entities_updated = 0;
        for (key, entity) in snapshot.iter_mut() {
            entity.apply_triple(&posteriors[key]);
            self.entities
                .store(entity)
                .await
                .map_err(|e| RatingError::Store(e.to_string()))?;
            entities_updated += 1;
            bar.inc(1);
        }
        bar.finish();

        for id in &attached {
            self.outcomes
                .mark_processed(*id)
                .await
                .map_err(|e| RatingError::Store(e.to_string()))?;
        }

        // Population-scale refresh: a wholesale rebuild beats per-entity
        // diffing here.
        for class in EntityClass::iter() {
            let entries = snapshot
                .values()
                .filter(|e| e.class == class && e.is_ranked(self.config.ranked_deviation_threshold))
                .map(|e| (e.id, e.rating))
                .collect();
            self.leaderboard.clear_and_rebuild(class, entries);
        }

        let summary = RecomputeSummary {
            entities_updated,
            outcomes_processed: attached.len(),
            duration_ms: started.elapsed().as_millis() as u64
        };
        info!(
            "Periodic recompute finished: {} entities, {} outcomes in {}ms",
            summary.entities_updated, summary.outcomes_processed, summary.duration_ms
        );

        Ok(summary)
    }

    /// Rank, percentile and letter grade for one entity, or the unranked
    /// grade when it fails the deviation gate.
    pub async fn get_rank_info(&self, class: EntityClass, id: i32) -> Result<RankInfo, RatingError> {
        let entity = self.load_entity((class, id)).await?;
        if !entity.is_ranked(self.config.ranked_deviation_threshold) {
            return Ok(RankInfo {
                rank: None,
                percentile: None,
                grade: UNRANKED_GRADE
            });
        }

        let rank = match self.leaderboard.rank_of(class, id) {
            Some(rank) => rank,
            None => {
                // Missed transition; heal the index and look up once more
                warn!("{:?} #{} ranked but absent from leaderboard, reinserting", class, id);
                self.leaderboard.upsert(class, id, entity.rating);
                self.leaderboard
                    .rank_of(class, id)
                    .ok_or_else(|| RatingError::Store("leaderboard self-heal failed".to_string()))?
            }
        };

        let percentile = rank as f64 / self.leaderboard.cardinality(class) as f64;

        Ok(RankInfo {
            rank: Some(rank + 1),
            percentile: Some(percentile),
            grade: ranks::classify(percentile)
        })
    }

    /// Reseeds one class leaderboard from the ranked subset of persisted
    /// entities. Run at startup and whenever the index is suspect.
    pub async fn rebuild_leaderboard(&self, class: EntityClass) -> Result<(), RatingError> {
        let entries = self
            .list_eligible(class)
            .await?
            .into_iter()
            .filter(|e| e.is_ranked(self.config.ranked_deviation_threshold))
            .map(|e| (e.id, e.rating))
            .collect();
        self.leaderboard.clear_and_rebuild(class, entries);

        Ok(())
    }

    fn apply_leaderboard_transition(&self, entity: &RatedEntity) {
        if entity.is_ranked(self.config.ranked_deviation_threshold) {
            self.leaderboard.upsert(entity.class, entity.id, entity.rating);
        } else {
            self.leaderboard.remove(entity.class, entity.id);
        }
    }

    async fn entity_lock(&self, key: ParticipantKey) -> Arc<Mutex<()>> {
        self.entity_locks.lock().await.entry(key).or_default().clone()
    }

    async fn load_entity(&self, key: ParticipantKey) -> Result<RatedEntity, RatingError> {
        self.entities.load(key.0, key.1).await.map_err(|e| match e {
            StoreError::NotFound => RatingError::EntityNotFound {
                class: key.0,
                id: key.1
            },
            other => RatingError::Store(other.to_string())
        })
    }

    async fn list_eligible(&self, class: EntityClass) -> Result<Vec<RatedEntity>, RatingError> {
        self.entities
            .list_eligible(class)
            .await
            .map_err(|e| RatingError::Store(e.to_string()))
    }

    async fn store_pair(
        &self,
        subject: &RatedEntity,
        counterpart: &RatedEntity
    ) -> Result<(), StoreError> {
        self.entities.store(subject).await?;
        self.entities.store(counterpart).await
    }
}

fn log_transition(entity: &RatedEntity, prior: &RatingTriple) {
    info!(
        "{:?} #{} | Rating {:.0} -> {:.0} | RD {:.0} -> {:.0} | Sigma {:.4} -> {:.4}",
        entity.class,
        entity.id,
        prior.rating,
        entity.rating,
        prior.deviation,
        entity.deviation,
        prior.volatility,
        entity.volatility
    );
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use approx::assert_abs_diff_eq;

    use super::{RatingConfig, RatingService};
    use crate::{
        database::{db_structs::OutcomeApplication, store::InMemoryStore},
        error::RatingError,
        model::structures::{
            entity_class::EntityClass::{Map, User},
            match_result::{RecordedResult, TimeoutResolution}
        },
        utils::test_utils::{generate_entity, generate_outcome}
    };

    fn service(store: Arc<InMemoryStore>) -> RatingService<InMemoryStore, InMemoryStore> {
        RatingService::new(store.clone(), store, RatingConfig::default())
    }

    #[tokio::test]
    async fn test_apply_win_moves_ratings_and_counters() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_entity(generate_entity(1, User, 1500.0, 80.0, 0.06));
        store.seed_entity(generate_entity(2, Map, 1500.0, 80.0, 0.06));
        let outcome = generate_outcome(1, 1, 2, RecordedResult::Win);
        store.seed_outcome(outcome.clone());

        let service = service(store.clone());
        service.apply_match_outcome(&outcome).await.unwrap();

        let user = store.entity(User, 1).unwrap();
        let map = store.entity(Map, 2).unwrap();

        assert!(user.rating > 1500.0);
        assert!(map.rating < 1500.0);
        assert_eq!(user.matches_played, 1);
        assert_eq!(map.matches_played, 1);
        assert_eq!(user.wins, 1);
        assert_eq!(map.wins, 0);
        assert!(store.outcome(1).unwrap().processed);
    }

    #[tokio::test]
    async fn test_apply_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_entity(generate_entity(1, User, 1500.0, 80.0, 0.06));
        store.seed_entity(generate_entity(2, Map, 1500.0, 80.0, 0.06));
        let outcome = generate_outcome(1, 1, 2, RecordedResult::Win);
        store.seed_outcome(outcome.clone());

        let service = service(store.clone());
        service.apply_match_outcome(&outcome).await.unwrap();
        let after_first = store.entity(User, 1).unwrap();

        let processed = store.outcome(1).unwrap();
        let second = service.apply_match_outcome(&processed).await.unwrap();

        assert!(matches!(second, OutcomeApplication::AlreadyProcessed));
        assert_eq!(store.entity(User, 1).unwrap(), after_first);
    }

    #[tokio::test]
    async fn test_missing_entity_aborts() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_entity(generate_entity(1, User, 1500.0, 80.0, 0.06));
        let outcome = generate_outcome(1, 1, 2, RecordedResult::Win);
        store.seed_outcome(outcome.clone());

        let service = service(store.clone());
        let err = service.apply_match_outcome(&outcome).await.unwrap_err();

        assert!(matches!(err, RatingError::EntityNotFound { class: Map, id: 2 }));
        assert!(!store.outcome(1).unwrap().processed);
        assert_eq!(store.entity(User, 1).unwrap().matches_played, 0);
    }

    #[tokio::test]
    async fn test_timeout_goes_to_configured_side() {
        for (policy, expect_user_win) in [
            (TimeoutResolution::SubjectLoses, false),
            (TimeoutResolution::CounterpartLoses, true),
        ] {
            let store = Arc::new(InMemoryStore::new());
            store.seed_entity(generate_entity(1, User, 1500.0, 80.0, 0.06));
            store.seed_entity(generate_entity(2, Map, 1500.0, 80.0, 0.06));
            let outcome = generate_outcome(1, 1, 2, RecordedResult::Timeout);
            store.seed_outcome(outcome.clone());

            let config = RatingConfig {
                timeout_resolution: policy,
                ..RatingConfig::default()
            };
            let service = RatingService::new(store.clone(), store.clone(), config);
            service.apply_match_outcome(&outcome).await.unwrap();

            let user = store.entity(User, 1).unwrap();
            let map = store.entity(Map, 2).unwrap();
            if expect_user_win {
                assert!(user.rating > 1500.0);
                assert_eq!(user.wins, 1);
                assert_eq!(map.wins, 0);
            } else {
                assert!(user.rating < 1500.0);
                assert_eq!(user.wins, 0);
                assert_eq!(map.wins, 1);
            }
        }
    }

    #[tokio::test]
    async fn test_conflict_retries_then_succeeds() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_entity(generate_entity(1, User, 1500.0, 80.0, 0.06));
        store.seed_entity(generate_entity(2, Map, 1500.0, 80.0, 0.06));
        let outcome = generate_outcome(1, 1, 2, RecordedResult::Win);
        store.seed_outcome(outcome.clone());
        store.inject_conflicts(1);

        let service = service(store.clone());
        service.apply_match_outcome(&outcome).await.unwrap();

        assert!(store.entity(User, 1).unwrap().rating > 1500.0);
        assert!(store.outcome(1).unwrap().processed);
    }

    #[tokio::test]
    async fn test_conflicts_exhaust_retries() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_entity(generate_entity(1, User, 1500.0, 80.0, 0.06));
        store.seed_entity(generate_entity(2, Map, 1500.0, 80.0, 0.06));
        let outcome = generate_outcome(1, 1, 2, RecordedResult::Win);
        store.seed_outcome(outcome.clone());
        store.inject_conflicts(10);

        let service = service(store.clone());
        let err = service.apply_match_outcome(&outcome).await.unwrap_err();

        assert!(matches!(err, RatingError::Conflict { outcome_id: 1, .. }));
        assert!(!store.outcome(1).unwrap().processed);
    }

    #[tokio::test]
    async fn test_crossing_ranked_threshold_joins_leaderboard() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_entity(generate_entity(1, User, 1500.0, 101.0, 0.06));
        store.seed_entity(generate_entity(2, Map, 1500.0, 30.0, 0.06));
        let outcome = generate_outcome(1, 1, 2, RecordedResult::Win);
        store.seed_outcome(outcome.clone());

        let service = service(store.clone());
        assert_eq!(service.leaderboard().rank_of(User, 1), None);

        service.apply_match_outcome(&outcome).await.unwrap();

        let user = store.entity(User, 1).unwrap();
        assert!(user.deviation <= 100.0);
        assert_eq!(service.leaderboard().rank_of(User, 1), Some(0));
    }

    #[tokio::test]
    async fn test_recompute_no_match_growth() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_entity(generate_entity(1, User, 1500.0, 60.0, 0.06));
        store.seed_entity(generate_entity(2, User, 1500.0, 350.0, 0.06));

        let service = service(store.clone());
        let summary = service.run_periodic_recompute().await.unwrap();

        assert_eq!(summary.entities_updated, 2);
        assert_eq!(summary.outcomes_processed, 0);

        let idle = store.entity(User, 1).unwrap();
        assert_eq!(idle.rating, 1500.0);
        assert_eq!(idle.volatility, 0.06);
        assert!(idle.deviation > 60.0);

        let unrated = store.entity(User, 2).unwrap();
        assert_abs_diff_eq!(unrated.deviation, 350.0, epsilon = 1e-6);
    }

    #[tokio::test]
    async fn test_recompute_crossing_above_threshold_leaves_leaderboard() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_entity(generate_entity(1, User, 1500.0, 99.0, 0.3));

        let service = service(store.clone());
        service.rebuild_leaderboard(User).await.unwrap();
        assert_eq!(service.leaderboard().rank_of(User, 1), Some(0));

        service.run_periodic_recompute().await.unwrap();

        assert!(store.entity(User, 1).unwrap().deviation > 100.0);
        assert_eq!(service.leaderboard().rank_of(User, 1), None);
    }

    #[tokio::test]
    async fn test_recompute_processes_pending_outcomes() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_entity(generate_entity(1, User, 1500.0, 80.0, 0.06));
        store.seed_entity(generate_entity(2, Map, 1500.0, 80.0, 0.06));
        store.seed_outcome(generate_outcome(1, 1, 2, RecordedResult::Win));

        let service = service(store.clone());
        let summary = service.run_periodic_recompute().await.unwrap();

        assert_eq!(summary.outcomes_processed, 1);
        assert!(store.outcome(1).unwrap().processed);
        assert!(store.entity(User, 1).unwrap().rating > 1500.0);
        assert_eq!(store.entity(User, 1).unwrap().wins, 1);
    }

    #[tokio::test]
    async fn test_recompute_skips_outcomes_with_banned_participant() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_entity(generate_entity(1, User, 1500.0, 80.0, 0.06));
        let mut banned = generate_entity(2, Map, 1500.0, 80.0, 0.06);
        banned.banned = true;
        store.seed_entity(banned);
        store.seed_outcome(generate_outcome(1, 1, 2, RecordedResult::Win));

        let service = service(store.clone());
        let summary = service.run_periodic_recompute().await.unwrap();

        assert_eq!(summary.outcomes_processed, 0);
        assert!(!store.outcome(1).unwrap().processed);
        assert_eq!(service.leaderboard().rank_of(Map, 2), None);
    }

    #[tokio::test]
    async fn test_rank_info_for_three_users() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_entity(generate_entity(1, User, 2000.0, 50.0, 0.06));
        store.seed_entity(generate_entity(2, User, 1800.0, 50.0, 0.06));
        store.seed_entity(generate_entity(3, User, 1500.0, 50.0, 0.06));

        let service = service(store.clone());
        service.rebuild_leaderboard(User).await.unwrap();

        let best = service.get_rank_info(User, 1).await.unwrap();
        let middle = service.get_rank_info(User, 2).await.unwrap();
        let worst = service.get_rank_info(User, 3).await.unwrap();

        assert_eq!(best.rank, Some(1));
        assert_eq!(middle.rank, Some(2));
        assert_eq!(worst.rank, Some(3));
        assert_abs_diff_eq!(middle.percentile.unwrap(), 1.0 / 3.0, epsilon = 1e-9);
        assert_eq!(best.grade, "x");
        assert_eq!(middle.grade, "a+");
        assert_eq!(worst.grade, "b");
    }

    #[tokio::test]
    async fn test_rank_info_unranked() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_entity(generate_entity(1, User, 1500.0, 250.0, 0.06));

        let service = service(store.clone());
        let info = service.get_rank_info(User, 1).await.unwrap();

        assert_eq!(info.rank, None);
        assert_eq!(info.percentile, None);
        assert_eq!(info.grade, "z");
    }

    #[tokio::test]
    async fn test_rank_info_heals_missing_entry() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_entity(generate_entity(1, User, 2000.0, 50.0, 0.06));
        store.seed_entity(generate_entity(2, User, 1800.0, 50.0, 0.06));

        let service = service(store.clone());
        service.rebuild_leaderboard(User).await.unwrap();
        service.leaderboard().remove(User, 1);

        let healed = service.get_rank_info(User, 1).await.unwrap();

        assert_eq!(healed.rank, Some(1));
        assert_eq!(service.leaderboard().rank_of(User, 1), Some(0));
    }
}
