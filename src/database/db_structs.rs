use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::model::{
    period::ParticipantKey,
    structures::{entity_class::EntityClass, match_result::RecordedResult, rating::RatingTriple}
};

/// A participant in the ranking system. The rating triple is mutated only
/// by the rating service after a period computation, never by request
/// handlers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RatedEntity {
    pub id: i32,
    pub class: EntityClass,
    pub rating: f64,
    pub deviation: f64,
    pub volatility: f64,
    pub matches_played: i32,
    pub wins: i32,
    pub banned: bool,
    /// Optimistic concurrency stamp, bumped by the entity store on write.
    pub version: i32
}

impl RatedEntity {
    pub fn new(id: i32, class: EntityClass) -> RatedEntity {
        let triple = RatingTriple::initial();
        RatedEntity {
            id,
            class,
            rating: triple.rating,
            deviation: triple.deviation,
            volatility: triple.volatility,
            matches_played: 0,
            wins: 0,
            banned: false,
            version: 1
        }
    }

    pub fn key(&self) -> ParticipantKey {
        (self.class, self.id)
    }

    pub fn triple(&self) -> RatingTriple {
        RatingTriple {
            rating: self.rating,
            deviation: self.deviation,
            volatility: self.volatility
        }
    }

    pub fn apply_triple(&mut self, triple: &RatingTriple) {
        self.rating = triple.rating;
        self.deviation = triple.deviation;
        self.volatility = triple.volatility;
    }

    pub fn is_ranked(&self, deviation_threshold: f64) -> bool {
        !self.banned && self.deviation <= deviation_threshold
    }
}

/// Immutable record of one completed contest. Carries both participants'
/// classes so outcome processing never needs a lookup join before
/// dispatch. Consumed at most once; `processed` is the idempotence guard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatchOutcome {
    pub id: i64,
    pub subject_id: i32,
    pub subject_class: EntityClass,
    pub counterpart_id: i32,
    pub counterpart_class: EntityClass,
    pub result: RecordedResult,
    pub processed: bool,
    pub timestamp: DateTime<FixedOffset>
}

impl MatchOutcome {
    pub fn subject_key(&self) -> ParticipantKey {
        (self.subject_class, self.subject_id)
    }

    pub fn counterpart_key(&self) -> ParticipantKey {
        (self.counterpart_class, self.counterpart_id)
    }
}

/// Ranking position of one entity within its class.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RankInfo {
    /// 1-based display rank; `None` when unranked.
    pub rank: Option<usize>,
    /// Fractional position within the ranked population; 0 is best.
    pub percentile: Option<f64>,
    pub grade: &'static str
}

/// Posterior state produced by a single-outcome update.
#[derive(Debug, Clone)]
pub struct UpdatedTriples {
    pub subject: RatedEntity,
    pub counterpart: RatedEntity
}

/// Result of `apply_match_outcome`. An already-consumed outcome reports
/// `AlreadyProcessed` rather than failing, to tolerate at-least-once
/// delivery of outcome events.
#[derive(Debug, Clone)]
pub enum OutcomeApplication {
    Applied(UpdatedTriples),
    AlreadyProcessed
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecomputeSummary {
    pub entities_updated: usize,
    pub outcomes_processed: usize,
    pub duration_ms: u64
}
