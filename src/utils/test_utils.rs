use chrono::Utc;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{
    database::db_structs::{MatchOutcome, RatedEntity},
    model::{
        constants::INITIAL_VOLATILITY,
        structures::{entity_class::EntityClass, match_result::RecordedResult}
    }
};

pub fn generate_entity(
    id: i32,
    class: EntityClass,
    rating: f64,
    deviation: f64,
    volatility: f64
) -> RatedEntity {
    RatedEntity {
        id,
        class,
        rating,
        deviation,
        volatility,
        matches_played: 0,
        wins: 0,
        banned: false,
        version: 1
    }
}

/// Outcome between a user subject and a map counterpart, unprocessed,
/// timestamped now.
pub fn generate_outcome(id: i64, subject_id: i32, counterpart_id: i32, result: RecordedResult) -> MatchOutcome {
    MatchOutcome {
        id,
        subject_id,
        subject_class: EntityClass::User,
        counterpart_id,
        counterpart_class: EntityClass::Map,
        result,
        processed: false,
        timestamp: Utc::now().fixed_offset()
    }
}

/// A ranked population with seeded randomness so leaderboard expectations
/// stay reproducible across runs.
pub fn generate_ranked_population(class: EntityClass, n: i32) -> Vec<RatedEntity> {
    let mut rng = ChaCha8Rng::seed_from_u64(42);

    (1..=n)
        .map(|id| {
            generate_entity(
                id,
                class,
                1500.0 + rng.random_range(-400.0..=400.0),
                rng.random_range(30.0..=99.0),
                INITIAL_VOLATILITY
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        constants::DEFAULT_RANKED_DEVIATION_THRESHOLD, structures::entity_class::EntityClass::User
    };

    #[test]
    fn test_generated_population_is_ranked() {
        let population = generate_ranked_population(User, 25);

        assert_eq!(population.len(), 25);
        assert!(population
            .iter()
            .all(|e| e.is_ranked(DEFAULT_RANKED_DEVIATION_THRESHOLD)));
    }

    #[test]
    fn test_generated_population_is_reproducible() {
        assert_eq!(
            generate_ranked_population(User, 10),
            generate_ranked_population(User, 10)
        );
    }
}
