use std::collections::HashMap;

use rayon::prelude::*;
use thiserror::Error;

use crate::model::{
    glicko,
    structures::{entity_class::EntityClass, match_result::MatchResult, rating::RatingTriple}
};

pub type ParticipantKey = (EntityClass, i32);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeriodError {
    #[error("participant {0:?} #{1} was not added to the period")]
    PrecursorMissing(EntityClass, i32),
    #[error("period has already been calculated")]
    AlreadyCalculated
}

/// One discrete batch of outcomes, computed against a single snapshot of
/// prior ratings. Every outcome reads the snapshot taken at
/// `add_participant` time; a posterior never feeds another outcome within
/// the same period.
pub struct Period {
    tau: f64,
    priors: HashMap<ParticipantKey, RatingTriple>,
    outcomes: Vec<(ParticipantKey, ParticipantKey, MatchResult)>,
    calculated: bool
}

impl Period {
    pub fn new(tau: f64) -> Period {
        Period {
            tau,
            priors: HashMap::new(),
            outcomes: Vec::new(),
            calculated: false
        }
    }

    pub fn add_participant(&mut self, key: ParticipantKey, prior: RatingTriple) {
        self.priors.insert(key, prior);
    }

    pub fn participant_count(&self) -> usize {
        self.priors.len()
    }

    /// Records one outcome between two participants, relative to the
    /// subject. Both sides must already have been added.
    pub fn add_outcome(
        &mut self,
        subject: ParticipantKey,
        counterpart: ParticipantKey,
        result: MatchResult
    ) -> Result<(), PeriodError> {
        if !self.priors.contains_key(&subject) {
            return Err(PeriodError::PrecursorMissing(subject.0, subject.1));
        }
        if !self.priors.contains_key(&counterpart) {
            return Err(PeriodError::PrecursorMissing(counterpart.0, counterpart.1));
        }

        self.outcomes.push((subject, counterpart, result));
        Ok(())
    }

    /// Computes a posterior for every participant, including those with no
    /// outcomes this period (their deviation grows toward the unrated
    /// ceiling). Valid exactly once per instance; the outcomes must not be
    /// applied twice.
    pub fn calculate(&mut self) -> Result<HashMap<ParticipantKey, RatingTriple>, PeriodError> {
        if self.calculated {
            return Err(PeriodError::AlreadyCalculated);
        }
        self.calculated = true;

        let mut pairings: HashMap<ParticipantKey, Vec<(RatingTriple, MatchResult)>> =
            self.priors.keys().map(|key| (*key, Vec::new())).collect();

        for (subject, counterpart, result) in &self.outcomes {
            let subject_prior = self.priors[subject];
            let counterpart_prior = self.priors[counterpart];

            if let Some(opponents) = pairings.get_mut(subject) {
                opponents.push((counterpart_prior, *result));
            }
            if let Some(opponents) = pairings.get_mut(counterpart) {
                opponents.push((subject_prior, result.opposite()));
            }
        }

        let priors = &self.priors;
        let tau = self.tau;
        Ok(pairings
            .into_par_iter()
            .map(|(key, opponents)| (key, glicko::rate(&priors[&key], &opponents, tau)))
            .collect())
    }
}
