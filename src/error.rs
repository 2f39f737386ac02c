use thiserror::Error;

use crate::model::{period::PeriodError, structures::entity_class::EntityClass};

/// Failures surfaced by the persistence collaborators.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("entity not found")]
    NotFound,

    #[error("concurrent write detected")]
    Conflict,

    #[error("store backend failure: {0}")]
    Backend(String)
}

/// Failures surfaced by the rating core. An already-processed outcome is
/// not represented here; it is a no-op success.
#[derive(Debug, Error)]
pub enum RatingError {
    #[error("entity {class:?} #{id} does not exist")]
    EntityNotFound { class: EntityClass, id: i32 },

    #[error("outcome {outcome_id} hit conflicting writes after {attempts} attempts")]
    Conflict { outcome_id: i64, attempts: u32 },

    #[error(transparent)]
    Period(#[from] PeriodError),

    #[error("store failure: {0}")]
    Store(String)
}
