use serde::{Deserialize, Serialize};

use crate::model::constants::{INITIAL_DEVIATION, INITIAL_RATING, INITIAL_VOLATILITY};

/// The three numbers describing an entity's current skill estimate:
/// its rating, the deviation (uncertainty) of that rating, and the
/// volatility (expected fluctuation of the underlying skill).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingTriple {
    pub rating: f64,
    pub deviation: f64,
    pub volatility: f64
}

impl RatingTriple {
    pub fn initial() -> RatingTriple {
        RatingTriple {
            rating: INITIAL_RATING,
            deviation: INITIAL_DEVIATION,
            volatility: INITIAL_VOLATILITY
        }
    }
}

impl Default for RatingTriple {
    fn default() -> Self {
        Self::initial()
    }
}
