use serde_repr::{Deserialize_repr, Serialize_repr};
use std::convert::TryFrom;

/// Result of a completed contest as recorded, relative to the subject entity.
/// A timed-out match carries no winner of its own; it is resolved to a
/// concrete win or loss by the configured [`TimeoutResolution`].
#[derive(Deserialize_repr, Serialize_repr, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordedResult {
    Win = 0,
    Loss = 1,
    Timeout = 2
}

impl TryFrom<i32> for RecordedResult {
    type Error = ();

    fn try_from(v: i32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(RecordedResult::Win),
            1 => Ok(RecordedResult::Loss),
            2 => Ok(RecordedResult::Timeout),
            _ => Err(())
        }
    }
}

impl RecordedResult {
    pub fn resolve(self, policy: TimeoutResolution) -> MatchResult {
        match self {
            RecordedResult::Win => MatchResult::Win,
            RecordedResult::Loss => MatchResult::Loss,
            RecordedResult::Timeout => match policy {
                TimeoutResolution::SubjectLoses => MatchResult::Loss,
                TimeoutResolution::CounterpartLoses => MatchResult::Win
            }
        }
    }
}

/// A resolved outcome as fed into the rating math, relative to the subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchResult {
    Win,
    Loss
}

impl MatchResult {
    pub fn score(self) -> f64 {
        match self {
            MatchResult::Win => 1.0,
            MatchResult::Loss => 0.0
        }
    }

    pub fn opposite(self) -> MatchResult {
        match self {
            MatchResult::Win => MatchResult::Loss,
            MatchResult::Loss => MatchResult::Win
        }
    }
}

/// Which side of a timed-out match takes the loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutResolution {
    SubjectLoses,
    CounterpartLoses
}
