use crate::model::constants::UNRANKED_GRADE;

/// Letter grades by percentile upper bound, best grade first. The first row
/// whose bound covers the percentile wins.
const GRADE_TABLE: [(&str, f64); 17] = [
    ("x", 0.01),
    ("u", 0.05),
    ("ss", 0.11),
    ("s+", 0.17),
    ("s", 0.23),
    ("s-", 0.30),
    ("a+", 0.38),
    ("a", 0.46),
    ("a-", 0.54),
    ("b+", 0.62),
    ("b", 0.70),
    ("b-", 0.78),
    ("c+", 0.84),
    ("c", 0.90),
    ("c-", 0.95),
    ("d+", 0.975),
    ("d", 1.0),
];

/// Maps a percentile in [0, 1] to a letter grade. Callers are expected to
/// have already gated on ranked status; see `RatingService::get_rank_info`.
pub fn classify(percentile: f64) -> &'static str {
    for (grade, upper_bound) in GRADE_TABLE {
        if percentile <= upper_bound {
            return grade;
        }
    }

    UNRANKED_GRADE
}
