// Model constants
pub const INITIAL_RATING: f64 = 1500.0;
pub const INITIAL_DEVIATION: f64 = 350.0;
pub const INITIAL_VOLATILITY: f64 = 0.06;
pub const GLICKO_SCALE: f64 = 173.7178;
pub const DEFAULT_TAU: f64 = 0.5;
// Volatility root-find tuning
pub const CONVERGENCE_TOLERANCE: f64 = 1e-6;
pub const MAX_VOLATILITY_ITERATIONS: u32 = 100;
// Degenerate opponent deviations are clamped to this before scaling
pub const MIN_OPPONENT_DEVIATION: f64 = 1e-6;
// Entities at or below this deviation are ranked
pub const DEFAULT_RANKED_DEVIATION_THRESHOLD: f64 = 100.0;
// Store conflicts retry the whole load-compute-persist cycle this many times
pub const MAX_STORE_ATTEMPTS: u32 = 3;
// Grade reported for entities that fail the ranked-deviation gate
pub const UNRANKED_GRADE: &str = "z";
