pub mod constants;
pub mod glicko;
pub mod leaderboard;
pub mod period;
pub mod ranks;
pub mod rating_service;
pub mod structures;
