pub mod engine;
pub mod policy;
pub mod types;

pub use engine::DispatchEngine;
pub use policy::{score_candidate, ScoreComponents, AVAILABILITY_BONUS};
pub use types::{rank_candidates, MatchCandidate};
