//! Matchmaking: pure scoring and group formation plus the coordinator that
//! drives them.
//!
//! The split mirrors the data flow: `relaxation` widens a request's effective
//! criteria over time, `scoring` judges pairs and groups of enriched
//! requests, `formation` greedily builds candidate matches from a bucket
//! snapshot, and `service` owns the periodic tick that wires it all to the
//! queue index, storage, lobbies, notifications, and the socket fan-out.

pub mod formation;
pub mod relaxation;
pub mod scoring;
pub mod service;

pub use formation::{form_matches, CandidateMatch};
pub use relaxation::{effective_preferences, level_for_wait, skill_radius, EffectivePreferences};
pub use scoring::{group_score, pair_score, EnrichedRequest, MIN_PAIR_SCORE};
pub use service::{
    Confidence, MatchmakingError, MatchmakingService, QueueInfo, RequestStatusView, StatsReport,
};
