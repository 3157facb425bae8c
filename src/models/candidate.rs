use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;

/// Per-factor scores on a 0..=100 scale, before weighting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub distance_score: f64,
    pub rating_score: f64,
    pub availability_score: f64,
    pub completion_score: f64,
    pub acceptance_score: f64,
}

/// A driver considered for a specific pickup. Lives only within one
/// matching invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub driver_id: Uuid,
    pub location: GeoPoint,
    pub distance_km: f64,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerUp {
    pub driver_id: Uuid,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub best: MatchCandidate,
    /// Next-ranked candidates, kept for observability and manual fallback.
    pub runners_up: Vec<RunnerUp>,
}
