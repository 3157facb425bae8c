use crate::models::candidate::ScoreBreakdown;
use crate::models::presence::DriverStatus;
use crate::store::directory::DriverStats;

const DISTANCE_WEIGHT: f64 = 0.40;
const RATING_WEIGHT: f64 = 0.25;
const AVAILABILITY_WEIGHT: f64 = 0.15;
const COMPLETION_WEIGHT: f64 = 0.10;
const ACCEPTANCE_WEIGHT: f64 = 0.10;

/// Neutral component score when a driver has no history to judge by.
const NO_HISTORY_SCORE: f64 = 50.0;

#[derive(Debug, Clone, Copy)]
pub struct ScoringPolicy {
    /// Inside this radius a candidate gets the full distance score.
    pub preferred_radius_km: f64,
    /// At or beyond this radius the distance score reaches zero.
    pub max_radius_km: f64,
}

/// Weighted composite on a 0..=100 scale. `status` is `None` when the
/// candidate came from the durable directory and no live presence could
/// be consulted.
pub fn compute_score(
    distance_km: f64,
    status: Option<DriverStatus>,
    stats: Option<&DriverStats>,
    policy: &ScoringPolicy,
) -> (f64, ScoreBreakdown) {
    let breakdown = ScoreBreakdown {
        distance_score: distance_score(distance_km, policy),
        rating_score: rating_score(stats.and_then(|s| s.rating)),
        availability_score: availability_score(status),
        completion_score: completion_score(stats),
        acceptance_score: acceptance_score(stats),
    };

    let score = weighted_score(&breakdown);
    (score, breakdown)
}

pub fn weighted_score(breakdown: &ScoreBreakdown) -> f64 {
    (breakdown.distance_score * DISTANCE_WEIGHT)
        + (breakdown.rating_score * RATING_WEIGHT)
        + (breakdown.availability_score * AVAILABILITY_WEIGHT)
        + (breakdown.completion_score * COMPLETION_WEIGHT)
        + (breakdown.acceptance_score * ACCEPTANCE_WEIGHT)
}

/// Linear ramp: 100 at the preferred radius, 0 at the max radius.
fn distance_score(distance_km: f64, policy: &ScoringPolicy) -> f64 {
    if distance_km <= policy.preferred_radius_km {
        return 100.0;
    }
    if distance_km >= policy.max_radius_km {
        return 0.0;
    }

    let span = policy.max_radius_km - policy.preferred_radius_km;
    100.0 * (policy.max_radius_km - distance_km) / span
}

fn rating_score(rating: Option<f64>) -> f64 {
    match rating {
        Some(r) => (r * 20.0).clamp(0.0, 100.0),
        None => NO_HISTORY_SCORE,
    }
}

fn availability_score(status: Option<DriverStatus>) -> f64 {
    match status {
        Some(DriverStatus::Available) => 100.0,
        Some(DriverStatus::EnRouteToPickup) | Some(DriverStatus::OnTrip) => 50.0,
        Some(DriverStatus::Offline) => 0.0,
        None => NO_HISTORY_SCORE,
    }
}

fn completion_score(stats: Option<&DriverStats>) -> f64 {
    let Some(stats) = stats else {
        return NO_HISTORY_SCORE;
    };
    let total = stats.completed + stats.cancelled;
    if total == 0 {
        return NO_HISTORY_SCORE;
    }
    stats.completed as f64 / total as f64 * 100.0
}

fn acceptance_score(stats: Option<&DriverStats>) -> f64 {
    let Some(stats) = stats else {
        return NO_HISTORY_SCORE;
    };
    if stats.offered == 0 {
        return NO_HISTORY_SCORE;
    }
    (stats.accepted as f64 / stats.offered as f64 * 100.0).min(100.0)
}
