use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broadcast::broadcast_now;
use crate::engine::dispatch::{accept_ride, reject_unserviceable};
use crate::engine::matching::rank_candidates;
use crate::error::DispatchError;
use crate::models::candidate::MatchCandidate;
use crate::models::ride::{Ride, RideStatus};
use crate::state::AppState;

/// What the worker did with a created ride; becomes the metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    AutoAssigned,
    OfferBroadcast,
    Rejected,
    AlreadyHandled,
}

impl DispatchOutcome {
    fn as_label(&self) -> &'static str {
        match self {
            DispatchOutcome::AutoAssigned => "auto_assigned",
            DispatchOutcome::OfferBroadcast => "offer_broadcast",
            DispatchOutcome::Rejected => "rejected",
            DispatchOutcome::AlreadyHandled => "already_handled",
        }
    }
}

/// Consumes created rides and matches each one: a confident match is
/// auto-accepted through the same atomic accept transition drivers use;
/// anything less becomes an open offer, and a ride nobody can serve is
/// rejected.
pub async fn run_dispatch_worker(state: Arc<AppState>, mut ride_rx: mpsc::Receiver<Uuid>) {
    info!("dispatch worker started");

    while let Some(ride_id) = ride_rx.recv().await {
        let start = Instant::now();
        match dispatch_ride(&state, ride_id) {
            Ok(outcome) => {
                state
                    .metrics
                    .match_latency_seconds
                    .with_label_values(&[outcome.as_label()])
                    .observe(start.elapsed().as_secs_f64());
            }
            Err(err) => {
                state
                    .metrics
                    .match_latency_seconds
                    .with_label_values(&["error"])
                    .observe(start.elapsed().as_secs_f64());
                error!(ride_id = %ride_id, error = %err, "failed to dispatch ride");
            }
        }
    }

    warn!("dispatch worker stopped: queue channel closed");
}

pub fn dispatch_ride(state: &AppState, ride_id: Uuid) -> Result<DispatchOutcome, DispatchError> {
    let ride = state
        .rides
        .get(&ride_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| DispatchError::NotFound(format!("ride {ride_id} not found")))?;

    if ride.status != RideStatus::Pending {
        return Ok(DispatchOutcome::AlreadyHandled);
    }

    let ranked = rank_candidates(
        state.presence.as_ref(),
        &state.directory,
        &ride.pickup.point,
        &state.match_policy(),
    )?;

    if ranked.is_empty() {
        reject_unserviceable(state, ride_id)?;
        return Ok(DispatchOutcome::Rejected);
    }

    let best = &ranked[0];
    if best.score >= state.config.min_match_score {
        state.directory.record_offer(best.driver_id);
        match accept_ride(state, ride_id, best.driver_id) {
            Ok(_) => {
                broadcast_now(state, best.driver_id);
                info!(
                    ride_id = %ride_id,
                    driver_id = %best.driver_id,
                    score = best.score,
                    runners_up = ranked.len().saturating_sub(1).min(3),
                    "ride auto-assigned"
                );
                return Ok(DispatchOutcome::AutoAssigned);
            }
            Err(DispatchError::RideTaken) => {
                // A driver beat the worker to it; nothing left to do.
                return Ok(DispatchOutcome::AlreadyHandled);
            }
            Err(err) => {
                debug!(
                    ride_id = %ride_id,
                    driver_id = %best.driver_id,
                    error = %err,
                    "auto-assign failed, falling back to open offer"
                );
                open_offer(state, &ride, &ranked[1..]);
                return Ok(DispatchOutcome::OfferBroadcast);
            }
        }
    }

    open_offer(state, &ride, &ranked);
    Ok(DispatchOutcome::OfferBroadcast)
}

/// No confident single assignment: every in-range candidate gets the
/// offer and the first valid accept wins through the atomic transition.
fn open_offer(state: &AppState, ride: &Ride, candidates: &[MatchCandidate]) {
    for candidate in candidates {
        state.directory.record_offer(candidate.driver_id);
        state.notifier.notify(
            candidate.driver_id,
            json!({
                "type": "ride_offer",
                "ride_id": ride.id,
                "pickup": ride.pickup,
                "estimated_price": ride.estimated_price,
                "distance_km": candidate.distance_km,
            }),
        );
    }

    state.notifier.notify(
        ride.client_id,
        json!({ "type": "searching_for_driver", "ride_id": ride.id }),
    );

    info!(
        ride_id = %ride.id,
        candidates = candidates.len(),
        "open offer broadcast"
    );
}
