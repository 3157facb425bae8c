use chrono::Utc;
use dashmap::mapref::entry::Entry;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::geo::{GeoPoint, haversine_km};
use crate::models::presence::DriverStatus;
use crate::models::quote::PriceQuote;
use crate::models::ride::{PaymentMethod, Ride, RideParty, RideStatus, Stop};
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRideRequest {
    pub client_id: Uuid,
    pub pickup: Stop,
    pub dropoff: Stop,
    pub payment_method: PaymentMethod,
    pub payment_token: Option<String>,
}

/// Price quote for a prospective trip. Routing degrades to great-circle
/// internally, so a quote can always be produced.
pub fn quote_for(state: &AppState, pickup: &GeoPoint, dropoff: &GeoPoint) -> PriceQuote {
    let route = state.planner.route(pickup, dropoff);
    let surge = state.surge_inputs(pickup);
    state
        .pricing
        .quote(route.distance_km, route.duration_minutes, Utc::now(), surge)
}

/// Persists a new `pending` ride with its quote attached and hands it to
/// the dispatch worker.
pub async fn create_ride(state: &AppState, req: CreateRideRequest) -> Result<Ride, DispatchError> {
    req.pickup.point.validate()?;
    req.dropoff.point.validate()?;

    let quote = quote_for(state, &req.pickup.point, &req.dropoff.point);

    let ride = Ride {
        id: Uuid::new_v4(),
        client_id: req.client_id,
        driver_id: None,
        pickup: req.pickup,
        dropoff: req.dropoff,
        status: RideStatus::Pending,
        estimated_price: quote.price,
        final_price: None,
        cancellation_fee: None,
        distance_km: quote.distance_km,
        duration_minutes: quote.duration_minutes,
        payment_method: req.payment_method,
        payment_token: req.payment_token,
        rating: None,
        cancellation_reason: None,
        cancelled_by: None,
        created_at: Utc::now(),
        accepted_at: None,
        started_at: None,
        completed_at: None,
        cancelled_at: None,
    };

    state.rides.insert(ride.id, ride.clone());
    state.metrics.rides_total.with_label_values(&["created"]).inc();
    state.emit_ride_event(&ride, Some(ride.client_id));

    state
        .dispatch_tx
        .send(ride.id)
        .await
        .map_err(|err| DispatchError::Internal(format!("dispatch queue send failed: {err}")))?;

    info!(ride_id = %ride.id, price = ride.estimated_price, "ride created");
    Ok(ride)
}

/// The critical-section transition. Exactly one of any number of
/// concurrent accepts for the same ride succeeds; every check and both
/// writes happen under the ride row lock, and a failed presence write
/// rolls the row and the driver claim back before the lock is released.
pub fn accept_ride(state: &AppState, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, DispatchError> {
    let mut ride = state
        .rides
        .get_mut(&ride_id)
        .ok_or_else(|| DispatchError::NotFound(format!("ride {ride_id} not found")))?;

    if ride.status != RideStatus::Pending {
        state.record_conflict("ride_taken");
        return Err(DispatchError::RideTaken);
    }

    // Live presence re-read; the client-supplied position is never trusted.
    let presence = state
        .presence
        .get(driver_id)?
        .ok_or_else(|| DispatchError::NotFound(format!("driver {driver_id} has no live presence")))?;

    if presence.status == DriverStatus::Offline {
        return Err(DispatchError::NotFound(format!(
            "driver {driver_id} is offline"
        )));
    }

    if presence.current_ride.is_some() || presence.status != DriverStatus::Available {
        state.record_conflict("driver_busy");
        return Err(DispatchError::DriverBusy);
    }

    let distance_km = haversine_km(&presence.location, &ride.pickup.point);
    if distance_km > state.config.geofence_km {
        state.record_conflict("out_of_range");
        return Err(DispatchError::OutOfRange {
            distance_km,
            limit_km: state.config.geofence_km,
        });
    }

    // Claim the driver: at most one non-terminal ride may hold them.
    match state.active_rides.entry(driver_id) {
        Entry::Occupied(_) => {
            state.record_conflict("driver_busy");
            return Err(DispatchError::DriverBusy);
        }
        Entry::Vacant(slot) => {
            slot.insert(ride_id);
        }
    }

    let snapshot = ride.clone();
    ride.driver_id = Some(driver_id);
    ride.status = RideStatus::Accepted;
    ride.accepted_at = Some(Utc::now());

    if let Err(err) = state
        .presence
        .set_dispatch(driver_id, DriverStatus::EnRouteToPickup, Some(ride_id))
    {
        *ride = snapshot;
        state.active_rides.remove(&driver_id);
        return Err(err);
    }

    state.directory.record_decision(driver_id, true);
    state.metrics.rides_total.with_label_values(&["accepted"]).inc();
    state.emit_ride_event(&ride, Some(driver_id));
    state.notifier.notify(
        ride.client_id,
        json!({
            "type": "driver_assigned",
            "ride_id": ride.id,
            "driver_id": driver_id,
            "distance_km": distance_km,
        }),
    );

    info!(ride_id = %ride.id, driver_id = %driver_id, distance_km, "ride accepted");
    Ok(ride.clone())
}

/// A candidate turning an open offer down; only the accept-rate history
/// changes.
pub fn decline_ride(state: &AppState, ride_id: Uuid, driver_id: Uuid) -> Result<(), DispatchError> {
    if !state.rides.contains_key(&ride_id) {
        return Err(DispatchError::NotFound(format!("ride {ride_id} not found")));
    }

    state.directory.record_decision(driver_id, false);
    debug!(ride_id = %ride_id, driver_id = %driver_id, "offer declined");
    Ok(())
}

pub fn mark_arrived(state: &AppState, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, DispatchError> {
    let mut ride = owned_ride_mut(state, ride_id, driver_id)?;

    if ride.status != RideStatus::Accepted {
        return Err(DispatchError::Invalid(format!(
            "cannot report arrival from status {:?}",
            ride.status
        )));
    }

    ride.status = RideStatus::DriverArriving;
    state.emit_ride_event(&ride, Some(driver_id));
    state.notifier.notify(
        ride.client_id,
        json!({ "type": "driver_arriving", "ride_id": ride.id }),
    );
    Ok(ride.clone())
}

pub fn start_ride(state: &AppState, ride_id: Uuid, driver_id: Uuid) -> Result<Ride, DispatchError> {
    let mut ride = owned_ride_mut(state, ride_id, driver_id)?;

    if ride.status != RideStatus::DriverArriving {
        return Err(DispatchError::Invalid(format!(
            "cannot start ride from status {:?}",
            ride.status
        )));
    }

    let snapshot = ride.clone();
    ride.status = RideStatus::InProgress;
    ride.started_at = Some(Utc::now());

    if let Err(err) = apply_presence(state, driver_id, DriverStatus::OnTrip, Some(ride_id)) {
        *ride = snapshot;
        return Err(err);
    }

    state.emit_ride_event(&ride, Some(driver_id));
    Ok(ride.clone())
}

/// Finalizes the ride: explicit final price when supplied, the original
/// estimate otherwise. The presence release and the row update commit
/// together or not at all.
pub fn complete_ride(
    state: &AppState,
    ride_id: Uuid,
    driver_id: Uuid,
    final_price: Option<f64>,
) -> Result<Ride, DispatchError> {
    let mut ride = owned_ride_mut(state, ride_id, driver_id)?;

    if ride.status != RideStatus::InProgress {
        return Err(DispatchError::Invalid(format!(
            "cannot complete ride from status {:?}",
            ride.status
        )));
    }

    if let Some(price) = final_price {
        if !price.is_finite() || price < 0.0 {
            return Err(DispatchError::Invalid("final price must be a non-negative number".to_string()));
        }
    }

    let snapshot = ride.clone();
    ride.status = RideStatus::Completed;
    ride.completed_at = Some(Utc::now());
    ride.final_price = Some(final_price.unwrap_or(ride.estimated_price));

    if let Err(err) = apply_presence(state, driver_id, DriverStatus::Available, None) {
        *ride = snapshot;
        return Err(err);
    }

    state.active_rides.remove(&driver_id);
    state.directory.record_completion(driver_id);
    state.metrics.rides_total.with_label_values(&["completed"]).inc();

    let charged = ride.final_price.unwrap_or(ride.estimated_price);
    state
        .payments
        .record_charge(ride.id, charged, ride.payment_token.as_deref());
    state.emit_ride_event(&ride, Some(driver_id));
    state.notifier.notify(
        ride.client_id,
        json!({ "type": "ride_completed", "ride_id": ride.id, "final_price": charged }),
    );

    info!(ride_id = %ride.id, final_price = charged, "ride completed");
    Ok(ride.clone())
}

/// Cancellation from either party while non-terminal. The fee scales
/// with how far the ride had progressed; a bound driver is always freed
/// back to `available`.
pub fn cancel_ride(
    state: &AppState,
    ride_id: Uuid,
    party: RideParty,
    reason: Option<String>,
) -> Result<Ride, DispatchError> {
    let mut ride = state
        .rides
        .get_mut(&ride_id)
        .ok_or_else(|| DispatchError::NotFound(format!("ride {ride_id} not found")))?;

    if ride.status.is_terminal() {
        return Err(DispatchError::Invalid(format!(
            "cannot cancel ride in terminal status {:?}",
            ride.status
        )));
    }

    let fee_pct = match ride.status {
        RideStatus::Pending => 0.0,
        RideStatus::Accepted | RideStatus::DriverArriving => state.config.cancel_fee_accepted_pct,
        RideStatus::InProgress => state.config.cancel_fee_in_progress_pct,
        _ => 0.0,
    };
    let fee = (ride.estimated_price * fee_pct / 100.0).round();

    let snapshot = ride.clone();
    ride.status = RideStatus::Cancelled;
    ride.cancelled_at = Some(Utc::now());
    ride.cancelled_by = Some(party);
    ride.cancellation_reason = reason;
    ride.cancellation_fee = Some(fee);

    if let Some(driver_id) = ride.driver_id {
        if let Err(err) = apply_presence(state, driver_id, DriverStatus::Available, None) {
            *ride = snapshot;
            return Err(err);
        }
        state.active_rides.remove(&driver_id);
        state.directory.record_cancellation(driver_id);
        state.notifier.notify(
            driver_id,
            json!({ "type": "ride_cancelled", "ride_id": ride.id }),
        );
    }

    state.metrics.rides_total.with_label_values(&["cancelled"]).inc();
    if fee > 0.0 {
        state
            .payments
            .record_charge(ride.id, fee, ride.payment_token.as_deref());
    }
    state.emit_ride_event(&ride, None);
    state.notifier.notify(
        ride.client_id,
        json!({ "type": "ride_cancelled", "ride_id": ride.id, "fee": fee }),
    );

    info!(ride_id = %ride.id, fee, "ride cancelled");
    Ok(ride.clone())
}

/// Terminal branch for a request nobody can serve: no candidate in
/// range at all. Keeps `driver_id` empty per the status invariant.
pub fn reject_unserviceable(state: &AppState, ride_id: Uuid) -> Result<Ride, DispatchError> {
    let mut ride = state
        .rides
        .get_mut(&ride_id)
        .ok_or_else(|| DispatchError::NotFound(format!("ride {ride_id} not found")))?;

    if ride.status != RideStatus::Pending {
        return Err(DispatchError::Invalid(format!(
            "cannot reject ride in status {:?}",
            ride.status
        )));
    }

    ride.status = RideStatus::Rejected;
    state.metrics.rides_total.with_label_values(&["rejected"]).inc();
    state.emit_ride_event(&ride, None);
    state.notifier.notify(
        ride.client_id,
        json!({ "type": "no_drivers_available", "ride_id": ride.id }),
    );

    info!(ride_id = %ride.id, "ride rejected, no serviceable drivers");
    Ok(ride.clone())
}

/// One rating per completed ride; feeds the driver's directory average.
pub fn rate_ride(state: &AppState, ride_id: Uuid, rating: u8) -> Result<Ride, DispatchError> {
    if !(1..=5).contains(&rating) {
        return Err(DispatchError::Invalid("rating must be between 1 and 5".to_string()));
    }

    let mut ride = state
        .rides
        .get_mut(&ride_id)
        .ok_or_else(|| DispatchError::NotFound(format!("ride {ride_id} not found")))?;

    if ride.status != RideStatus::Completed {
        return Err(DispatchError::Invalid("only completed rides can be rated".to_string()));
    }
    if ride.rating.is_some() {
        return Err(DispatchError::Invalid("ride has already been rated".to_string()));
    }

    ride.rating = Some(rating);
    if let Some(driver_id) = ride.driver_id {
        state.directory.record_rating(driver_id, rating)?;
    }

    Ok(ride.clone())
}

fn owned_ride_mut<'a>(
    state: &'a AppState,
    ride_id: Uuid,
    driver_id: Uuid,
) -> Result<dashmap::mapref::one::RefMut<'a, Uuid, Ride>, DispatchError> {
    let ride = state
        .rides
        .get_mut(&ride_id)
        .ok_or_else(|| DispatchError::NotFound(format!("ride {ride_id} not found")))?;

    if ride.driver_id != Some(driver_id) {
        return Err(DispatchError::Invalid(format!(
            "driver {driver_id} is not assigned to ride {ride_id}"
        )));
    }

    Ok(ride)
}

/// Presence updates inside a transition: a store outage aborts the
/// transition (the caller rolls the row back), but a record that simply
/// expired does not block finishing or cancelling a ride.
fn apply_presence(
    state: &AppState,
    driver_id: Uuid,
    status: DriverStatus,
    current_ride: Option<Uuid>,
) -> Result<(), DispatchError> {
    match state.presence.set_dispatch(driver_id, status, current_ride) {
        Ok(()) => Ok(()),
        Err(DispatchError::NotFound(_)) => {
            debug!(driver_id = %driver_id, "presence absent during transition, continuing");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

impl AppState {
    fn record_conflict(&self, reason: &str) {
        self.metrics
            .accept_conflicts_total
            .with_label_values(&[reason])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use uuid::Uuid;

    use super::{accept_ride, cancel_ride, complete_ride, mark_arrived, rate_ride, start_ride};
    use crate::config::Config;
    use crate::error::DispatchError;
    use crate::external::{LogNotifier, LogPaymentRecorder, RoutePlanner};
    use crate::geo::GeoPoint;
    use crate::models::presence::{DriverPresence, DriverStatus};
    use crate::models::ride::{PaymentMethod, Ride, RideParty, RideStatus, Stop};
    use crate::state::AppState;
    use crate::store::presence::{MemoryPresenceStore, PresenceStore};

    const PICKUP: GeoPoint = GeoPoint {
        lat: -4.3250,
        lng: 15.3222,
    };
    const DROPOFF: GeoPoint = GeoPoint {
        lat: -4.3800,
        lng: 15.3900,
    };

    fn state() -> Arc<AppState> {
        let (state, _rx) = AppState::new(Config::default());
        Arc::new(state)
    }

    fn stop(point: GeoPoint) -> Stop {
        Stop {
            point,
            address: "test stop".to_string(),
        }
    }

    fn insert_pending_ride(state: &AppState) -> Uuid {
        let ride = Ride {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            driver_id: None,
            pickup: stop(PICKUP),
            dropoff: stop(DROPOFF),
            status: RideStatus::Pending,
            estimated_price: 2180.0,
            final_price: None,
            cancellation_fee: None,
            distance_km: 8.4,
            duration_minutes: 20.0,
            payment_method: PaymentMethod::Cash,
            payment_token: None,
            rating: None,
            cancellation_reason: None,
            cancelled_by: None,
            created_at: Utc::now(),
            accepted_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
        };
        let id = ride.id;
        state.rides.insert(id, ride);
        id
    }

    fn push_presence(state: &AppState, km_from_pickup: f64) -> Uuid {
        let driver_id = Uuid::new_v4();
        state
            .presence
            .upsert(DriverPresence {
                driver_id,
                location: GeoPoint {
                    lat: PICKUP.lat + km_from_pickup / 111.0,
                    lng: PICKUP.lng,
                },
                heading_deg: 0.0,
                speed_kmh: 20.0,
                status: DriverStatus::Available,
                current_ride: None,
                updated_at: Utc::now(),
            })
            .unwrap();
        driver_id
    }

    #[test]
    fn accept_binds_ride_and_presence_together() {
        let state = state();
        let ride_id = insert_pending_ride(&state);
        let driver_id = push_presence(&state, 0.5);

        let accepted = accept_ride(&state, ride_id, driver_id).unwrap();

        assert_eq!(accepted.status, RideStatus::Accepted);
        assert_eq!(accepted.driver_id, Some(driver_id));

        let presence = state.presence.get(driver_id).unwrap().unwrap();
        assert_eq!(presence.status, DriverStatus::EnRouteToPickup);
        assert_eq!(presence.current_ride, Some(ride_id));
        assert_eq!(*state.active_rides.get(&driver_id).unwrap(), ride_id);
    }

    #[test]
    fn second_accept_is_rejected_as_taken() {
        let state = state();
        let ride_id = insert_pending_ride(&state);
        let first = push_presence(&state, 0.5);
        let second = push_presence(&state, 0.8);

        accept_ride(&state, ride_id, first).unwrap();
        let err = accept_ride(&state, ride_id, second).unwrap_err();

        assert!(matches!(err, DispatchError::RideTaken));
    }

    #[test]
    fn concurrent_accepts_yield_exactly_one_winner() {
        let state = state();
        let ride_id = insert_pending_ride(&state);

        let drivers: Vec<Uuid> = (0..8).map(|i| push_presence(&state, 0.1 * (i + 1) as f64)).collect();

        let handles: Vec<_> = drivers
            .into_iter()
            .map(|driver_id| {
                let state = state.clone();
                std::thread::spawn(move || accept_ride(&state, ride_id, driver_id))
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let winners = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(DispatchError::RideTaken)))
            .count();

        assert_eq!(winners, 1);
        assert_eq!(conflicts, results.len() - 1);
        assert_eq!(state.active_rides.len(), 1);
    }

    #[test]
    fn accept_beyond_geofence_is_out_of_range() {
        let state = state();
        let ride_id = insert_pending_ride(&state);
        let driver_id = push_presence(&state, 7.0);

        let err = accept_ride(&state, ride_id, driver_id).unwrap_err();
        assert!(matches!(err, DispatchError::OutOfRange { .. }));

        // Nothing moved.
        let ride = state.rides.get(&ride_id).unwrap();
        assert_eq!(ride.status, RideStatus::Pending);
        assert!(ride.driver_id.is_none());
        let presence = state.presence.get(driver_id).unwrap().unwrap();
        assert_eq!(presence.status, DriverStatus::Available);
    }

    #[test]
    fn driver_bound_elsewhere_is_rejected_as_busy() {
        let state = state();
        let first_ride = insert_pending_ride(&state);
        let second_ride = insert_pending_ride(&state);
        let driver_id = push_presence(&state, 0.5);

        accept_ride(&state, first_ride, driver_id).unwrap();
        let err = accept_ride(&state, second_ride, driver_id).unwrap_err();

        assert!(matches!(err, DispatchError::DriverBusy));
        let second = state.rides.get(&second_ride).unwrap();
        assert_eq!(second.status, RideStatus::Pending);
    }

    /// Store whose reads work but whose dispatch write always fails, to
    /// exercise the rollback path inside accept.
    struct WriteFailingStore {
        inner: MemoryPresenceStore,
    }

    impl PresenceStore for WriteFailingStore {
        fn upsert(&self, p: DriverPresence) -> Result<(), DispatchError> {
            self.inner.upsert(p)
        }
        fn get(&self, d: Uuid) -> Result<Option<DriverPresence>, DispatchError> {
            self.inner.get(d)
        }
        fn list_available(&self) -> Result<Vec<DriverPresence>, DispatchError> {
            self.inner.list_available()
        }
        fn list_dispatched(&self) -> Result<Vec<DriverPresence>, DispatchError> {
            self.inner.list_dispatched()
        }
        fn set_dispatch(
            &self,
            _d: Uuid,
            _s: DriverStatus,
            _r: Option<Uuid>,
        ) -> Result<(), DispatchError> {
            Err(DispatchError::Degraded("presence write failed".to_string()))
        }
        fn remove(&self, d: Uuid) -> Result<(), DispatchError> {
            self.inner.remove(d)
        }
        fn purge_expired(&self) -> Result<usize, DispatchError> {
            self.inner.purge_expired()
        }
        fn live_count(&self) -> Result<usize, DispatchError> {
            self.inner.live_count()
        }
    }

    #[test]
    fn failed_presence_write_rolls_the_accept_back() {
        let config = Config::default();
        let (state, _rx) = AppState::with_collaborators(
            config.clone(),
            Arc::new(WriteFailingStore {
                inner: MemoryPresenceStore::new(Duration::from_secs(300)),
            }),
            RoutePlanner::great_circle(config.fallback_speed_kmh),
            Arc::new(LogNotifier),
            Arc::new(LogPaymentRecorder),
        );
        let state = Arc::new(state);
        let ride_id = insert_pending_ride(&state);
        let driver_id = push_presence(&state, 0.5);

        let err = accept_ride(&state, ride_id, driver_id).unwrap_err();
        assert!(matches!(err, DispatchError::Degraded(_)));

        let ride = state.rides.get(&ride_id).unwrap();
        assert_eq!(ride.status, RideStatus::Pending);
        assert!(ride.driver_id.is_none());
        assert!(ride.accepted_at.is_none());
        assert!(state.active_rides.is_empty());
    }

    #[test]
    fn full_progress_path_releases_the_driver() {
        let state = state();
        let ride_id = insert_pending_ride(&state);
        let driver_id = push_presence(&state, 0.5);

        accept_ride(&state, ride_id, driver_id).unwrap();
        mark_arrived(&state, ride_id, driver_id).unwrap();
        let started = start_ride(&state, ride_id, driver_id).unwrap();
        assert_eq!(started.status, RideStatus::InProgress);
        assert_eq!(
            state.presence.get(driver_id).unwrap().unwrap().status,
            DriverStatus::OnTrip
        );

        let completed = complete_ride(&state, ride_id, driver_id, None).unwrap();
        assert_eq!(completed.status, RideStatus::Completed);
        assert_eq!(completed.final_price, Some(completed.estimated_price));

        let presence = state.presence.get(driver_id).unwrap().unwrap();
        assert_eq!(presence.status, DriverStatus::Available);
        assert!(presence.current_ride.is_none());
        assert!(state.active_rides.is_empty());
    }

    #[test]
    fn out_of_order_progress_is_invalid() {
        let state = state();
        let ride_id = insert_pending_ride(&state);
        let driver_id = push_presence(&state, 0.5);

        accept_ride(&state, ride_id, driver_id).unwrap();
        let err = start_ride(&state, ride_id, driver_id).unwrap_err();
        assert!(matches!(err, DispatchError::Invalid(_)));
    }

    #[test]
    fn explicit_final_price_overrides_the_estimate() {
        let state = state();
        let ride_id = insert_pending_ride(&state);
        let driver_id = push_presence(&state, 0.5);

        accept_ride(&state, ride_id, driver_id).unwrap();
        mark_arrived(&state, ride_id, driver_id).unwrap();
        start_ride(&state, ride_id, driver_id).unwrap();
        let completed = complete_ride(&state, ride_id, driver_id, Some(2500.0)).unwrap();

        assert_eq!(completed.final_price, Some(2500.0));
    }

    #[test]
    fn cancellation_fee_scales_with_progress() {
        let state = state();

        // Before acceptance: free.
        let pending = insert_pending_ride(&state);
        let cancelled = cancel_ride(&state, pending, RideParty::Client, None).unwrap();
        assert_eq!(cancelled.cancellation_fee, Some(0.0));

        // After acceptance: partial fee, driver freed.
        let accepted = insert_pending_ride(&state);
        let driver_id = push_presence(&state, 0.5);
        accept_ride(&state, accepted, driver_id).unwrap();
        let cancelled = cancel_ride(&state, accepted, RideParty::Client, Some("late".to_string()))
            .unwrap();
        assert_eq!(cancelled.cancellation_fee, Some((2180.0_f64 * 0.20).round()));
        assert_eq!(
            state.presence.get(driver_id).unwrap().unwrap().status,
            DriverStatus::Available
        );
        assert!(state.active_rides.is_empty());

        // In progress: the larger fee.
        let in_progress = insert_pending_ride(&state);
        let driver_id = push_presence(&state, 0.5);
        accept_ride(&state, in_progress, driver_id).unwrap();
        mark_arrived(&state, in_progress, driver_id).unwrap();
        start_ride(&state, in_progress, driver_id).unwrap();
        let cancelled = cancel_ride(&state, in_progress, RideParty::Driver, None).unwrap();
        assert_eq!(cancelled.cancellation_fee, Some((2180.0_f64 * 0.50).round()));
    }

    #[test]
    fn terminal_rides_cannot_be_cancelled() {
        let state = state();
        let ride_id = insert_pending_ride(&state);
        cancel_ride(&state, ride_id, RideParty::Client, None).unwrap();

        let err = cancel_ride(&state, ride_id, RideParty::Client, None).unwrap_err();
        assert!(matches!(err, DispatchError::Invalid(_)));
    }

    #[test]
    fn rating_requires_a_completed_ride_and_happens_once() {
        let state = state();
        let ride_id = insert_pending_ride(&state);
        let entry = state.directory.register("rated driver".to_string(), PICKUP, None);

        // Re-point presence at the registered driver so stats line up.
        state
            .presence
            .upsert(DriverPresence {
                driver_id: entry.driver_id,
                location: PICKUP,
                heading_deg: 0.0,
                speed_kmh: 0.0,
                status: DriverStatus::Available,
                current_ride: None,
                updated_at: Utc::now(),
            })
            .unwrap();

        assert!(rate_ride(&state, ride_id, 5).is_err());

        accept_ride(&state, ride_id, entry.driver_id).unwrap();
        mark_arrived(&state, ride_id, entry.driver_id).unwrap();
        start_ride(&state, ride_id, entry.driver_id).unwrap();
        complete_ride(&state, ride_id, entry.driver_id, None).unwrap();

        assert!(rate_ride(&state, ride_id, 6).is_err());
        let rated = rate_ride(&state, ride_id, 4).unwrap();
        assert_eq!(rated.rating, Some(4));
        assert!(rate_ride(&state, ride_id, 5).is_err());

        let stats = state.directory.stats(entry.driver_id).unwrap();
        assert!((stats.rating.unwrap() - 4.0).abs() < 1e-9);
    }
}
