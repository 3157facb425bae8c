use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::presence::DriverPresence;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub ride_id: Uuid,
    pub driver_id: Uuid,
    pub location: crate::geo::GeoPoint,
    pub heading_deg: f64,
    pub speed_kmh: f64,
    pub recorded_at: DateTime<Utc>,
}

impl PositionUpdate {
    pub fn from_presence(presence: &DriverPresence, ride_id: Uuid) -> Self {
        Self {
            ride_id,
            driver_id: presence.driver_id,
            location: presence.location,
            heading_deg: presence.heading_deg,
            speed_kmh: presence.speed_kmh,
            recorded_at: presence.updated_at,
        }
    }
}

/// Per-ride position channels with topic semantics: only consumers
/// subscribed to a given ride receive its updates.
pub struct RideChannels {
    channels: DashMap<Uuid, broadcast::Sender<PositionUpdate>>,
    buffer: usize,
}

impl RideChannels {
    pub fn new(buffer: usize) -> Self {
        Self {
            channels: DashMap::new(),
            buffer,
        }
    }

    pub fn subscribe(&self, ride_id: Uuid) -> broadcast::Receiver<PositionUpdate> {
        self.channels
            .entry(ride_id)
            .or_insert_with(|| broadcast::channel(self.buffer).0)
            .subscribe()
    }

    /// Publishes only when somebody is listening; returns whether the
    /// update went anywhere.
    pub fn publish(&self, update: PositionUpdate) -> bool {
        let Some(sender) = self.channels.get(&update.ride_id) else {
            return false;
        };
        if sender.receiver_count() == 0 {
            return false;
        }
        sender.send(update).is_ok()
    }

    pub fn has_subscribers(&self, ride_id: Uuid) -> bool {
        self.channels
            .get(&ride_id)
            .map(|sender| sender.receiver_count() > 0)
            .unwrap_or(false)
    }

    /// Drops channels nobody listens to anymore.
    pub fn prune(&self) -> usize {
        let before = self.channels.len();
        self.channels
            .retain(|_, sender| sender.receiver_count() > 0);
        before - self.channels.len()
    }
}

/// Manual single-shot broadcast, used right after an accept so the
/// client sees the driver without waiting for the next tick.
pub fn broadcast_now(state: &AppState, driver_id: Uuid) {
    let presence = match state.presence.get(driver_id) {
        Ok(Some(presence)) => presence,
        Ok(None) => return,
        Err(err) => {
            warn!(error = %err, "presence store degraded, skipping immediate broadcast");
            return;
        }
    };

    if let Some(ride_id) = presence.current_ride {
        if state
            .channels
            .publish(PositionUpdate::from_presence(&presence, ride_id))
        {
            state.metrics.position_broadcasts_total.inc();
        }
    }
}

/// Recurring fan-out task: republishes every dispatched driver's latest
/// position to its ride's subscribers, decoupling GPS push frequency
/// from client-facing update frequency. Also reclaims expired presence
/// records and dead channels each tick.
pub async fn run_broadcaster(state: Arc<AppState>, interval: Duration) {
    info!(interval_secs = interval.as_secs(), "location broadcaster started");
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;
        tick(&state);
    }
}

fn tick(state: &AppState) {
    match state.presence.purge_expired() {
        Ok(purged) if purged > 0 => {
            info!(purged, "expired presence records removed");
        }
        Ok(_) => {}
        Err(err) => {
            warn!(error = %err, "presence store degraded, skipping broadcast tick");
            return;
        }
    }

    if let Ok(live) = state.presence.live_count() {
        state.metrics.live_presence.set(live as i64);
    }

    state.channels.prune();

    let dispatched = match state.presence.list_dispatched() {
        Ok(dispatched) => dispatched,
        Err(err) => {
            warn!(error = %err, "presence store degraded, skipping broadcast tick");
            return;
        }
    };

    for presence in dispatched {
        let Some(ride_id) = presence.current_ride else {
            continue;
        };
        if state
            .channels
            .publish(PositionUpdate::from_presence(&presence, ride_id))
        {
            state.metrics.position_broadcasts_total.inc();
        }
    }
}
