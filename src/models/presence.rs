use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    Available,
    EnRouteToPickup,
    OnTrip,
    Offline,
}

/// A driver's live, expiring position-and-status record. Absence from the
/// store means the driver is not reachable for dispatch, whatever any
/// durable "online" flag says.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverPresence {
    pub driver_id: Uuid,
    pub location: GeoPoint,
    pub heading_deg: f64,
    pub speed_kmh: f64,
    pub status: DriverStatus,
    pub current_ride: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl DriverPresence {
    pub fn is_dispatchable(&self) -> bool {
        self.status == DriverStatus::Available && self.current_ride.is_none()
    }
}
