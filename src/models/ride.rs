use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Pending,
    Accepted,
    DriverArriving,
    InProgress,
    Completed,
    Cancelled,
    Rejected,
}

impl RideStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RideStatus::Completed | RideStatus::Cancelled | RideStatus::Rejected
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    MobileMoney,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RideParty {
    Client,
    Driver,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stop {
    pub point: GeoPoint,
    pub address: String,
}

/// Durable ride record. Never deleted; terminal states are final.
/// `driver_id` is set iff the status is neither `Pending` nor `Rejected`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ride {
    pub id: Uuid,
    pub client_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub pickup: Stop,
    pub dropoff: Stop,
    pub status: RideStatus,
    pub estimated_price: f64,
    pub final_price: Option<f64>,
    pub cancellation_fee: Option<f64>,
    pub distance_km: f64,
    pub duration_minutes: f64,
    pub payment_method: PaymentMethod,
    pub payment_token: Option<String>,
    pub rating: Option<u8>,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<RideParty>,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// Lifecycle event published on every ride transition, consumed by the
/// notification/UI layers over the `/ws/events` stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideEvent {
    pub ride_id: Uuid,
    pub status: RideStatus,
    pub actor: Option<Uuid>,
    pub at: DateTime<Utc>,
}
