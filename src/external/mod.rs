use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::geo::{GeoPoint, haversine_km};

#[derive(Debug, Clone, Copy)]
pub struct RouteEstimate {
    pub distance_km: f64,
    pub duration_minutes: f64,
}

/// Routing/distance collaborator. Implementations own their timeouts;
/// any error degrades to a great-circle approximation at the call site.
pub trait Routing: Send + Sync {
    fn route(&self, origin: &GeoPoint, destination: &GeoPoint)
    -> Result<RouteEstimate, DispatchError>;
}

/// Great-circle estimate: haversine distance, duration from an assumed
/// average speed.
pub struct GreatCircleRouting {
    pub average_speed_kmh: f64,
}

impl Routing for GreatCircleRouting {
    fn route(
        &self,
        origin: &GeoPoint,
        destination: &GeoPoint,
    ) -> Result<RouteEstimate, DispatchError> {
        let distance_km = haversine_km(origin, destination);
        Ok(RouteEstimate {
            distance_km,
            duration_minutes: distance_km / self.average_speed_kmh * 60.0,
        })
    }
}

/// Wraps the primary routing collaborator and degrades to great-circle
/// on any error, so a routing outage never aborts ride creation.
pub struct RoutePlanner {
    primary: Arc<dyn Routing>,
    fallback: GreatCircleRouting,
}

impl RoutePlanner {
    pub fn new(primary: Arc<dyn Routing>, fallback_speed_kmh: f64) -> Self {
        Self {
            primary,
            fallback: GreatCircleRouting {
                average_speed_kmh: fallback_speed_kmh,
            },
        }
    }

    /// Planner with no external collaborator configured; great-circle only.
    pub fn great_circle(fallback_speed_kmh: f64) -> Self {
        Self::new(
            Arc::new(GreatCircleRouting {
                average_speed_kmh: fallback_speed_kmh,
            }),
            fallback_speed_kmh,
        )
    }

    pub fn route(&self, origin: &GeoPoint, destination: &GeoPoint) -> RouteEstimate {
        match self.primary.route(origin, destination) {
            Ok(estimate) => estimate,
            Err(err) => {
                debug!(error = %err, "routing collaborator degraded, using great-circle estimate");
                self.fallback
                    .route(origin, destination)
                    .unwrap_or(RouteEstimate {
                        distance_km: 0.0,
                        duration_minutes: 0.0,
                    })
            }
        }
    }
}

/// Fire-and-forget notification collaborator. The core never blocks on
/// delivery confirmation.
pub trait Notifier: Send + Sync {
    fn notify(&self, target: Uuid, payload: Value);
}

pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, target: Uuid, payload: Value) {
        info!(target_id = %target, %payload, "notification dispatched");
    }
}

/// Records that a ride's finalization implies a charge. No validation or
/// capture happens here.
pub trait PaymentRecorder: Send + Sync {
    fn record_charge(&self, ride_id: Uuid, amount: f64, token: Option<&str>);
}

pub struct LogPaymentRecorder;

impl PaymentRecorder for LogPaymentRecorder {
    fn record_charge(&self, ride_id: Uuid, amount: f64, token: Option<&str>) {
        info!(
            ride_id = %ride_id,
            amount,
            tokenized = token.is_some(),
            "charge recorded"
        );
    }
}
