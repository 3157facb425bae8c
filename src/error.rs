use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("ride already taken")]
    RideTaken,

    #[error("driver is serving another ride")]
    DriverBusy,

    #[error("driver is {distance_km:.2} km from pickup, geofence limit is {limit_km:.2} km")]
    OutOfRange { distance_km: f64, limit_km: f64 },

    #[error("no drivers available")]
    NoDriversAvailable,

    #[error("dependency degraded: {0}")]
    Degraded(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Stable machine-readable reason, so a failed accept can tell
    /// "someone else got it" apart from "you're mid-ride" apart from
    /// "too far" without parsing the message.
    pub fn reason(&self) -> &'static str {
        match self {
            DispatchError::NotFound(_) => "not_found",
            DispatchError::Invalid(_) => "invalid",
            DispatchError::RideTaken => "ride_taken",
            DispatchError::DriverBusy => "driver_busy",
            DispatchError::OutOfRange { .. } => "out_of_range",
            DispatchError::NoDriversAvailable => "no_drivers_available",
            DispatchError::Degraded(_) => "degraded",
            DispatchError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = match &self {
            DispatchError::NotFound(_) => StatusCode::NOT_FOUND,
            DispatchError::Invalid(_) => StatusCode::BAD_REQUEST,
            DispatchError::RideTaken | DispatchError::DriverBusy => StatusCode::CONFLICT,
            DispatchError::OutOfRange { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            DispatchError::NoDriversAvailable | DispatchError::Degraded(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            DispatchError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string(),
            "reason": self.reason(),
        }));

        (status, body).into_response()
    }
}
