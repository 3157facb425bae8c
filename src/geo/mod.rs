use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

const EARTH_RADIUS_KM: f64 = 6_371.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    /// Rejects non-finite and out-of-range coordinates before they reach
    /// the stores or the matching engine.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if !self.lat.is_finite() || !self.lng.is_finite() {
            return Err(DispatchError::Invalid(
                "coordinates must be finite numbers".to_string(),
            ));
        }

        if self.lat.abs() > 90.0 || self.lng.abs() > 180.0 {
            return Err(DispatchError::Invalid(format!(
                "coordinates out of range: lat={}, lng={}",
                self.lat, self.lng
            )));
        }

        Ok(())
    }
}

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}
