use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::DispatchError;
use crate::geo::{GeoPoint, haversine_km};
use crate::models::presence::{DriverPresence, DriverStatus};
use crate::state::AppState;
use crate::store::directory::DirectoryEntry;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(register_driver))
        .route("/drivers/nearby", get(nearby_drivers))
        .route("/drivers/:id/status", patch(update_status))
        .route("/drivers/:id/location", post(push_location))
}

#[derive(Deserialize)]
pub struct RegisterDriverRequest {
    pub name: String,
    pub location: GeoPoint,
    pub rating: Option<f64>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub online: bool,
}

#[derive(Deserialize)]
pub struct PushLocationRequest {
    pub location: GeoPoint,
    #[serde(default)]
    pub heading_deg: f64,
    #[serde(default)]
    pub speed_kmh: f64,
}

#[derive(Deserialize)]
pub struct NearbyQuery {
    pub lat: f64,
    pub lng: f64,
    pub radius_km: Option<f64>,
}

#[derive(Serialize)]
pub struct NearbyDriver {
    pub driver_id: Uuid,
    pub location: GeoPoint,
    pub distance_km: f64,
}

async fn register_driver(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterDriverRequest>,
) -> Result<Json<DirectoryEntry>, DispatchError> {
    if payload.name.trim().is_empty() {
        return Err(DispatchError::Invalid("name cannot be empty".to_string()));
    }
    payload.location.validate()?;

    let entry = state
        .directory
        .register(payload.name, payload.location, payload.rating);
    Ok(Json(entry))
}

/// Toggling offline eagerly expires the presence record; the TTL would
/// get there anyway, this just frees the driver for nobody.
async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<DirectoryEntry>, DispatchError> {
    state.directory.set_online(id, payload.online)?;

    if !payload.online {
        state.presence.remove(id)?;
    }

    let entry = state
        .directory
        .get(id)
        .ok_or_else(|| DispatchError::NotFound(format!("driver {id} not found")))?;
    Ok(Json(entry))
}

/// GPS push: refreshes the ephemeral record (and its expiry window) and
/// keeps the durable directory's coarse location in sync. The dispatch
/// sub-state (status + bound ride) is preserved across pushes.
async fn push_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<PushLocationRequest>,
) -> Result<Json<DriverPresence>, DispatchError> {
    payload.location.validate()?;

    if !state.directory.contains(id) {
        return Err(DispatchError::NotFound(format!("driver {id} not found")));
    }

    let existing = state.presence.get(id)?;
    let (status, current_ride) = existing
        .map(|p| (p.status, p.current_ride))
        .unwrap_or((DriverStatus::Available, None));

    let presence = DriverPresence {
        driver_id: id,
        location: payload.location,
        heading_deg: payload.heading_deg,
        speed_kmh: payload.speed_kmh,
        status,
        current_ride,
        updated_at: Utc::now(),
    };

    state.presence.upsert(presence.clone())?;
    state.directory.update_location(id, payload.location)?;

    Ok(Json(presence))
}

async fn nearby_drivers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NearbyQuery>,
) -> Result<Json<Vec<NearbyDriver>>, DispatchError> {
    let point = GeoPoint {
        lat: query.lat,
        lng: query.lng,
    };
    point.validate()?;
    let radius_km = query.radius_km.unwrap_or(state.config.max_search_radius_km);

    let mut nearby: Vec<NearbyDriver> = match state.presence.list_available() {
        Ok(available) => available
            .into_iter()
            .map(|p| NearbyDriver {
                driver_id: p.driver_id,
                location: p.location,
                distance_km: haversine_km(&p.location, &point),
            })
            .collect(),
        Err(err) => {
            warn!(error = %err, "presence store degraded, listing nearby from directory");
            state
                .directory
                .find_nearby(&point, radius_km)
                .into_iter()
                .map(|entry| NearbyDriver {
                    driver_id: entry.driver_id,
                    location: entry.location,
                    distance_km: haversine_km(&entry.location, &point),
                })
                .collect()
        }
    };

    nearby.retain(|d| d.distance_km <= radius_km);
    nearby.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));

    Ok(Json(nearby))
}
