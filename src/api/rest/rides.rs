use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use serde::Deserialize;
use uuid::Uuid;

use crate::broadcast::broadcast_now;
use crate::engine::dispatch::{
    self, CreateRideRequest, accept_ride, cancel_ride, complete_ride, decline_ride, mark_arrived,
    rate_ride, start_ride,
};
use crate::error::DispatchError;
use crate::models::quote::PriceQuote;
use crate::models::ride::{Ride, RideParty, Stop};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/rides", post(create))
        .route("/rides/:id", get(get_ride))
        .route("/rides/:id/accept", post(accept))
        .route("/rides/:id/decline", post(decline))
        .route("/rides/:id/arrived", post(arrived))
        .route("/rides/:id/start", post(start))
        .route("/rides/:id/complete", post(complete))
        .route("/rides/:id/cancel", post(cancel))
        .route("/rides/:id/rating", post(rate))
        .route("/quotes", post(quote))
}

#[derive(Deserialize)]
pub struct DriverActionRequest {
    pub driver_id: Uuid,
}

#[derive(Deserialize)]
pub struct CompleteRequest {
    pub driver_id: Uuid,
    pub final_price: Option<f64>,
}

#[derive(Deserialize)]
pub struct CancelRequest {
    pub party: RideParty,
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct RatingRequest {
    pub rating: u8,
}

#[derive(Deserialize)]
pub struct QuoteRequest {
    pub pickup: Stop,
    pub dropoff: Stop,
}

async fn create(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateRideRequest>,
) -> Result<Json<Ride>, DispatchError> {
    let ride = dispatch::create_ride(&state, payload).await?;
    Ok(Json(ride))
}

async fn get_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Ride>, DispatchError> {
    let ride = state
        .rides
        .get(&id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| DispatchError::NotFound(format!("ride {id} not found")))?;
    Ok(Json(ride))
}

/// Driver-initiated accept; races the worker's auto-assignment and any
/// other driver through the one atomic transition. The fresh position
/// goes out immediately so the client does not wait for a tick.
async fn accept(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<Ride>, DispatchError> {
    let ride = accept_ride(&state, id, payload.driver_id)?;
    broadcast_now(&state, payload.driver_id);
    Ok(Json(ride))
}

async fn decline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<serde_json::Value>, DispatchError> {
    decline_ride(&state, id, payload.driver_id)?;
    Ok(Json(serde_json::json!({ "declined": true })))
}

async fn arrived(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<Ride>, DispatchError> {
    let ride = mark_arrived(&state, id, payload.driver_id)?;
    Ok(Json(ride))
}

async fn start(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> Result<Json<Ride>, DispatchError> {
    let ride = start_ride(&state, id, payload.driver_id)?;
    Ok(Json(ride))
}

async fn complete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CompleteRequest>,
) -> Result<Json<Ride>, DispatchError> {
    let ride = complete_ride(&state, id, payload.driver_id, payload.final_price)?;
    Ok(Json(ride))
}

async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelRequest>,
) -> Result<Json<Ride>, DispatchError> {
    let ride = cancel_ride(&state, id, payload.party, payload.reason)?;
    Ok(Json(ride))
}

async fn rate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RatingRequest>,
) -> Result<Json<Ride>, DispatchError> {
    let ride = rate_ride(&state, id, payload.rating)?;
    Ok(Json(ride))
}

async fn quote(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<QuoteRequest>,
) -> Result<Json<PriceQuote>, DispatchError> {
    payload.pickup.point.validate()?;
    payload.dropoff.point.validate()?;

    let quote = dispatch::quote_for(&state, &payload.pickup.point, &payload.dropoff.point);
    Ok(Json(quote))
}
