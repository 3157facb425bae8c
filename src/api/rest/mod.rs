pub mod drivers;
pub mod pricing;
pub mod rides;
pub mod ws;

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(drivers::router())
        .merge(rides::router())
        .merge(pricing::router())
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ws/events", get(ws::events_handler))
        .route("/rides/:id/track", get(ws::track_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    drivers_registered: usize,
    drivers_live: usize,
    rides: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        drivers_registered: state.directory.len(),
        drivers_live: state.presence.live_count().unwrap_or(0),
        rides: state.rides.len(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}
