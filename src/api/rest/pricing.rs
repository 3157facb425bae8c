use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::routing::get;

use crate::error::DispatchError;
use crate::models::quote::PriceConfiguration;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/pricing/config", get(get_config).put(update_config))
}

async fn get_config(State(state): State<Arc<AppState>>) -> Json<PriceConfiguration> {
    Json(state.pricing.current_config())
}

/// Administrative update; the pricing cache is invalidated so the next
/// quote already uses the new constants.
async fn update_config(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PriceConfiguration>,
) -> Result<Json<PriceConfiguration>, DispatchError> {
    if payload.base_fare < 0.0 || payload.per_km_rate < 0.0 {
        return Err(DispatchError::Invalid(
            "fares must be non-negative".to_string(),
        ));
    }
    if payload.surge_tiers.windows(2).any(|pair| pair[0] > pair[1]) {
        return Err(DispatchError::Invalid(
            "surge tiers must be in ascending order".to_string(),
        ));
    }

    state.pricing.update_config(payload.clone());
    Ok(Json(payload))
}
