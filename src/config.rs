use std::env;

use crate::error::DispatchError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub dispatch_queue_size: usize,
    pub event_buffer_size: usize,

    /// Seconds a presence record stays live without a refresh.
    pub presence_ttl_secs: u64,
    pub broadcast_interval_secs: u64,

    /// Maximum driver-to-pickup distance at accept time.
    pub geofence_km: f64,
    pub max_search_radius_km: f64,
    pub preferred_radius_km: f64,
    pub min_match_score: f64,

    pub pricing_cache_ttl_secs: u64,
    pub surge_lookback_secs: i64,
    pub surge_demand_radius_km: f64,
    pub surge_supply_radius_km: f64,

    pub cancel_fee_accepted_pct: f64,
    pub cancel_fee_in_progress_pct: f64,

    /// Assumed speed when the routing collaborator is down and duration
    /// has to be derived from great-circle distance.
    pub fallback_speed_kmh: f64,
    /// Offset applied to UTC for the rush-hour/night/weekend windows.
    pub utc_offset_hours: i32,
}

impl Config {
    pub fn from_env() -> Result<Self, DispatchError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            dispatch_queue_size: parse_or_default("DISPATCH_QUEUE_SIZE", 1024)?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            presence_ttl_secs: parse_or_default("PRESENCE_TTL_SECS", 300)?,
            broadcast_interval_secs: parse_or_default("BROADCAST_INTERVAL_SECS", 2)?,
            geofence_km: parse_or_default("GEOFENCE_KM", 5.0)?,
            max_search_radius_km: parse_or_default("MAX_SEARCH_RADIUS_KM", 5.0)?,
            preferred_radius_km: parse_or_default("PREFERRED_RADIUS_KM", 1.0)?,
            min_match_score: parse_or_default("MIN_MATCH_SCORE", 30.0)?,
            pricing_cache_ttl_secs: parse_or_default("PRICING_CACHE_TTL_SECS", 60)?,
            surge_lookback_secs: parse_or_default("SURGE_LOOKBACK_SECS", 600)?,
            surge_demand_radius_km: parse_or_default("SURGE_DEMAND_RADIUS_KM", 2.0)?,
            surge_supply_radius_km: parse_or_default("SURGE_SUPPLY_RADIUS_KM", 5.0)?,
            cancel_fee_accepted_pct: parse_or_default("CANCEL_FEE_ACCEPTED_PCT", 20.0)?,
            cancel_fee_in_progress_pct: parse_or_default("CANCEL_FEE_IN_PROGRESS_PCT", 50.0)?,
            fallback_speed_kmh: parse_or_default("FALLBACK_SPEED_KMH", 30.0)?,
            utc_offset_hours: parse_or_default("UTC_OFFSET_HOURS", 1)?,
        })
    }
}

impl Default for Config {
    /// Defaults used by tests; identical to `from_env` with no overrides.
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            dispatch_queue_size: 1024,
            event_buffer_size: 1024,
            presence_ttl_secs: 300,
            broadcast_interval_secs: 2,
            geofence_km: 5.0,
            max_search_radius_km: 5.0,
            preferred_radius_km: 1.0,
            min_match_score: 30.0,
            pricing_cache_ttl_secs: 60,
            surge_lookback_secs: 600,
            surge_demand_radius_km: 2.0,
            surge_supply_radius_km: 5.0,
            cancel_fee_accepted_pct: 20.0,
            cancel_fee_in_progress_pct: 50.0,
            fallback_speed_kmh: 30.0,
            utc_offset_hours: 1,
        }
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, DispatchError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| DispatchError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
