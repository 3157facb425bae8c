use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Multipliers {
    pub time: f64,
    pub day: f64,
    pub surge: f64,
}

/// Transient quote; only the price scalar is ever absorbed into a ride.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceQuote {
    pub price: f64,
    pub base_price: f64,
    pub distance_km: f64,
    pub duration_minutes: f64,
    pub multipliers: Multipliers,
    pub surge_ratio: f64,
}

/// Durable, admin-editable pricing constants. Single active row,
/// read-mostly, cached with a bounded TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceConfiguration {
    pub base_fare: f64,
    pub per_km_rate: f64,
    pub rush_hour_multiplier: f64,
    pub night_multiplier: f64,
    pub weekend_multiplier: f64,
    /// Ascending surge multipliers; tier 0 is the low-demand discount,
    /// tier 4 the ceiling applied when demand meets zero nearby supply.
    pub surge_tiers: [f64; 5],
}

impl Default for PriceConfiguration {
    fn default() -> Self {
        Self {
            base_fare: 500.0,
            per_km_rate: 200.0,
            rush_hour_multiplier: 1.3,
            night_multiplier: 1.2,
            weekend_multiplier: 1.1,
            surge_tiers: [0.9, 1.0, 1.25, 1.5, 2.0],
        }
    }
}
