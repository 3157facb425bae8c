use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc, Weekday};
use tracing::info;

use crate::models::quote::{Multipliers, PriceConfiguration, PriceQuote};

/// Rush-hour windows in service-local hours, [start, end).
const RUSH_WINDOWS: [(u32, u32); 2] = [(7, 9), (17, 19)];
/// Night window: from this hour until the morning end hour.
const NIGHT_START: u32 = 22;
const NIGHT_END: u32 = 5;

/// Demand/supply snapshot around a pickup point.
#[derive(Debug, Clone, Copy, Default)]
pub struct SurgeInputs {
    /// Pending requests created within the lookback window, small radius.
    pub pending_nearby: usize,
    /// Available drivers within the larger supply radius.
    pub drivers_nearby: usize,
}

struct CachedConfig {
    config: PriceConfiguration,
    loaded_at: Instant,
}

/// Computes quotes from the durable price configuration. The
/// configuration is read through a TTL cache that is explicitly
/// invalidated on administrative update; each quote works from a single
/// snapshot so it never mixes stale and fresh constants.
pub struct PricingEngine {
    durable: RwLock<PriceConfiguration>,
    cache: Mutex<Option<CachedConfig>>,
    cache_ttl: Duration,
    service_offset: FixedOffset,
}

impl PricingEngine {
    pub fn new(config: PriceConfiguration, cache_ttl: Duration, utc_offset_hours: i32) -> Self {
        let service_offset = FixedOffset::east_opt(utc_offset_hours * 3600)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"));
        Self {
            durable: RwLock::new(config),
            cache: Mutex::new(None),
            cache_ttl,
            service_offset,
        }
    }

    pub fn quote(
        &self,
        distance_km: f64,
        duration_minutes: f64,
        at: DateTime<Utc>,
        surge: SurgeInputs,
    ) -> PriceQuote {
        let config = self.current_config();
        let local = at.with_timezone(&self.service_offset);

        let time = time_multiplier(&config, local.hour());
        let day = day_multiplier(&config, local.weekday());
        let (surge_multiplier, surge_ratio) = surge_multiplier(&config, surge);

        let base_price = config.base_fare + distance_km * config.per_km_rate;
        let price = (base_price * time * day * surge_multiplier).round();

        PriceQuote {
            price,
            base_price,
            distance_km,
            duration_minutes,
            multipliers: Multipliers {
                time,
                day,
                surge: surge_multiplier,
            },
            surge_ratio,
        }
    }

    pub fn current_config(&self) -> PriceConfiguration {
        let mut cache = self.cache.lock().expect("pricing cache poisoned");
        if let Some(cached) = cache.as_ref() {
            if cached.loaded_at.elapsed() <= self.cache_ttl {
                return cached.config.clone();
            }
        }

        let fresh = self
            .durable
            .read()
            .expect("pricing configuration poisoned")
            .clone();
        *cache = Some(CachedConfig {
            config: fresh.clone(),
            loaded_at: Instant::now(),
        });
        fresh
    }

    /// Administrative update: rewrites the durable row and invalidates
    /// the cache so the next quote sees the new constants immediately.
    pub fn update_config(&self, config: PriceConfiguration) {
        *self
            .durable
            .write()
            .expect("pricing configuration poisoned") = config;
        self.invalidate();
        info!("price configuration updated");
    }

    pub fn invalidate(&self) {
        *self.cache.lock().expect("pricing cache poisoned") = None;
    }
}

/// Rush-hour and night are mutually exclusive by construction: the rush
/// windows sit inside the daytime hours the night window excludes.
fn time_multiplier(config: &PriceConfiguration, hour: u32) -> f64 {
    if RUSH_WINDOWS
        .iter()
        .any(|&(start, end)| hour >= start && hour < end)
    {
        return config.rush_hour_multiplier;
    }
    if hour >= NIGHT_START || hour < NIGHT_END {
        return config.night_multiplier;
    }
    1.0
}

fn day_multiplier(config: &PriceConfiguration, weekday: Weekday) -> f64 {
    match weekday {
        Weekday::Sat | Weekday::Sun => config.weekend_multiplier,
        _ => 1.0,
    }
}

/// Maps the demand/supply ratio onto the five ordered tiers. Demand with
/// zero nearby supply is forced to the top tier; no demand at all means
/// no surge either way.
fn surge_multiplier(config: &PriceConfiguration, surge: SurgeInputs) -> (f64, f64) {
    if surge.pending_nearby == 0 {
        return (1.0, 0.0);
    }
    if surge.drivers_nearby == 0 {
        return (config.surge_tiers[4], surge.pending_nearby as f64);
    }

    let ratio = surge.pending_nearby as f64 / surge.drivers_nearby as f64;
    let tier = if ratio < 0.5 {
        config.surge_tiers[0]
    } else if ratio < 1.0 {
        config.surge_tiers[1]
    } else if ratio < 2.0 {
        config.surge_tiers[2]
    } else if ratio < 3.0 {
        config.surge_tiers[3]
    } else {
        config.surge_tiers[4]
    };

    (tier, ratio)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{DateTime, TimeZone, Utc};

    use super::{PricingEngine, SurgeInputs};
    use crate::models::quote::PriceConfiguration;

    fn engine() -> PricingEngine {
        PricingEngine::new(PriceConfiguration::default(), Duration::from_secs(60), 1)
    }

    /// 2024-01-02 is a Tuesday; hours below are UTC, service offset +1.
    fn tuesday_utc(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, hour, 0, 0).unwrap()
    }

    #[test]
    fn flat_afternoon_quote_matches_the_fare_formula() {
        // Local 14:00 Tuesday: no time, day, or surge multiplier.
        let quote = engine().quote(8.4, 20.0, tuesday_utc(13), SurgeInputs::default());

        assert_eq!(quote.price, 2180.0);
        assert_eq!(quote.multipliers.time, 1.0);
        assert_eq!(quote.multipliers.day, 1.0);
        assert_eq!(quote.multipliers.surge, 1.0);
    }

    #[test]
    fn quotes_are_deterministic() {
        let engine = engine();
        let a = engine.quote(10.0, 25.0, tuesday_utc(13), SurgeInputs::default());
        let b = engine.quote(10.0, 25.0, tuesday_utc(13), SurgeInputs::default());
        assert_eq!(a.price, b.price);
    }

    #[test]
    fn rush_hour_is_strictly_more_expensive_than_afternoon() {
        let engine = engine();
        // Local 08:00 vs local 14:00, same Tuesday.
        let rush = engine.quote(10.0, 25.0, tuesday_utc(7), SurgeInputs::default());
        let flat = engine.quote(10.0, 25.0, tuesday_utc(13), SurgeInputs::default());

        assert!(rush.price > flat.price);
        assert_eq!(rush.multipliers.time, 1.3);
    }

    #[test]
    fn night_and_rush_are_mutually_exclusive() {
        let engine = engine();
        // Local 23:00: night, not rush.
        let night = engine.quote(10.0, 25.0, tuesday_utc(22), SurgeInputs::default());
        assert_eq!(night.multipliers.time, 1.2);

        // Local 18:00: rush, not night.
        let evening_rush = engine.quote(10.0, 25.0, tuesday_utc(17), SurgeInputs::default());
        assert_eq!(evening_rush.multipliers.time, 1.3);
    }

    #[test]
    fn weekend_multiplier_applies_on_saturday() {
        // 2024-01-06 is a Saturday; local 14:00.
        let at = Utc.with_ymd_and_hms(2024, 1, 6, 13, 0, 0).unwrap();
        let quote = engine().quote(10.0, 25.0, at, SurgeInputs::default());
        assert_eq!(quote.multipliers.day, 1.1);
    }

    #[test]
    fn surge_tiers_follow_the_demand_supply_ratio() {
        let engine = engine();
        let at = tuesday_utc(13);

        let discount = engine.quote(
            10.0,
            25.0,
            at,
            SurgeInputs {
                pending_nearby: 1,
                drivers_nearby: 4,
            },
        );
        assert_eq!(discount.multipliers.surge, 0.9);

        let elevated = engine.quote(
            10.0,
            25.0,
            at,
            SurgeInputs {
                pending_nearby: 3,
                drivers_nearby: 2,
            },
        );
        assert_eq!(elevated.multipliers.surge, 1.25);

        let peak = engine.quote(
            10.0,
            25.0,
            at,
            SurgeInputs {
                pending_nearby: 9,
                drivers_nearby: 2,
            },
        );
        assert_eq!(peak.multipliers.surge, 2.0);
    }

    #[test]
    fn demand_with_no_supply_hits_the_top_tier() {
        let quote = engine().quote(
            10.0,
            25.0,
            tuesday_utc(13),
            SurgeInputs {
                pending_nearby: 2,
                drivers_nearby: 0,
            },
        );
        assert_eq!(quote.multipliers.surge, 2.0);
    }

    #[test]
    fn admin_update_invalidates_the_cache_immediately() {
        let engine = engine();
        let before = engine.quote(10.0, 25.0, tuesday_utc(13), SurgeInputs::default());

        let mut config = PriceConfiguration::default();
        config.per_km_rate = 400.0;
        engine.update_config(config);

        let after = engine.quote(10.0, 25.0, tuesday_utc(13), SurgeInputs::default());
        assert!(after.price > before.price);
        assert_eq!(after.price, (500.0 + 10.0 * 400.0_f64).round());
    }
}
