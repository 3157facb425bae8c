use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;
use uuid::Uuid;

use crate::broadcast::RideChannels;
use crate::config::Config;
use crate::engine::matching::MatchPolicy;
use crate::engine::pricing::{PricingEngine, SurgeInputs};
use crate::external::{
    LogNotifier, LogPaymentRecorder, Notifier, PaymentRecorder, RoutePlanner,
};
use crate::geo::{GeoPoint, haversine_km};
use crate::models::quote::PriceConfiguration;
use crate::models::ride::{Ride, RideEvent, RideStatus};
use crate::observability::metrics::Metrics;
use crate::store::{DriverDirectory, MemoryPresenceStore, PresenceStore};

pub struct AppState {
    pub config: Config,
    /// Durable ride table; the authoritative lock domain for the accept
    /// transition (per-row locking via the map entry).
    pub rides: DashMap<Uuid, Ride>,
    /// driver id -> the one ride currently holding them, non-terminal.
    pub active_rides: DashMap<Uuid, Uuid>,
    pub presence: Arc<dyn PresenceStore>,
    pub directory: DriverDirectory,
    pub pricing: PricingEngine,
    pub channels: RideChannels,
    pub planner: RoutePlanner,
    pub notifier: Arc<dyn Notifier>,
    pub payments: Arc<dyn PaymentRecorder>,
    pub dispatch_tx: mpsc::Sender<Uuid>,
    pub ride_events_tx: broadcast::Sender<RideEvent>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: Config) -> (Self, mpsc::Receiver<Uuid>) {
        let presence = Arc::new(MemoryPresenceStore::new(Duration::from_secs(
            config.presence_ttl_secs,
        )));
        Self::with_collaborators(
            config.clone(),
            presence,
            RoutePlanner::great_circle(config.fallback_speed_kmh),
            Arc::new(LogNotifier),
            Arc::new(LogPaymentRecorder),
        )
    }

    /// Constructor with explicit collaborator seams; tests inject failing
    /// stores and routing here.
    pub fn with_collaborators(
        config: Config,
        presence: Arc<dyn PresenceStore>,
        planner: RoutePlanner,
        notifier: Arc<dyn Notifier>,
        payments: Arc<dyn PaymentRecorder>,
    ) -> (Self, mpsc::Receiver<Uuid>) {
        let (dispatch_tx, dispatch_rx) = mpsc::channel(config.dispatch_queue_size);
        let (ride_events_tx, _unused_rx) = broadcast::channel(config.event_buffer_size);
        let pricing = PricingEngine::new(
            PriceConfiguration::default(),
            Duration::from_secs(config.pricing_cache_ttl_secs),
            config.utc_offset_hours,
        );
        let channels = RideChannels::new(config.event_buffer_size);

        (
            Self {
                config,
                rides: DashMap::new(),
                active_rides: DashMap::new(),
                presence,
                directory: DriverDirectory::new(),
                pricing,
                channels,
                planner,
                notifier,
                payments,
                dispatch_tx,
                ride_events_tx,
                metrics: Metrics::new(),
            },
            dispatch_rx,
        )
    }

    pub fn match_policy(&self) -> MatchPolicy {
        MatchPolicy {
            max_search_radius_km: self.config.max_search_radius_km,
            preferred_radius_km: self.config.preferred_radius_km,
            min_match_score: self.config.min_match_score,
        }
    }

    /// Demand/supply snapshot around a pickup: pending requests created
    /// within the lookback window inside the demand radius, against
    /// available drivers inside the supply radius. A degraded presence
    /// store degrades supply to the durable directory.
    pub fn surge_inputs(&self, pickup: &GeoPoint) -> SurgeInputs {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.config.surge_lookback_secs);
        let pending_nearby = self
            .rides
            .iter()
            .filter(|entry| {
                let ride = entry.value();
                ride.status == RideStatus::Pending
                    && ride.created_at >= cutoff
                    && haversine_km(&ride.pickup.point, pickup)
                        <= self.config.surge_demand_radius_km
            })
            .count();

        let drivers_nearby = match self.presence.list_available() {
            Ok(available) => available
                .iter()
                .filter(|p| haversine_km(&p.location, pickup) <= self.config.surge_supply_radius_km)
                .count(),
            Err(err) => {
                warn!(error = %err, "presence store degraded, sampling supply from directory");
                self.directory
                    .find_nearby(pickup, self.config.surge_supply_radius_km)
                    .len()
            }
        };

        SurgeInputs {
            pending_nearby,
            drivers_nearby,
        }
    }

    pub fn emit_ride_event(&self, ride: &Ride, actor: Option<Uuid>) {
        let _ = self.ride_events_tx.send(RideEvent {
            ride_id: ride.id,
            status: ride.status,
            actor,
            at: Utc::now(),
        });
    }
}
