use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub rides_total: IntCounterVec,
    pub accept_conflicts_total: IntCounterVec,
    pub match_latency_seconds: HistogramVec,
    pub live_presence: IntGauge,
    pub position_broadcasts_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let rides_total = IntCounterVec::new(
            Opts::new("rides_total", "Ride lifecycle transitions by outcome"),
            &["outcome"],
        )
        .expect("valid rides_total metric");

        let accept_conflicts_total = IntCounterVec::new(
            Opts::new(
                "accept_conflicts_total",
                "Rejected accept attempts by reason",
            ),
            &["reason"],
        )
        .expect("valid accept_conflicts_total metric");

        let match_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "match_latency_seconds",
                "Latency of matching a created ride in seconds",
            ),
            &["outcome"],
        )
        .expect("valid match_latency_seconds metric");

        let live_presence = IntGauge::new(
            "live_presence",
            "Drivers with a non-expired presence record",
        )
        .expect("valid live_presence metric");

        let position_broadcasts_total = IntCounter::new(
            "position_broadcasts_total",
            "Position updates delivered to ride subscribers",
        )
        .expect("valid position_broadcasts_total metric");

        registry
            .register(Box::new(rides_total.clone()))
            .expect("register rides_total");
        registry
            .register(Box::new(accept_conflicts_total.clone()))
            .expect("register accept_conflicts_total");
        registry
            .register(Box::new(match_latency_seconds.clone()))
            .expect("register match_latency_seconds");
        registry
            .register(Box::new(live_presence.clone()))
            .expect("register live_presence");
        registry
            .register(Box::new(position_broadcasts_total.clone()))
            .expect("register position_broadcasts_total");

        Self {
            registry,
            rides_total,
            accept_conflicts_total,
            match_latency_seconds,
            live_presence,
            position_broadcasts_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
