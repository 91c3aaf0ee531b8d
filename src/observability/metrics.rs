use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub resolutions_total: IntCounterVec,
    pub location_polls_total: IntCounterVec,
    pub route_requests_total: IntCounterVec,
    pub route_latency_seconds: HistogramVec,
    pub active_sessions: IntGauge,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let resolutions_total = IntCounterVec::new(
            Opts::new("resolutions_total", "Assignment resolutions by outcome"),
            &["outcome"],
        )
        .expect("valid resolutions_total metric");

        let location_polls_total = IntCounterVec::new(
            Opts::new("location_polls_total", "Latest-fix fetches by outcome"),
            &["outcome"],
        )
        .expect("valid location_polls_total metric");

        let route_requests_total = IntCounterVec::new(
            Opts::new("route_requests_total", "Routing service requests by leg and outcome"),
            &["leg", "outcome"],
        )
        .expect("valid route_requests_total metric");

        let route_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "route_latency_seconds",
                "Latency of routing service requests in seconds",
            ),
            &["leg"],
        )
        .expect("valid route_latency_seconds metric");

        let active_sessions = IntGauge::new("active_sessions", "Currently mounted tracking sessions")
            .expect("valid active_sessions metric");

        registry
            .register(Box::new(resolutions_total.clone()))
            .expect("register resolutions_total");
        registry
            .register(Box::new(location_polls_total.clone()))
            .expect("register location_polls_total");
        registry
            .register(Box::new(route_requests_total.clone()))
            .expect("register route_requests_total");
        registry
            .register(Box::new(route_latency_seconds.clone()))
            .expect("register route_latency_seconds");
        registry
            .register(Box::new(active_sessions.clone()))
            .expect("register active_sessions");

        Self {
            registry,
            resolutions_total,
            location_polls_total,
            route_requests_total,
            route_latency_seconds,
            active_sessions,
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
