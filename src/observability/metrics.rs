use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub searches_total: IntCounterVec,
    pub search_duration_seconds: HistogramVec,
    pub active_searches: IntGauge,
    pub offers_total: IntCounterVec,
    pub distance_fallbacks_total: IntCounter,
    pub route_recalculations_total: IntCounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let searches_total = IntCounterVec::new(
            Opts::new("searches_total", "Driver searches by final outcome"),
            &["outcome"],
        )
        .expect("valid searches_total metric");

        let search_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "search_duration_seconds",
                "Wall time from search start to final outcome",
            )
            .buckets(vec![1.0, 5.0, 10.0, 20.0, 30.0, 60.0, 90.0, 120.0, 180.0, 240.0]),
            &["outcome"],
        )
        .expect("valid search_duration_seconds metric");

        let active_searches = IntGauge::new("active_searches", "Driver searches in flight")
            .expect("valid active_searches metric");

        let offers_total = IntCounterVec::new(
            Opts::new("offers_total", "Driver offers by response"),
            &["outcome"],
        )
        .expect("valid offers_total metric");

        let distance_fallbacks_total = IntCounter::new(
            "distance_fallbacks_total",
            "Candidate pricing rounds that fell back to haversine",
        )
        .expect("valid distance_fallbacks_total metric");

        let route_recalculations_total = IntCounterVec::new(
            Opts::new("route_recalculations_total", "ETA recalculations by result"),
            &["result"],
        )
        .expect("valid route_recalculations_total metric");

        registry
            .register(Box::new(searches_total.clone()))
            .expect("register searches_total");
        registry
            .register(Box::new(search_duration_seconds.clone()))
            .expect("register search_duration_seconds");
        registry
            .register(Box::new(active_searches.clone()))
            .expect("register active_searches");
        registry
            .register(Box::new(offers_total.clone()))
            .expect("register offers_total");
        registry
            .register(Box::new(distance_fallbacks_total.clone()))
            .expect("register distance_fallbacks_total");
        registry
            .register(Box::new(route_recalculations_total.clone()))
            .expect("register route_recalculations_total");

        Self {
            registry,
            searches_total,
            search_duration_seconds,
            active_searches,
            offers_total,
            distance_fallbacks_total,
            route_recalculations_total,
        }
    }

    pub fn record_search(&self, outcome: &str, elapsed_secs: f64) {
        self.searches_total.with_label_values(&[outcome]).inc();
        self.search_duration_seconds
            .with_label_values(&[outcome])
            .observe(elapsed_secs);
    }

    pub fn record_offer(&self, outcome: &str) {
        self.offers_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_recalculation(&self, result: &str) {
        self.route_recalculations_total
            .with_label_values(&[result])
            .inc();
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
