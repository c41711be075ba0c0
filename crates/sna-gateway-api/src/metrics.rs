use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref CACHE_HITS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("gateway_cache_hits_total", "Requests answered from the result cache"),
        &["resource"]
    )
    .expect("valid metric");

    pub static ref FETCHES_STARTED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("gateway_fetches_started_total", "Background fetches launched"),
        &["resource"]
    )
    .expect("valid metric");

    pub static ref FETCH_OUTCOMES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("gateway_fetch_outcomes_total", "Terminal statuses written by background fetches"),
        &["resource", "status"]
    )
    .expect("valid metric");

    pub static ref ARTIFACTS_DROPPED_TOTAL: IntCounter = IntCounter::new(
        "gateway_artifacts_dropped_total",
        "Artifacts left out of merged responses for lack of a PageRank entry"
    )
    .expect("valid metric");

    pub static ref PAGERANK_REFRESHES_TOTAL: IntCounter = IntCounter::new(
        "gateway_pagerank_refreshes_total",
        "Full PageRank table replacements"
    )
    .expect("valid metric");

    pub static ref FETCHES_IN_FLIGHT: IntGauge = IntGauge::new(
        "gateway_fetches_in_flight",
        "Background fetches currently registered in the fetch pool"
    )
    .expect("valid metric");

    pub static ref REGISTRY: Registry = {
        let registry = Registry::new();
        let _ = registry.register(Box::new(CACHE_HITS_TOTAL.clone()));
        let _ = registry.register(Box::new(FETCHES_STARTED_TOTAL.clone()));
        let _ = registry.register(Box::new(FETCH_OUTCOMES_TOTAL.clone()));
        let _ = registry.register(Box::new(ARTIFACTS_DROPPED_TOTAL.clone()));
        let _ = registry.register(Box::new(PAGERANK_REFRESHES_TOTAL.clone()));
        let _ = registry.register(Box::new(FETCHES_IN_FLIGHT.clone()));
        registry
    };
}

/// Prometheus text exposition of every gateway metric.
pub fn render() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_lists_registered_metrics() {
        PAGERANK_REFRESHES_TOTAL.inc();
        FETCHES_STARTED_TOTAL.with_label_values(&["artifact_metrics"]).inc();
        let text = render().unwrap();
        assert!(text.contains("gateway_pagerank_refreshes_total"));
        assert!(text.contains("gateway_fetches_started_total{resource=\"artifact_metrics\"}"));
    }
}
