use std::sync::Once;

use autometrics::prometheus_exporter;
use lazy_static::lazy_static;
use prometheus::exponential_buckets;
use prometheus::histogram_opts;
use prometheus::Encoder;
use prometheus::HistogramVec;
use prometheus::IntCounterVec;
use prometheus::IntGaugeVec;
use prometheus::Opts;
use prometheus::Registry;
use tracing::warn;


lazy_static! {
    pub static ref LOG_APPENDED_ENTRIES: IntCounterVec = IntCounterVec::new(
        Opts::new("log_appended_entries", "Entries durably appended to the log"),
        &["backend"]
    )
    .expect("metric can not be created");

    pub static ref LOG_APPEND_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("log_append_failures", "Append calls that stopped before the whole batch was durable"),
        &["backend"]
    )
    .expect("metric can not be created");

    pub static ref LOG_APPEND_LATENCY_MS: HistogramVec = HistogramVec::new(
        histogram_opts!(
            "log_append_latency_ms",
            "Latency of a durable append batch in ms",
            exponential_buckets(0.05, 2.0, 16).expect("valid buckets")
        ),
        &["backend"]
    )
    .expect("metric can not be created");

    pub static ref LOG_TRUNCATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("log_truncations", "Prefix/suffix truncations and resets"),
        &["backend", "kind"]
    )
    .expect("metric can not be created");

    pub static ref SNAPSHOT_COMMITS: IntCounterVec = IntCounterVec::new(
        Opts::new("snapshot_commits", "Snapshot writers committed as the latest snapshot"),
        &["backend"]
    )
    .expect("metric can not be created");

    pub static ref SNAPSHOT_OPEN_READERS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("snapshot_open_readers", "Snapshot readers currently open"),
        &["backend"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

static REGISTER_DEFAULT: Once = Once::new();

pub fn register_custom_metrics(registry: &Registry) -> prometheus::Result<()> {
    registry.register(Box::new(LOG_APPENDED_ENTRIES.clone()))?;
    registry.register(Box::new(LOG_APPEND_FAILURES.clone()))?;
    registry.register(Box::new(LOG_APPEND_LATENCY_MS.clone()))?;
    registry.register(Box::new(LOG_TRUNCATIONS.clone()))?;
    registry.register(Box::new(SNAPSHOT_COMMITS.clone()))?;
    registry.register(Box::new(SNAPSHOT_OPEN_READERS.clone()))?;
    Ok(())
}

/// Text exposition of the storage collectors plus the autometrics series.
///
/// The crate does not serve HTTP; embedders hand this body to whatever
/// endpoint they expose.
pub fn gather_metrics() -> String {
    REGISTER_DEFAULT.call_once(|| {
        if let Err(e) = register_custom_metrics(&REGISTRY) {
            warn!("could not register storage metrics: {}", e);
        }
    });

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        warn!("could not encode storage metrics: {}", e);
    }
    let mut body = String::from_utf8(buffer).unwrap_or_default();
    body.push_str(&get_metrics_body());
    body
}

/// Export autometrics series for Prometheus to scrape
pub fn get_metrics_body() -> String {
    prometheus_exporter::encode_http_response().into_body()
}
