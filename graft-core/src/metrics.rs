//! Statement and transaction metrics, recorded when the `metrics` feature is on.

use std::time::Duration;

#[cfg(feature = "metrics")]
use metrics_exporter_prometheus::PrometheusBuilder;
#[cfg(feature = "metrics")]
pub use metrics_exporter_prometheus::PrometheusHandle;

/// Install the Prometheus recorder and return the handle for scraping.
#[cfg(feature = "metrics")]
pub fn install_prometheus_recorder() -> Result<PrometheusHandle, Box<dyn std::error::Error>> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(handle)
}

/// Record connection pool stats of `db` as gauges.
#[cfg(feature = "metrics")]
pub async fn record_pool_stats(db: &crate::Graft) {
    let handle = db.lock().await;
    let url = handle.config.url.clone();
    metrics::gauge!("graft.pool.size", "url" => url.clone()).set(f64::from(handle.pool.size()));
    metrics::gauge!("graft.pool.idle", "url" => url).set(handle.pool.num_idle() as f64);
}

/// Records statement count and latency per operation and table.
#[cfg(feature = "metrics")]
pub(crate) fn record_query_metrics(operation: &str, table: &str, elapsed: Duration) {
    let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
    let labels = [
        ("operation", operation.to_owned()),
        ("table", table.to_owned()),
    ];
    metrics::histogram!("graft.query.duration_ms", &labels).record(elapsed_ms);
    metrics::counter!("graft.query.count", &labels).increment(1);
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_query_metrics(_operation: &str, _table: &str, _elapsed: Duration) {}

/// Records a rolled-back transaction for an entry point.
#[cfg(feature = "metrics")]
pub(crate) fn record_rollback(operation: &'static str) {
    metrics::counter!("graft.transaction.rollback", "operation" => operation).increment(1);
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_rollback(_operation: &'static str) {}
