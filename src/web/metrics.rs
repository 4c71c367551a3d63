use hyper::{Body, Response, StatusCode};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::breaker::BreakerFleet;
use crate::monitor::HealthMonitor;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder. Safe to call more than once; only the
/// first install wins (tests may race on the global recorder).
pub fn init_prometheus() {
    if PROMETHEUS_HANDLE.get().is_some() {
        return;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = PROMETHEUS_HANDLE.set(handle);
        }
        Err(e) => {
            debug!("Prometheus recorder install skipped: {}", e);
        }
    }
}

/// Render the Prometheus exposition text for GET /metrics.
pub fn render() -> Result<Response<Body>, hyper::http::Error> {
    let body = PROMETHEUS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_default();

    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/plain; version=0.0.4")
        .body(Body::from(body))
}

/// Periodically refresh gauges from the registry and breaker fleet.
pub fn start_collection_loop(
    monitor: Arc<HealthMonitor>,
    fleet: Arc<BreakerFleet>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => collect(&monitor, &fleet).await,
            }
        }
    });
}

async fn collect(monitor: &HealthMonitor, fleet: &BreakerFleet) {
    let snapshot = monitor.snapshot().await;
    let alive = snapshot.iter().filter(|m| m.alive).count();

    metrics::gauge!("drover_backends_total").set(snapshot.len() as f64);
    metrics::gauge!("drover_backends_alive").set(alive as f64);

    for entry in &snapshot {
        let labels = [("backend", entry.url.clone())];

        metrics::gauge!("drover_backend_alive", &labels).set(if entry.alive { 1.0 } else { 0.0 });
        metrics::gauge!("drover_backend_ema_ms", &labels).set(entry.ema_ms);
        metrics::gauge!("drover_backend_error_rate", &labels).set(entry.error_rate);
    }

    metrics::gauge!("drover_breakers_open").set(fleet.open_count().await as f64);
}
