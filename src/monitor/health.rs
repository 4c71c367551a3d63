use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::registry::{BackendCell, BackendRegistry};
use crate::types::BackendMetrics;

/// Capacity of the snapshot fan-out channel; when full, fresh snapshots are
/// dropped rather than blocking the poll loop.
const UPDATES_CHANNEL_CAPACITY: usize = 10;

/// Periodic health prober over the backend registry.
///
/// Probes run in parallel within a tick; ticks are serial. Consumers either
/// pull [`HealthMonitor::snapshot`] on demand or receive pushed snapshots via
/// [`HealthMonitor::take_updates`].
pub struct HealthMonitor {
    registry: Arc<BackendRegistry>,
    client: Client,
    alpha: f64,
    period: Duration,
    updates_tx: mpsc::Sender<Vec<BackendMetrics>>,
    updates_rx: std::sync::Mutex<Option<mpsc::Receiver<Vec<BackendMetrics>>>>,
}

impl HealthMonitor {
    pub fn new(backends: &[String], period: Duration, alpha: f64, timeout: Duration) -> Self {
        let registry = Arc::new(BackendRegistry::from_urls(backends));

        // One pooled client shared by every probe task; the probe deadline is
        // enforced here.
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        let (updates_tx, updates_rx) = mpsc::channel(UPDATES_CHANNEL_CAPACITY);

        Self {
            registry,
            client,
            alpha,
            period,
            updates_tx,
            updates_rx: std::sync::Mutex::new(Some(updates_rx)),
        }
    }

    pub fn registry(&self) -> Arc<BackendRegistry> {
        Arc::clone(&self.registry)
    }

    pub async fn snapshot(&self) -> Vec<BackendMetrics> {
        self.registry.snapshot().await
    }

    pub async fn alive_urls(&self) -> Vec<String> {
        self.registry.alive_urls().await
    }

    /// Hand out the snapshot stream. There is a single consumer; subsequent
    /// calls return `None`.
    pub fn take_updates(&self) -> Option<mpsc::Receiver<Vec<BackendMetrics>>> {
        self.updates_rx
            .lock()
            .ok()
            .and_then(|mut guard| guard.take())
    }

    /// Launch the poll loop. An initial tick runs immediately; the loop exits
    /// when the cancellation token fires.
    pub fn start_polling(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            monitor.poll_once().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("health monitor stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        monitor.poll_once().await;
                    }
                }
            }
        })
    }

    /// One full tick: probe every backend in parallel, wait for all probes,
    /// then offer the fresh snapshot to the updates channel.
    pub async fn poll_once(&self) {
        let mut probes = Vec::with_capacity(self.registry.len());
        for backend in self.registry.backends() {
            let client = self.client.clone();
            let backend = Arc::clone(backend);
            let alpha = self.alpha;
            probes.push(tokio::spawn(async move {
                probe_backend(&client, &backend, alpha).await;
            }));
        }
        for probe in probes {
            let _ = probe.await;
        }

        let metrics = self.registry.snapshot().await;
        match self.updates_tx.try_send(metrics) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("metric updates channel full, dropping snapshot");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("metric updates channel closed");
            }
        }
    }
}

/// Issue one GET probe and fold the outcome into the backend state.
///
/// The probe path is rewritten to `/health` when the configured URL has no
/// path of its own. Any transport error or non-200 status counts as an error
/// sample and marks the backend dead.
async fn probe_backend(client: &Client, backend: &BackendCell, alpha: f64) {
    let uri = backend.uri();
    let target = if uri.path().is_empty() || uri.path() == "/" {
        format!(
            "{}://{}/health",
            uri.scheme_str().unwrap_or("http"),
            uri.authority().map(|a| a.as_str()).unwrap_or_default()
        )
    } else {
        backend.url().to_string()
    };

    let started = Instant::now();
    let outcome = client.get(&target).send().await;
    let latency_ms = started.elapsed().as_millis() as f64;

    let is_error = match outcome {
        Ok(response) if response.status().as_u16() == 200 => {
            backend.set_alive(true).await;
            false
        }
        Ok(response) => {
            backend.set_alive(false).await;
            debug!(
                backend = backend.url(),
                status = response.status().as_u16(),
                "health probe returned non-200 status"
            );
            true
        }
        Err(e) => {
            backend.set_alive(false).await;
            debug!(backend = backend.url(), "health probe failed: {}", e);
            true
        }
    };

    backend.observe(latency_ms, is_error, alpha).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(urls: &[&str]) -> Arc<HealthMonitor> {
        let urls: Vec<String> = urls.iter().map(|s| s.to_string()).collect();
        Arc::new(HealthMonitor::new(
            &urls,
            Duration::from_secs(1),
            0.3,
            Duration::from_secs(2),
        ))
    }

    #[tokio::test]
    async fn test_updates_receiver_is_single_consumer() {
        let m = monitor(&["http://localhost:8080"]);
        assert!(m.take_updates().is_some());
        assert!(m.take_updates().is_none());
    }

    #[tokio::test]
    async fn test_snapshot_of_unprobed_backends() {
        let m = monitor(&["http://localhost:8080", "http://localhost:8081"]);
        let snapshot = m.snapshot().await;

        assert_eq!(snapshot.len(), 2);
        for entry in &snapshot {
            assert!(!entry.alive);
            assert_eq!(entry.ema_ms, 0.0);
            assert!(entry.last_checked.is_empty());
        }
        assert!(m.alive_urls().await.is_empty());
    }
}
