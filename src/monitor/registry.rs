use chrono::{DateTime, Utc};
use hyper::Uri;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

use crate::types::BackendMetrics;

/// Mutable observed state of a single backend.
///
/// Guarded by the per-backend lock in [`BackendCell`]; the registry never
/// holds more than one backend lock at a time.
#[derive(Debug, Default)]
struct BackendState {
    alive: bool,
    ema_ms: f64,
    error_rate: f64,
    last_checked: Option<DateTime<Utc>>,
}

/// One registered backend: immutable identity plus lock-guarded state.
#[derive(Debug)]
pub struct BackendCell {
    id: usize,
    /// Canonical URL string, used as the key everywhere else (breakers,
    /// weights, admin API).
    url: String,
    uri: Uri,
    state: RwLock<BackendState>,
}

impl BackendCell {
    fn new(id: usize, url: String, uri: Uri) -> Self {
        Self {
            id,
            url,
            uri,
            state: RwLock::new(BackendState::default()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Fold a probe observation into the smoothed metrics.
    ///
    /// The first observation seeds the EMA directly; afterwards
    /// `ema = alpha * sample + (1 - alpha) * ema`. The error indicator follows
    /// the identical rule with samples in {0, 1}.
    pub async fn observe(&self, latency_ms: f64, is_error: bool, alpha: f64) {
        let mut state = self.state.write().await;

        if state.ema_ms == 0.0 {
            state.ema_ms = latency_ms;
        } else {
            state.ema_ms = alpha * latency_ms + (1.0 - alpha) * state.ema_ms;
        }

        let e = if is_error { 1.0 } else { 0.0 };
        if state.error_rate == 0.0 {
            state.error_rate = e;
        } else {
            state.error_rate = alpha * e + (1.0 - alpha) * state.error_rate;
        }

        state.last_checked = Some(Utc::now());
    }

    /// Liveness is set strictly from the current probe, never smoothed.
    pub async fn set_alive(&self, alive: bool) {
        let mut state = self.state.write().await;
        state.alive = alive;
        state.last_checked = Some(Utc::now());
    }

    pub async fn is_alive(&self) -> bool {
        self.state.read().await.alive
    }

    pub async fn metrics(&self) -> BackendMetrics {
        let state = self.state.read().await;
        BackendMetrics {
            id: self.id,
            url: self.url.clone(),
            alive: state.alive,
            ema_ms: state.ema_ms,
            error_rate: state.error_rate,
            last_checked: state
                .last_checked
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
        }
    }
}

/// Registry of all configured backends.
///
/// Owns the backend cells for the process lifetime; every other component
/// works from snapshots. Built once at startup, mutated only by the health
/// monitor.
#[derive(Debug)]
pub struct BackendRegistry {
    backends: Vec<Arc<BackendCell>>,
}

impl BackendRegistry {
    /// Build a registry from configured URL strings.
    ///
    /// Blank or unparseable entries are logged and dropped; ids are assigned
    /// over the surviving backends in input order.
    pub fn from_urls(urls: &[String]) -> Self {
        let mut backends = Vec::with_capacity(urls.len());

        for raw in urls {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                warn!("ignoring blank backend url entry");
                continue;
            }

            let uri: Uri = match trimmed.parse() {
                Ok(uri) => uri,
                Err(e) => {
                    warn!("ignoring invalid backend url {:?}: {}", raw, e);
                    continue;
                }
            };

            if uri.scheme().is_none() || uri.authority().is_none() {
                warn!("ignoring non-absolute backend url {:?}", raw);
                continue;
            }

            let id = backends.len();
            backends.push(Arc::new(BackendCell::new(id, trimmed.to_string(), uri)));
        }

        Self { backends }
    }

    pub fn backends(&self) -> &[Arc<BackendCell>] {
        &self.backends
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Produce an ordered, immutable snapshot of all backend metrics.
    ///
    /// Backend locks are taken one at a time; each entry is internally
    /// consistent but the snapshot is not a cross-backend barrier.
    pub async fn snapshot(&self) -> Vec<BackendMetrics> {
        let mut out = Vec::with_capacity(self.backends.len());
        for backend in &self.backends {
            out.push(backend.metrics().await);
        }
        out
    }

    /// URLs of the backends whose most recent probe succeeded.
    pub async fn alive_urls(&self) -> Vec<String> {
        let mut out = Vec::new();
        for backend in &self.backends {
            if backend.is_alive().await {
                out.push(backend.url.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(urls: &[&str]) -> BackendRegistry {
        let urls: Vec<String> = urls.iter().map(|s| s.to_string()).collect();
        BackendRegistry::from_urls(&urls)
    }

    #[test]
    fn test_invalid_urls_are_dropped() {
        let reg = registry(&[
            "http://localhost:8080",
            "",
            "   ",
            "not a url at all\u{7f}",
            "/relative/only",
            "http://localhost:8081",
        ]);

        assert_eq!(reg.len(), 2);
        assert_eq!(reg.backends()[0].url(), "http://localhost:8080");
        assert_eq!(reg.backends()[1].url(), "http://localhost:8081");
    }

    #[tokio::test]
    async fn test_first_observation_seeds_ema() {
        let reg = registry(&["http://localhost:8080"]);
        let cell = &reg.backends()[0];

        cell.observe(120.0, false, 0.3).await;
        let m = cell.metrics().await;
        assert_eq!(m.ema_ms, 120.0);
        assert_eq!(m.error_rate, 0.0);
        assert!(!m.last_checked.is_empty());
    }

    #[tokio::test]
    async fn test_ema_converges_to_constant_latency() {
        let reg = registry(&["http://localhost:8080"]);
        let cell = &reg.backends()[0];
        let alpha = 0.3;
        let target = 50.0;

        // Seed far away from the target, then feed N constant samples. The
        // remaining error must be bounded by (1 - alpha)^N * |target - seed|.
        cell.observe(500.0, true, alpha).await;
        let n = 20;
        for _ in 0..n {
            cell.observe(target, false, alpha).await;
        }

        let m = cell.metrics().await;
        let bound = (1.0f64 - alpha).powi(n) * (target - 500.0f64).abs();
        assert!(
            (m.ema_ms - target).abs() <= bound + 1e-9,
            "ema {} not within {} of {}",
            m.ema_ms,
            bound,
            target
        );

        // The error indicator follows the same contraction.
        let err_bound = (1.0f64 - alpha).powi(n);
        assert!(m.error_rate <= err_bound + 1e-9);
    }

    #[tokio::test]
    async fn test_alive_flag_is_not_smoothed() {
        let reg = registry(&["http://localhost:8080", "http://localhost:8081"]);

        reg.backends()[0].set_alive(true).await;
        reg.backends()[1].set_alive(true).await;
        assert_eq!(reg.alive_urls().await.len(), 2);

        // A single failed probe must remove the backend immediately.
        reg.backends()[0].set_alive(false).await;
        let alive = reg.alive_urls().await;
        assert_eq!(alive, vec!["http://localhost:8081".to_string()]);
    }

    #[tokio::test]
    async fn test_snapshot_is_ordered_by_id() {
        let reg = registry(&["http://a:1", "http://b:2", "http://c:3"]);
        let snapshot = reg.snapshot().await;
        let ids: Vec<usize> = snapshot.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }
}
