use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::optimizer::WeightOptimizer;
use crate::types::BackendMetrics;

/// Policy-driven choice over an eligible backend list.
///
/// A single atomic counter is shared by every policy, so switching algorithms
/// never resets rotation.
pub struct BackendSelector {
    counter: AtomicU64,
}

impl Default for BackendSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendSelector {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    /// Plain rotation over the eligible list.
    pub fn round_robin(&self, backends: &[String]) -> Option<String> {
        if backends.is_empty() {
            return None;
        }

        let tick = self.counter.fetch_add(1, Ordering::Relaxed);
        Some(backends[(tick % backends.len() as u64) as usize].clone())
    }

    /// Weighted rotation using the optimizer's adaptive weights.
    ///
    /// Weights are refreshed from the given snapshot on every call; backends
    /// missing from the weight map count as 1.0.
    pub async fn weighted_round_robin(
        &self,
        backends: &[String],
        metrics: &[BackendMetrics],
        optimizer: &WeightOptimizer,
    ) -> Option<String> {
        let adaptive = optimizer.update_weights(metrics).await;
        self.weighted_from(backends, &adaptive)
    }

    pub(crate) fn weighted_from(
        &self,
        backends: &[String],
        adaptive: &HashMap<String, f64>,
    ) -> Option<String> {
        if backends.is_empty() {
            return None;
        }

        let mut total = 0.0;
        let weights: Vec<f64> = backends
            .iter()
            .map(|backend| {
                let weight = adaptive
                    .get(backend)
                    .copied()
                    .filter(|w| *w > 0.0)
                    .unwrap_or(1.0);
                total += weight;
                weight
            })
            .collect();

        if total <= 0.0 {
            return self.round_robin(backends);
        }

        let tick = self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let target = (tick % 1000) as f64 / 1000.0 * total;

        // Walk the eligible list in stable order and pick the first backend
        // whose cumulative weight covers the target.
        let mut cumulative = 0.0;
        for (i, weight) in weights.iter().enumerate() {
            cumulative += weight;
            if target <= cumulative {
                return Some(backends[i].clone());
            }
        }

        Some(backends[0].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::WeightConfig;

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_round_robin_visits_each_backend_once_per_window() {
        let selector = BackendSelector::new();
        let backends = urls(&["http://a:1", "http://b:2", "http://c:3"]);

        // Any window of k consecutive selections over a stable set contains
        // each backend exactly once.
        for _ in 0..5 {
            let mut seen = std::collections::HashSet::new();
            for _ in 0..backends.len() {
                seen.insert(selector.round_robin(&backends).unwrap());
            }
            assert_eq!(seen.len(), backends.len());
        }
    }

    #[test]
    fn test_round_robin_empty_list() {
        let selector = BackendSelector::new();
        assert!(selector.round_robin(&[]).is_none());
    }

    #[tokio::test]
    async fn test_weighted_matches_round_robin_when_uniform() {
        // With the optimizer disabled every alive backend weighs 1.0, so the
        // weighted policy must split traffic evenly, like plain round robin.
        let optimizer = WeightOptimizer::new(WeightConfig {
            enabled: false,
            ..Default::default()
        });
        let selector = BackendSelector::new();
        let backends = urls(&["http://a:1", "http://b:2"]);
        let metrics = vec![
            BackendMetrics {
                id: 0,
                url: "http://a:1".to_string(),
                alive: true,
                ema_ms: 10.0,
                error_rate: 0.0,
                last_checked: String::new(),
            },
            BackendMetrics {
                id: 1,
                url: "http://b:2".to_string(),
                alive: true,
                ema_ms: 10.0,
                error_rate: 0.0,
                last_checked: String::new(),
            },
        ];

        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..2000 {
            let pick = selector
                .weighted_round_robin(&backends, &metrics, &optimizer)
                .await
                .unwrap();
            *counts.entry(pick).or_default() += 1;
        }

        let a = counts["http://a:1"];
        let b = counts["http://b:2"];
        assert!((900..=1100).contains(&a), "a got {}", a);
        assert!((900..=1100).contains(&b), "b got {}", b);
    }

    #[test]
    fn test_weighted_prefers_heavier_backend() {
        let selector = BackendSelector::new();
        let backends = urls(&["http://heavy:1", "http://light:2"]);
        let mut weights = HashMap::new();
        weights.insert("http://heavy:1".to_string(), 4.0);
        weights.insert("http://light:2".to_string(), 1.0);

        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..1000 {
            let pick = selector.weighted_from(&backends, &weights).unwrap();
            *counts.entry(pick).or_default() += 1;
        }

        assert!(
            counts["http://heavy:1"] > 3 * counts["http://light:2"],
            "distribution was {:?}",
            counts
        );
    }

    #[test]
    fn test_weighted_defaults_missing_backends_to_one() {
        let selector = BackendSelector::new();
        let backends = urls(&["http://known:1", "http://unknown:2"]);
        let mut weights = HashMap::new();
        weights.insert("http://known:1".to_string(), 1.0);

        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            seen.insert(selector.weighted_from(&backends, &weights).unwrap());
        }
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_counter_is_shared_across_policies() {
        let selector = BackendSelector::new();
        let backends = urls(&["http://a:1", "http://b:2"]);

        let first = selector.round_robin(&backends).unwrap();
        // A weighted call advances the same counter.
        let weights: HashMap<String, f64> = HashMap::new();
        selector.weighted_from(&backends, &weights);
        let third = selector.round_robin(&backends).unwrap();
        assert_eq!(first, third, "counter should have advanced by two");
    }
}
