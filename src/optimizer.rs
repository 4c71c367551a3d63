use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::types::BackendMetrics;

/// Configuration for adaptive weight calculation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WeightConfig {
    pub enabled: bool,
    pub min_weight: f64,
    pub max_weight: f64,
    /// Emphasis given to the latency score; the two emphases need not sum to 1
    pub latency_weight: f64,
    pub error_rate_weight: f64,
    /// Smoothing factor applied between the recommended and previous weight
    pub adaptation_speed: f64,
    pub latency_target_ms: f64,
    pub max_error_rate: f64,
    pub update_interval_s: u64,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_weight: 0.1,
            max_weight: 5.0,
            latency_weight: 0.6,
            error_rate_weight: 0.4,
            adaptation_speed: 0.1,
            latency_target_ms: 100.0,
            max_error_rate: 0.1,
            update_interval_s: 10,
        }
    }
}

/// Calculated routing weight for one backend.
#[derive(Debug, Clone, Serialize)]
pub struct BackendWeight {
    pub url: String,
    pub weight: f64,
    pub latency_score: f64,
    pub error_rate_score: f64,
    pub combined_score: f64,
    pub previous_weight: f64,
    pub weight_change: f64,
    pub recommended_weight: f64,
    pub last_updated: DateTime<Utc>,
}

/// Derives per-backend routing weights from metric snapshots.
///
/// A pure function of (snapshot, previously stored weight, config): scoring
/// maps latency and error rate into [0.01, 1.0] sub-scores, the combined score
/// maps linearly into the configured weight range, and exponential smoothing
/// against the prior weight damps oscillation.
pub struct WeightOptimizer {
    config: WeightConfig,
    weights: RwLock<HashMap<String, BackendWeight>>,
}

impl WeightOptimizer {
    pub fn new(config: WeightConfig) -> Self {
        Self {
            config,
            weights: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &WeightConfig {
        &self.config
    }

    /// Recompute weights from a fresh snapshot and return the url → weight map.
    pub async fn update_weights(&self, metrics: &[BackendMetrics]) -> HashMap<String, f64> {
        if !self.config.enabled || metrics.is_empty() {
            return self.default_weights(metrics);
        }

        let mut store = self.weights.write().await;
        let mut new_weights = HashMap::with_capacity(metrics.len());
        let now = Utc::now();

        for metric in metrics {
            if !metric.alive {
                // Dead backends get the floor weight without scoring.
                new_weights.insert(metric.url.clone(), self.config.min_weight);
                continue;
            }

            let latency_score = self.latency_score(metric.ema_ms);
            let error_rate_score = self.error_rate_score(metric.error_rate);
            let combined_score = self.config.latency_weight * latency_score
                + self.config.error_rate_weight * error_rate_score;
            let recommended = self.score_to_weight(combined_score);

            let previous_weight = store.get(&metric.url).map(|w| w.weight);
            let final_weight = match previous_weight {
                Some(prev) => self.smooth(prev, recommended),
                None => recommended,
            }
            .clamp(self.config.min_weight, self.config.max_weight);

            let previous_weight = previous_weight.unwrap_or(1.0);
            store.insert(
                metric.url.clone(),
                BackendWeight {
                    url: metric.url.clone(),
                    weight: final_weight,
                    latency_score,
                    error_rate_score,
                    combined_score,
                    previous_weight,
                    weight_change: final_weight - previous_weight,
                    recommended_weight: recommended,
                    last_updated: now,
                },
            );

            new_weights.insert(metric.url.clone(), final_weight);
        }

        self.log_weight_changes(&store);
        new_weights
    }

    /// All stored weight records, copied out.
    pub async fn weights(&self) -> HashMap<String, BackendWeight> {
        self.weights.read().await.clone()
    }

    /// Current weight for one backend; 1.0 when it has never been scored.
    pub async fn weight_for(&self, url: &str) -> f64 {
        self.weights
            .read()
            .await
            .get(url)
            .map(|w| w.weight)
            .unwrap_or(1.0)
    }

    pub async fn stats(&self) -> OptimizerStats {
        let store = self.weights.read().await;
        let count = store.len();

        let mut total_weight = 0.0;
        let mut avg_latency_score = 0.0;
        let mut avg_error_score = 0.0;
        for weight in store.values() {
            total_weight += weight.weight;
            avg_latency_score += weight.latency_score;
            avg_error_score += weight.error_rate_score;
        }
        if count > 0 {
            avg_latency_score /= count as f64;
            avg_error_score /= count as f64;
        }

        OptimizerStats {
            enabled: self.config.enabled,
            backends_count: count,
            total_weight,
            avg_weight: if count > 0 {
                total_weight / count as f64
            } else {
                0.0
            },
            avg_latency_score,
            avg_error_score,
            config: self.config.clone(),
        }
    }

    /// Lower latency scores higher; an exponential curve penalizes backends
    /// far past the latency target.
    fn latency_score(&self, latency_ms: f64) -> f64 {
        if latency_ms <= 0.0 {
            return 1.0;
        }

        let ratio = latency_ms / self.config.latency_target_ms;
        (-ratio * 2.0).exp().clamp(0.01, 1.0)
    }

    fn error_rate_score(&self, error_rate: f64) -> f64 {
        if error_rate <= 0.0 {
            return 1.0;
        }
        if error_rate >= self.config.max_error_rate {
            return 0.01;
        }

        (1.0 - error_rate / self.config.max_error_rate).clamp(0.01, 1.0)
    }

    /// Linear map of a combined score in [0,1] onto [min_weight, max_weight].
    fn score_to_weight(&self, score: f64) -> f64 {
        let range = self.config.max_weight - self.config.min_weight;
        (self.config.min_weight + score * range).clamp(self.config.min_weight, self.config.max_weight)
    }

    fn smooth(&self, previous: f64, recommended: f64) -> f64 {
        let alpha = self.config.adaptation_speed;
        alpha * recommended + (1.0 - alpha) * previous
    }

    fn default_weights(&self, metrics: &[BackendMetrics]) -> HashMap<String, f64> {
        let mut weights = HashMap::with_capacity(metrics.len());
        for metric in metrics {
            let weight = if metric.alive {
                1.0
            } else {
                self.config.min_weight
            };
            weights.insert(metric.url.clone(), weight);
        }
        weights
    }

    /// Surface significant weight shifts (> 0.1) as advisory log lines.
    fn log_weight_changes(&self, store: &HashMap<String, BackendWeight>) {
        for (url, weight) in store {
            if weight.weight_change.abs() > 0.1 {
                info!(
                    backend = %url,
                    previous = weight.previous_weight,
                    current = weight.weight,
                    latency_score = weight.latency_score,
                    error_score = weight.error_rate_score,
                    "backend weight adjusted"
                );
            } else {
                debug!(
                    backend = %url,
                    weight = weight.weight,
                    "backend weight unchanged"
                );
            }
        }
    }
}

/// Optimizer summary for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizerStats {
    pub enabled: bool,
    pub backends_count: usize,
    pub total_weight: f64,
    pub avg_weight: f64,
    pub avg_latency_score: f64,
    pub avg_error_score: f64,
    pub config: WeightConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(url: &str, alive: bool, ema_ms: f64, error_rate: f64) -> BackendMetrics {
        BackendMetrics {
            id: 0,
            url: url.to_string(),
            alive,
            ema_ms,
            error_rate,
            last_checked: String::new(),
        }
    }

    #[tokio::test]
    async fn test_weights_stay_within_bounds() {
        let config = WeightConfig::default();
        let (min, max) = (config.min_weight, config.max_weight);
        let optimizer = WeightOptimizer::new(config);

        let extremes = vec![
            metric("http://fast:1", true, 0.0, 0.0),
            metric("http://slow:2", true, 100_000.0, 1.0),
            metric("http://dead:3", false, 1.0, 0.0),
        ];

        for _ in 0..10 {
            let weights = optimizer.update_weights(&extremes).await;
            for (url, w) in &weights {
                assert!(
                    (min..=max).contains(w),
                    "weight {} for {} out of [{}, {}]",
                    w,
                    url,
                    min,
                    max
                );
            }
        }
    }

    #[tokio::test]
    async fn test_dead_backend_gets_min_weight() {
        let optimizer = WeightOptimizer::new(WeightConfig::default());
        let weights = optimizer
            .update_weights(&[metric("http://dead:1", false, 5.0, 0.0)])
            .await;
        assert_eq!(weights["http://dead:1"], 0.1);
    }

    #[tokio::test]
    async fn test_fast_backend_outweighs_slow_backend() {
        // Latency-only scoring with a 100 ms target: a 50 ms backend must end
        // up at least twice the weight of a 400 ms backend within five cycles.
        let optimizer = WeightOptimizer::new(WeightConfig {
            latency_weight: 1.0,
            error_rate_weight: 0.0,
            min_weight: 0.1,
            max_weight: 5.0,
            latency_target_ms: 100.0,
            ..Default::default()
        });

        let metrics = vec![
            metric("http://a:1", true, 50.0, 0.0),
            metric("http://b:2", true, 400.0, 0.0),
        ];

        let mut weights = HashMap::new();
        for _ in 0..5 {
            weights = optimizer.update_weights(&metrics).await;
        }

        let (a, b) = (weights["http://a:1"], weights["http://b:2"]);
        assert!(a >= 2.0 * b, "expected {} >= 2 * {}", a, b);
    }

    #[tokio::test]
    async fn test_deterministic_given_same_inputs() {
        let make = || {
            WeightOptimizer::new(WeightConfig {
                adaptation_speed: 0.5,
                ..Default::default()
            })
        };
        let metrics = vec![
            metric("http://a:1", true, 80.0, 0.02),
            metric("http://b:2", true, 250.0, 0.0),
        ];

        let first = make();
        let second = make();
        for _ in 0..3 {
            let w1 = first.update_weights(&metrics).await;
            let w2 = second.update_weights(&metrics).await;
            assert_eq!(w1, w2);
        }
    }

    #[tokio::test]
    async fn test_disabled_optimizer_returns_defaults() {
        let optimizer = WeightOptimizer::new(WeightConfig {
            enabled: false,
            ..Default::default()
        });

        let weights = optimizer
            .update_weights(&[
                metric("http://a:1", true, 900.0, 0.9),
                metric("http://b:2", false, 1.0, 0.0),
            ])
            .await;

        assert_eq!(weights["http://a:1"], 1.0);
        assert_eq!(weights["http://b:2"], 0.1);
        // Nothing is stored when disabled.
        assert!(optimizer.weights().await.is_empty());
    }

    #[tokio::test]
    async fn test_error_rate_penalty() {
        let optimizer = WeightOptimizer::new(WeightConfig {
            latency_weight: 0.0,
            error_rate_weight: 1.0,
            max_error_rate: 0.1,
            adaptation_speed: 1.0,
            ..Default::default()
        });

        let weights = optimizer
            .update_weights(&[
                metric("http://clean:1", true, 10.0, 0.0),
                metric("http://half:2", true, 10.0, 0.05),
                metric("http://bad:3", true, 10.0, 0.5),
            ])
            .await;

        assert!(weights["http://clean:1"] > weights["http://half:2"]);
        assert!(weights["http://half:2"] > weights["http://bad:3"]);
        // At or past the error ceiling the score floors out near min weight.
        assert!(weights["http://bad:3"] < 0.2);
    }

    #[tokio::test]
    async fn test_smoothing_dampens_first_step() {
        let optimizer = WeightOptimizer::new(WeightConfig {
            latency_weight: 1.0,
            error_rate_weight: 0.0,
            adaptation_speed: 0.1,
            ..Default::default()
        });

        // First observation takes the recommendation directly.
        let fast = [metric("http://a:1", true, 1.0, 0.0)];
        let w0 = optimizer.update_weights(&fast).await["http://a:1"];

        // A sudden collapse moves only 10% of the way per cycle.
        let slow = [metric("http://a:1", true, 10_000.0, 0.0)];
        let w1 = optimizer.update_weights(&slow).await["http://a:1"];
        assert!(w1 > w0 * 0.8, "smoothing should damp the drop: {} -> {}", w0, w1);
    }
}
