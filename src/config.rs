use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::time::Duration;
use tracing::info;

use crate::error::{DroverError, DroverResult};

// Re-export the per-subsystem configs that are part of the config file API
pub use crate::breaker::CircuitBreakerConfig;
pub use crate::optimizer::WeightConfig;
pub use crate::ratelimit::{RateLimitAlgorithm, RateLimiterConfig};

/// A single backend entry as configured by the operator.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    pub url: String,
    pub weight: f64,
    pub enabled: bool,
}

/// Load balancing policies understood by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    RoundRobin,
    WeightedRoundRobin,
    LeastConnections,
}

/// Front-door proxy settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    pub algorithm: Algorithm,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub timeout_ms: u64,
    pub port: u16,
}

impl ProxyConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Health monitor settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    /// EMA smoothing factor
    pub alpha: f64,
    pub period_s: u64,
    pub timeout_s: u64,
}

impl MonitorConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_s)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_s)
    }
}

/// Metrics / admin listener settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebConfig {
    pub metrics_port: u16,
}

/// Full drover configuration, read once at startup from a JSON file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub backends: Vec<BackendConfig>,
    pub proxy: ProxyConfig,
    pub monitor: MonitorConfig,
    pub web: WebConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub weight_optimization: WeightConfig,
    pub rate_limit: RateLimiterConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backends: vec![
                BackendConfig {
                    url: "http://localhost:8080".to_string(),
                    weight: 1.0,
                    enabled: true,
                },
                BackendConfig {
                    url: "http://localhost:8081".to_string(),
                    weight: 1.0,
                    enabled: true,
                },
                BackendConfig {
                    url: "http://localhost:8082".to_string(),
                    weight: 1.0,
                    enabled: true,
                },
            ],
            proxy: ProxyConfig {
                algorithm: Algorithm::RoundRobin,
                retry_attempts: 2,
                retry_delay_ms: 100,
                timeout_ms: 10_000,
                port: 8089,
            },
            monitor: MonitorConfig {
                alpha: 0.3,
                period_s: 5,
                timeout_s: 10,
            },
            web: WebConfig { metrics_port: 9000 },
            circuit_breaker: CircuitBreakerConfig::default(),
            weight_optimization: WeightConfig::default(),
            rate_limit: RateLimiterConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// When the file does not exist a default one is written in its place so
    /// the operator has a template to edit.
    pub async fn load_or_create<P: AsRef<Path>>(path: P) -> DroverResult<Self> {
        let path = path.as_ref();

        if !path.exists() {
            let config = Config::default();
            config.save(path).await?;
            info!("Created default configuration file: {}", path.display());
            return Ok(config);
        }

        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;

        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Persist the configuration as pretty-printed JSON.
    pub async fn save<P: AsRef<Path>>(&self, path: P) -> DroverResult<()> {
        let data = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path.as_ref(), data).await?;
        Ok(())
    }

    /// Validate the configuration, returning the first violation found.
    pub fn validate(&self) -> DroverResult<()> {
        if self.backends.is_empty() {
            return Err(DroverError::config(
                "at least one backend must be configured",
            ));
        }

        for (i, backend) in self.backends.iter().enumerate() {
            if backend.url.trim().is_empty() {
                return Err(DroverError::config(format!(
                    "backend {}: URL cannot be empty",
                    i
                )));
            }
            if backend.weight < 0.0 {
                return Err(DroverError::config(format!(
                    "backend {}: weight cannot be negative",
                    i
                )));
            }
        }

        if self.proxy.port == 0 {
            return Err(DroverError::config("proxy port must be between 1 and 65535"));
        }

        if self.web.metrics_port == 0 {
            return Err(DroverError::config(
                "web metrics_port must be between 1 and 65535",
            ));
        }

        if !(0.0..=1.0).contains(&self.monitor.alpha) {
            return Err(DroverError::config("monitor alpha must be between 0 and 1"));
        }

        if self.monitor.period_s == 0 {
            return Err(DroverError::config("monitor period_s must be positive"));
        }

        if self.monitor.timeout_s == 0 {
            return Err(DroverError::config("monitor timeout_s must be positive"));
        }

        if !(0.0..=1.0).contains(&self.circuit_breaker.error_rate_threshold) {
            return Err(DroverError::config(
                "circuit_breaker error_rate_threshold must be between 0 and 1",
            ));
        }

        if self.weight_optimization.min_weight > self.weight_optimization.max_weight {
            return Err(DroverError::config(
                "weight_optimization min_weight cannot exceed max_weight",
            ));
        }

        Ok(())
    }

    /// URLs of the backends the operator has enabled, in file order.
    pub fn enabled_backends(&self) -> Vec<String> {
        self.backends
            .iter()
            .filter(|b| b.enabled)
            .map(|b| b.url.clone())
            .collect()
    }

    /// Nominal (configured) weight for a backend URL; 1.0 when unknown.
    pub fn nominal_weight(&self, url: &str) -> f64 {
        self.backends
            .iter()
            .find(|b| b.url == url)
            .map(|b| b.weight)
            .unwrap_or(1.0)
    }

    /// Whether a backend URL is enabled in the configuration.
    pub fn is_enabled(&self, url: &str) -> bool {
        self.backends
            .iter()
            .find(|b| b.url == url)
            .map(|b| b.enabled)
            .unwrap_or(false)
    }
}
