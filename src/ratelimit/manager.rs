use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use super::limiters::{RateLimiter, SlidingWindow, TokenBucket};

/// Rate limiting algorithm, selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAlgorithm {
    TokenBucket,
    SlidingWindow,
}

/// Rate limiter settings from the config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimiterConfig {
    pub enabled: bool,
    #[serde(rename = "type")]
    pub algorithm: RateLimitAlgorithm,
    pub global_limit: i64,
    pub per_ip_limit: i64,
    pub window_size_s: u64,
    pub refill_rate: i64,
    pub whitelist: Vec<String>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithm: RateLimitAlgorithm::TokenBucket,
            global_limit: 1000,
            per_ip_limit: 100,
            window_size_s: 60,
            refill_rate: 10,
            whitelist: vec!["127.0.0.1".to_string(), "::1".to_string()],
        }
    }
}

impl RateLimiterConfig {
    pub fn window_size(&self) -> Duration {
        Duration::from_secs(self.window_size_s)
    }
}

/// Global + per-client-IP admission control.
///
/// The global limiter and the whitelist are checked first; per-IP limiters are
/// materialised lazily on the first request from each address and retained for
/// the process lifetime.
pub struct RateLimiterManager {
    config: RateLimiterConfig,
    global: Box<dyn RateLimiter>,
    per_ip: RwLock<HashMap<String, Arc<dyn RateLimiter>>>,
    whitelist: HashSet<String>,
}

impl RateLimiterManager {
    pub fn new(config: RateLimiterConfig) -> Self {
        let whitelist = config.whitelist.iter().cloned().collect();
        let global: Box<dyn RateLimiter> = match config.algorithm {
            RateLimitAlgorithm::TokenBucket => {
                Box::new(TokenBucket::new(config.global_limit, config.refill_rate))
            }
            RateLimitAlgorithm::SlidingWindow => Box::new(SlidingWindow::new(
                config.global_limit.max(0) as usize,
                config.window_size(),
            )),
        };

        Self {
            config,
            global,
            per_ip: RwLock::new(HashMap::new()),
            whitelist,
        }
    }

    /// Admission check for a client address (host, host:port, or [v6]:port).
    pub fn allow(&self, client_addr: &str) -> bool {
        if !self.config.enabled {
            return true;
        }

        let host = extract_host(client_addr);

        if self.whitelist.contains(host) {
            return true;
        }

        if !self.global.allow() {
            return false;
        }

        self.allow_for_ip(host)
    }

    fn allow_for_ip(&self, host: &str) -> bool {
        if let Ok(map) = self.per_ip.read() {
            if let Some(limiter) = map.get(host) {
                let limiter = Arc::clone(limiter);
                drop(map);
                return limiter.allow();
            }
        }

        let limiter = {
            let mut map = match self.per_ip.write() {
                Ok(map) => map,
                Err(poisoned) => poisoned.into_inner(),
            };
            Arc::clone(
                map.entry(host.to_string())
                    .or_insert_with(|| self.build_ip_limiter()),
            )
        };

        limiter.allow()
    }

    fn build_ip_limiter(&self) -> Arc<dyn RateLimiter> {
        match self.config.algorithm {
            // Per-IP buckets refill at a tenth of the global rate.
            RateLimitAlgorithm::TokenBucket => Arc::new(TokenBucket::new(
                self.config.per_ip_limit,
                self.config.refill_rate / 10,
            )),
            RateLimitAlgorithm::SlidingWindow => Arc::new(SlidingWindow::new(
                self.config.per_ip_limit.max(0) as usize,
                self.config.window_size(),
            )),
        }
    }

    pub fn stats(&self) -> RateLimitStats {
        let active_ips = self.per_ip.read().map(|m| m.len()).unwrap_or(0);

        RateLimitStats {
            enabled: self.config.enabled,
            algorithm: self.config.algorithm,
            global_limit: self.config.global_limit,
            per_ip_limit: self.config.per_ip_limit,
            active_ips,
            global_tokens: self.global.tokens(),
        }
    }
}

/// Rate limiter summary for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStats {
    pub enabled: bool,
    #[serde(rename = "type")]
    pub algorithm: RateLimitAlgorithm,
    pub global_limit: i64,
    pub per_ip_limit: i64,
    pub active_ips: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_tokens: Option<i64>,
}

/// Extract the host portion of a client address.
///
/// Handles `host:port`, `[v6]:port`, bracketed v6 without a port, bare v6
/// (more than one colon, left untouched) and plain hostnames.
fn extract_host(addr: &str) -> &str {
    if let Some(rest) = addr.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return &rest[..end];
        }
    }

    if let Some(idx) = addr.rfind(':') {
        let (host, port) = addr.split_at(idx);
        let port = &port[1..];
        if !host.contains(':') && !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) {
            return host;
        }
    }

    addr
}
