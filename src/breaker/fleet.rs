use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState, CircuitBreakerStats};
use crate::error::{DroverError, DroverResult};
use crate::types::Decision;

/// One circuit breaker per backend URL, created lazily on first use.
///
/// The map lock is only held for lookups and inserts; breaker state lives
/// behind each breaker's own lock.
pub struct BreakerFleet {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerFleet {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch the breaker for a URL, creating it on first sight.
    pub async fn breaker(&self, url: &str) -> Arc<CircuitBreaker> {
        {
            let map = self.breakers.read().await;
            if let Some(breaker) = map.get(url) {
                return Arc::clone(breaker);
            }
        }

        let mut map = self.breakers.write().await;
        // Double-check after re-acquiring: another task may have inserted.
        Arc::clone(map.entry(url.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(url.to_string(), self.config.clone()))
        }))
    }

    /// Whether a call to this backend is admitted right now, driving the
    /// OPEN → HALF_OPEN transition when its timeout has elapsed.
    pub async fn can_execute(&self, url: &str) -> bool {
        if !self.config.enabled {
            return true;
        }

        let breaker = self.breaker(url).await;
        breaker.try_half_open().await;
        breaker.can_execute().await
    }

    /// Filter a URL list down to the backends whose breakers admit.
    pub async fn available(&self, urls: &[String]) -> Vec<String> {
        if !self.config.enabled {
            return urls.to_vec();
        }

        let mut available = Vec::with_capacity(urls.len());
        for url in urls {
            if self.can_execute(url).await {
                available.push(url.clone());
            }
        }
        available
    }

    pub async fn on_success(&self, url: &str) -> Option<Decision> {
        if !self.config.enabled {
            return None;
        }
        self.breaker(url).await.on_success().await
    }

    pub async fn on_failure(&self, url: &str) -> Option<Decision> {
        if !self.config.enabled {
            return None;
        }
        self.breaker(url).await.on_failure().await
    }

    /// Manually reset one breaker to CLOSED with zeroed counters.
    pub async fn reset(&self, url: &str) -> Decision {
        self.breaker(url).await.reset().await
    }

    /// Run `f` under breaker protection.
    ///
    /// Denied admission yields a dedicated breaker-open error so callers can
    /// tell it apart from upstream failure; that error is never recorded back
    /// into the breaker.
    pub async fn execute_with<F, Fut, T>(&self, url: &str, f: F) -> DroverResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = DroverResult<T>>,
    {
        if !self.can_execute(url).await {
            return Err(DroverError::circuit_breaker_open(url));
        }

        let result = f().await;

        match &result {
            Ok(_) => {
                self.on_success(url).await;
            }
            Err(e) if e.should_trigger_circuit_breaker() => {
                self.on_failure(url).await;
            }
            Err(_) => {}
        }

        result
    }

    /// Stats for every breaker created so far, keyed by backend URL.
    pub async fn all_stats(&self) -> HashMap<String, CircuitBreakerStats> {
        let map = self.breakers.read().await;
        let breakers: Vec<(String, Arc<CircuitBreaker>)> = map
            .iter()
            .map(|(url, b)| (url.clone(), Arc::clone(b)))
            .collect();
        drop(map);

        let mut stats = HashMap::with_capacity(breakers.len());
        for (url, breaker) in breakers {
            stats.insert(url, breaker.stats().await);
        }
        stats
    }

    /// Number of breakers currently in the OPEN state.
    pub async fn open_count(&self) -> usize {
        let map = self.breakers.read().await;
        let breakers: Vec<Arc<CircuitBreaker>> = map.values().map(Arc::clone).collect();
        drop(map);

        let mut open = 0;
        for breaker in breakers {
            if breaker.state().await == CircuitBreakerState::Open {
                open += 1;
            }
        }
        open
    }
}
