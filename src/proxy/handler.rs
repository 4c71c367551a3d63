use hyper::body::Bytes;
use hyper::client::HttpConnector;
use hyper::header::{HeaderValue, HOST};
use hyper::http::request::Parts;
use hyper::{Body, Client, Request, Response, StatusCode, Uri};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::selector::BackendSelector;
use crate::breaker::BreakerFleet;
use crate::config::{Algorithm, ProxyConfig};
use crate::error::{DroverError, DroverResult};
use crate::monitor::HealthMonitor;
use crate::optimizer::WeightOptimizer;
use crate::ratelimit::RateLimiterManager;

/// Outcome of one proxy attempt against a single backend.
enum Attempt {
    /// Non-5xx response; reported to the breaker as success.
    Success(Response<Body>),
    /// 5xx response; a breaker failure, but the response is kept so the final
    /// attempt can still relay it.
    ServerError(Response<Body>, DroverError),
    /// Admission denied or transport failure.
    Failed(DroverError),
}

/// Front-door request handler.
///
/// Admission, selection, forwarding and retry live here; breaker admission
/// and outcome recording are inlined around the upstream call so that a 5xx
/// body can still be relayed to the client on the final attempt.
pub struct Dispatcher {
    config: ProxyConfig,
    monitor: Arc<HealthMonitor>,
    fleet: Arc<BreakerFleet>,
    optimizer: Arc<WeightOptimizer>,
    rate_limiter: Arc<RateLimiterManager>,
    selector: BackendSelector,
    client: Client<HttpConnector>,
}

impl Dispatcher {
    pub fn new(
        config: ProxyConfig,
        monitor: Arc<HealthMonitor>,
        fleet: Arc<BreakerFleet>,
        optimizer: Arc<WeightOptimizer>,
        rate_limiter: Arc<RateLimiterManager>,
    ) -> Self {
        Self {
            config,
            monitor,
            fleet,
            optimizer,
            rate_limiter,
            selector: BackendSelector::new(),
            client: Client::new(),
        }
    }

    /// Handle one inbound request end to end.
    pub async fn handle(
        &self,
        req: Request<Body>,
        remote: SocketAddr,
    ) -> Result<Response<Body>, Infallible> {
        match self.process(req, remote).await {
            Ok(response) => Ok(response),
            Err(e) => {
                let (status, body) = match &e {
                    DroverError::RateLimit { .. } => {
                        (StatusCode::TOO_MANY_REQUESTS, "Rate Limit Exceeded")
                    }
                    DroverError::NoEligibleBackend { .. } => {
                        (StatusCode::SERVICE_UNAVAILABLE, "Service Temporarily Unavailable")
                    }
                    _ => (StatusCode::BAD_GATEWAY, "Bad Gateway"),
                };
                Ok(Response::builder()
                    .status(status)
                    .body(Body::from(body))
                    .unwrap())
            }
        }
    }

    async fn process(
        &self,
        req: Request<Body>,
        remote: SocketAddr,
    ) -> DroverResult<Response<Body>> {
        let started = Instant::now();

        let client_addr = remote.to_string();
        if !self.rate_limiter.allow(&client_addr) {
            warn!(client = %client_addr, "rate limit exceeded");
            return Err(DroverError::rate_limit(format!("client {}", client_addr)));
        }

        let first = self.select_backend().await?;

        let request_id = Uuid::new_v4();
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let client_ip = client_ip(&req, remote);
        let original_host = req
            .headers()
            .get(HOST)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("")
            .to_string();

        let (parts, body) = req.into_parts();
        // The body is buffered once so retries can replay it.
        let body_bytes = hyper::body::to_bytes(body)
            .await
            .map_err(|e| DroverError::internal(format!("failed to read request body: {}", e)))?;

        debug!(%request_id, backend = %first, "dispatching {} {}", method, path);

        let mut target = Some(first);
        let mut last_failed: Option<String> = None;
        let mut last_error = DroverError::no_eligible_backend("no proxy attempt executed");
        let mut relayable: Option<Response<Body>> = None;

        for attempt in 0..=self.config.retry_attempts {
            if attempt > 0 {
                sleep(self.config.retry_delay()).await;
                // Reselect, skipping the backend that just failed. When no
                // distinct backend comes back this round, keep looping.
                target = match self.select_backend().await {
                    Ok(candidate) if Some(&candidate) != last_failed.as_ref() => Some(candidate),
                    _ => None,
                };
            }

            let backend = match target.take() {
                Some(backend) => backend,
                None => continue,
            };
            relayable = None;

            match self
                .attempt(&backend, &parts, body_bytes.clone(), &client_ip, &original_host)
                .await
            {
                Attempt::Success(response) => {
                    let duration = started.elapsed();
                    if attempt == 0 {
                        info!("{} {} -> {} ({:?})", method, path, backend, duration);
                    } else {
                        info!(
                            "{} {} -> {} ({:?}) after {} retries",
                            method, path, backend, duration, attempt
                        );
                    }
                    return Ok(response);
                }
                Attempt::ServerError(response, error) => {
                    warn!(%request_id, backend = %backend, "proxy attempt failed: {}", error);
                    relayable = Some(response);
                    last_error = error;
                    last_failed = Some(backend);
                }
                Attempt::Failed(error) => {
                    warn!(%request_id, backend = %backend, "proxy attempt failed: {}", error);
                    last_error = error;
                    last_failed = Some(backend);
                }
            }
        }

        // Retries exhausted. A server-error response from the final attempt
        // is still relayed; transport failures surface as 502.
        if let Some(response) = relayable {
            return Ok(response);
        }
        Err(last_error)
    }

    /// One admission-checked proxy attempt with breaker outcome reporting.
    async fn attempt(
        &self,
        backend: &str,
        parts: &Parts,
        body: Bytes,
        client_ip: &str,
        original_host: &str,
    ) -> Attempt {
        if !self.fleet.can_execute(backend).await {
            // Denied admission counts against the retry budget but is never
            // recorded back into the breaker that denied it.
            return Attempt::Failed(DroverError::circuit_breaker_open(backend));
        }

        match self
            .forward(backend, parts, body, client_ip, original_host)
            .await
        {
            Ok(response) if response.status().as_u16() >= 500 => {
                let status = response.status().as_u16();
                self.fleet.on_failure(backend).await;
                Attempt::ServerError(response, DroverError::upstream_status(backend, status))
            }
            Ok(response) => {
                self.fleet.on_success(backend).await;
                Attempt::Success(response)
            }
            Err(e) => {
                if e.should_trigger_circuit_breaker() {
                    self.fleet.on_failure(backend).await;
                }
                Attempt::Failed(e)
            }
        }
    }

    /// Pick an eligible backend: alive in the monitor, admitted by its
    /// breaker, then chosen by the active policy.
    pub async fn select_backend(&self) -> DroverResult<String> {
        let alive = self.monitor.alive_urls().await;
        if alive.is_empty() {
            return Err(DroverError::no_eligible_backend("no alive backends"));
        }

        let available = self.fleet.available(&alive).await;
        if available.is_empty() {
            return Err(DroverError::no_eligible_backend(
                "all circuit breakers open",
            ));
        }

        let selected = match self.config.algorithm {
            Algorithm::WeightedRoundRobin => {
                let snapshot = self.monitor.snapshot().await;
                self.selector
                    .weighted_round_robin(&available, &snapshot, &self.optimizer)
                    .await
            }
            // No per-backend in-flight counter is maintained; the
            // least-connections slot behaves as round robin.
            Algorithm::RoundRobin | Algorithm::LeastConnections => {
                self.selector.round_robin(&available)
            }
        };

        selected.ok_or_else(|| DroverError::no_eligible_backend("selection produced no backend"))
    }

    /// Build and send the upstream request, bounded by the per-attempt
    /// deadline.
    async fn forward(
        &self,
        backend: &str,
        parts: &Parts,
        body: Bytes,
        client_ip: &str,
        original_host: &str,
    ) -> DroverResult<Response<Body>> {
        let target_uri: Uri = backend.parse()?;
        let authority = target_uri
            .authority()
            .map(|a| a.as_str().to_string())
            .ok_or_else(|| {
                DroverError::config(format!("backend url {} has no authority", backend))
            })?;

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let uri: Uri = format!(
            "{}://{}{}",
            target_uri.scheme_str().unwrap_or("http"),
            authority,
            path_and_query
        )
        .parse()?;

        let mut request = Request::builder()
            .method(parts.method.clone())
            .uri(uri)
            .body(Body::from(body))?;

        let headers = request.headers_mut();
        for (name, value) in parts.headers.iter() {
            if !is_hop_by_hop(name.as_str()) {
                headers.insert(name.clone(), value.clone());
            }
        }

        if let Ok(value) = HeaderValue::from_str(original_host) {
            headers.insert("x-forwarded-host", value);
        }
        if let Ok(value) = HeaderValue::from_str(&authority) {
            headers.insert("x-origin-host", value);
        }
        headers.insert("x-forwarded-proto", HeaderValue::from_static("http"));
        if let Ok(value) = HeaderValue::from_str(client_ip) {
            headers.insert("x-forwarded-for", value);
        }

        let timeout = self.config.timeout();
        let response = tokio::time::timeout(timeout, self.client.request(request))
            .await
            .map_err(|_| DroverError::timeout(timeout, format!("proxy to {}", backend)))?
            .map_err(DroverError::from)?;

        Ok(response)
    }
}

/// Earliest known client IP: first hop of an existing X-Forwarded-For chain,
/// else X-Real-IP, else the socket peer.
fn client_ip(req: &Request<Body>, remote: SocketAddr) -> String {
    if let Some(xff) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = xff.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real) = req.headers().get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if !real.is_empty() {
            return real.to_string();
        }
    }

    remote.ip().to_string()
}

fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ip_precedence() {
        let remote: SocketAddr = "198.51.100.9:4711".parse().unwrap();

        let req = Request::builder()
            .header("x-forwarded-for", "203.0.113.1, 10.0.0.1")
            .header("x-real-ip", "203.0.113.2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&req, remote), "203.0.113.1");

        let req = Request::builder()
            .header("x-real-ip", "203.0.113.2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&req, remote), "203.0.113.2");

        let req = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_ip(&req, remote), "198.51.100.9");
    }

    #[test]
    fn test_hop_by_hop_headers() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("transfer-encoding"));
        assert!(!is_hop_by_hop("content-type"));
        assert!(!is_hop_by_hop("x-forwarded-for"));
    }
}
