//! Metrics and administration listener.
//!
//! One HTTP server exposes three surfaces: the JSON admin API under `/api/*`,
//! the live metric stream at `/metrics/ws`, and the Prometheus text format at
//! `/metrics`.

pub mod admin;
pub mod metrics;
pub mod ws;

use anyhow::Result;
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::breaker::BreakerFleet;
use crate::config::Config;
use crate::monitor::HealthMonitor;
use crate::optimizer::WeightOptimizer;
use crate::proxy::server::SHUTDOWN_GRACE;
use crate::ratelimit::RateLimiterManager;

/// Shared handles the web surfaces read from. Everything is behind an `Arc`;
/// the web layer never mutates core state except for breaker resets.
#[derive(Clone)]
pub struct WebState {
    pub config: Arc<Config>,
    pub monitor: Arc<HealthMonitor>,
    pub fleet: Arc<BreakerFleet>,
    pub optimizer: Arc<WeightOptimizer>,
    pub rate_limiter: Arc<RateLimiterManager>,
}

/// Spawn the metrics/admin server as a background task.
pub async fn start_web_server(state: WebState, cancel: CancellationToken) -> Result<JoinHandle<()>> {
    let handle = tokio::spawn(async move {
        if let Err(e) = run_web_server(state, cancel).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(handle)
}

async fn run_web_server(state: WebState, cancel: CancellationToken) -> Result<()> {
    metrics::init_prometheus();
    metrics::start_collection_loop(
        Arc::clone(&state.monitor),
        Arc::clone(&state.fleet),
        cancel.clone(),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.web.metrics_port));

    let svc_state = state;
    let svc_cancel = cancel.clone();
    let make_service = make_service_fn(move |_conn: &AddrStream| {
        let state = svc_state.clone();
        let cancel = svc_cancel.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let state = state.clone();
                let cancel = cancel.clone();
                async move { route(req, state, cancel).await }
            }))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_service);
    info!("Metrics server (WebSocket + Admin API) running on {}", addr);

    let drain = cancel.clone();
    let graceful = server.with_graceful_shutdown(async move {
        drain.cancelled().await;
    });

    tokio::select! {
        result = graceful => {
            result?;
            info!("metrics server drained cleanly");
        }
        _ = async {
            cancel.cancelled().await;
            sleep(SHUTDOWN_GRACE).await;
        } => {
            warn!(
                "metrics server drain exceeded {:?}, terminating remaining requests",
                SHUTDOWN_GRACE
            );
        }
    }

    Ok(())
}

async fn route(
    req: Request<Body>,
    state: WebState,
    cancel: CancellationToken,
) -> Result<Response<Body>, hyper::http::Error> {
    let path = req.uri().path().to_string();
    match path.as_str() {
        "/metrics/ws" => ws::handle_metrics_ws(req, Arc::clone(&state.monitor), cancel),
        "/metrics" => metrics::render(),
        path if path.starts_with("/api/") => admin::handle(req, state).await,
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::from("Not Found")),
    }
}
