use hyper::{Body, Method, Request, Response, StatusCode};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::WebState;
use crate::types::BackendMetrics;

/// Standard JSON envelope for every admin response.
#[derive(Debug, Serialize)]
struct ApiResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Backend view joined from the metric snapshot, the configuration and the
/// optimizer.
#[derive(Debug, Serialize)]
struct BackendInfo {
    id: usize,
    url: String,
    alive: bool,
    ema_ms: f64,
    error_rate: f64,
    last_checked: String,
    enabled: bool,
    weight: f64,
}

#[derive(Debug, Deserialize)]
struct BackendUpdateRequest {
    enabled: Option<bool>,
    weight: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ActionRequest {
    action: String,
}

pub async fn handle(
    req: Request<Body>,
    state: WebState,
) -> Result<Response<Body>, hyper::http::Error> {
    if req.method() == Method::OPTIONS {
        return base_response(StatusCode::OK).body(Body::empty());
    }

    let path = req.uri().path().to_string();
    match (req.method().clone(), path.as_str()) {
        (Method::GET, "/api/backends") => backends_list(&state).await,
        (Method::GET, "/api/metrics") => metrics_snapshot(&state).await,
        (Method::GET, "/api/config") => config_summary(&state).await,
        (Method::GET, "/api/circuit-breaker") => breaker_stats(&state).await,
        (Method::GET, "/api/rate-limit") => rate_limit_stats(&state),
        (Method::GET, "/api/health") => health(&state).await,
        _ => {
            if let Some(rest) = path.strip_prefix("/api/backends/") {
                let rest = rest.to_string();
                return backend_by_id(req, state, &rest).await;
            }
            if let Some(rest) = path.strip_prefix("/api/circuit-breaker/") {
                let rest = rest.to_string();
                return breaker_action(req, state, &rest).await;
            }
            send_error(StatusCode::NOT_FOUND, "Not found")
        }
    }
}

async fn backends_list(state: &WebState) -> Result<Response<Body>, hyper::http::Error> {
    let snapshot = state.monitor.snapshot().await;
    let mut backends = Vec::with_capacity(snapshot.len());
    for entry in snapshot {
        backends.push(backend_info(state, entry).await);
    }

    send_success("Backends retrieved successfully", json!(backends))
}

async fn backend_by_id(
    req: Request<Body>,
    state: WebState,
    rest: &str,
) -> Result<Response<Body>, hyper::http::Error> {
    let mut parts = rest.split('/');
    let id: usize = match parts.next().and_then(|raw| raw.parse().ok()) {
        Some(id) => id,
        None => return send_error(StatusCode::BAD_REQUEST, "Invalid backend ID"),
    };
    let action_segment = parts.next();

    match (req.method().clone(), action_segment) {
        (Method::GET, None) => {
            let snapshot = state.monitor.snapshot().await;
            match snapshot.into_iter().find(|m| m.id == id) {
                Some(entry) => {
                    let info = backend_info(&state, entry).await;
                    send_success("Backend retrieved successfully", json!(info))
                }
                None => send_error(StatusCode::NOT_FOUND, "Backend not found"),
            }
        }
        (Method::PATCH, None) => update_backend(req, id).await,
        (Method::POST, Some("actions")) => backend_action(req, id).await,
        _ => send_error(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed"),
    }
}

/// PATCH /api/backends/{id} is advisory: the request is validated and logged
/// but runtime state is not mutated.
async fn update_backend(req: Request<Body>, id: usize) -> Result<Response<Body>, hyper::http::Error> {
    let update: BackendUpdateRequest = match read_json(req).await {
        Some(update) => update,
        None => return send_error(StatusCode::BAD_REQUEST, "Invalid JSON payload"),
    };

    info!(
        backend_id = id,
        enabled = ?update.enabled,
        weight = ?update.weight,
        "backend update request received"
    );

    send_success(
        format!("Backend {} update queued", id),
        json!({ "id": id, "enabled": update.enabled, "weight": update.weight }),
    )
}

async fn backend_action(req: Request<Body>, id: usize) -> Result<Response<Body>, hyper::http::Error> {
    let request: ActionRequest = match read_json(req).await {
        Some(request) => request,
        None => return send_error(StatusCode::BAD_REQUEST, "Invalid JSON payload"),
    };

    match request.action.as_str() {
        "drain" | "restart" | "reset_metrics" => {
            info!(backend_id = id, action = %request.action, "backend action requested");
            send_success(
                format!("Backend {} {} initiated", id, request.action),
                json!({ "id": id, "action": request.action }),
            )
        }
        _ => send_error(
            StatusCode::BAD_REQUEST,
            "Invalid action. Supported: drain, restart, reset_metrics",
        ),
    }
}

async fn metrics_snapshot(state: &WebState) -> Result<Response<Body>, hyper::http::Error> {
    let snapshot = state.monitor.snapshot().await;
    send_success("Metrics retrieved successfully", json!(snapshot))
}

async fn config_summary(state: &WebState) -> Result<Response<Body>, hyper::http::Error> {
    let alive = state.monitor.alive_urls().await;
    let config = &state.config;

    let summary = json!({
        "algorithm": config.proxy.algorithm,
        "retry_attempts": config.proxy.retry_attempts,
        "retry_delay_ms": config.proxy.retry_delay_ms,
        "timeout_ms": config.proxy.timeout_ms,
        "backends_count": config.backends.len(),
        "alive_backends": alive.len(),
    });

    send_success("Configuration retrieved successfully", summary)
}

async fn breaker_stats(state: &WebState) -> Result<Response<Body>, hyper::http::Error> {
    let stats = state.fleet.all_stats().await;
    send_success("Circuit breaker stats retrieved successfully", json!(stats))
}

/// POST /api/circuit-breaker/{url}/reset, URL possibly percent-encoded.
async fn breaker_action(
    req: Request<Body>,
    state: WebState,
    rest: &str,
) -> Result<Response<Body>, hyper::http::Error> {
    if req.method() != Method::POST {
        return send_error(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
    }

    let (encoded, action) = match rest.rsplit_once('/') {
        Some(split) => split,
        None => {
            return send_error(
                StatusCode::BAD_REQUEST,
                "Invalid endpoint. Use /api/circuit-breaker/{backend}/reset",
            )
        }
    };
    if encoded.is_empty() || action != "reset" {
        return send_error(
            StatusCode::BAD_REQUEST,
            "Invalid endpoint. Use /api/circuit-breaker/{backend}/reset",
        );
    }

    let backend = percent_decode_str(encoded)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| encoded.to_string());

    state.fleet.reset(&backend).await;
    info!(backend = %backend, "circuit breaker reset via admin API");

    send_success(
        format!("Circuit breaker reset for {}", backend),
        json!({ "backend": backend, "action": "reset" }),
    )
}

fn rate_limit_stats(state: &WebState) -> Result<Response<Body>, hyper::http::Error> {
    let stats = state.rate_limiter.stats();
    send_success("Rate limit stats retrieved successfully", json!(stats))
}

async fn health(state: &WebState) -> Result<Response<Body>, hyper::http::Error> {
    let snapshot = state.monitor.snapshot().await;
    let alive = snapshot.iter().filter(|m| m.alive).count();
    let open_breakers = state.fleet.open_count().await;

    let health = json!({
        "status": "healthy",
        "alive_backends": alive,
        "total_backends": snapshot.len(),
        "open_breakers": open_breakers,
        "timestamp": chrono::Utc::now().timestamp().to_string(),
    });

    send_success("API is healthy", health)
}

async fn backend_info(state: &WebState, entry: BackendMetrics) -> BackendInfo {
    let enabled = state.config.is_enabled(&entry.url);
    let weight = state.optimizer.weight_for(&entry.url).await;
    BackendInfo {
        id: entry.id,
        url: entry.url,
        alive: entry.alive,
        ema_ms: entry.ema_ms,
        error_rate: entry.error_rate,
        last_checked: entry.last_checked,
        enabled,
        weight,
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(req: Request<Body>) -> Option<T> {
    let bytes = hyper::body::to_bytes(req.into_body()).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn base_response(status: StatusCode) -> hyper::http::response::Builder {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .header("access-control-allow-origin", "*")
        .header(
            "access-control-allow-methods",
            "GET, POST, PUT, PATCH, DELETE, OPTIONS",
        )
        .header("access-control-allow-headers", "Content-Type")
}

fn send_success<M: Into<String>>(
    message: M,
    data: serde_json::Value,
) -> Result<Response<Body>, hyper::http::Error> {
    let response = ApiResponse {
        success: true,
        message: Some(message.into()),
        data: Some(data),
        error: None,
    };
    let body = serde_json::to_string(&response).unwrap_or_else(|_| "{}".to_string());
    base_response(StatusCode::OK).body(Body::from(body))
}

fn send_error<E: Into<String>>(
    status: StatusCode,
    error: E,
) -> Result<Response<Body>, hyper::http::Error> {
    let response = ApiResponse {
        success: false,
        message: None,
        data: None,
        error: Some(error.into()),
    };
    let body = serde_json::to_string(&response).unwrap_or_else(|_| "{}".to_string());
    base_response(status).body(Body::from(body))
}
