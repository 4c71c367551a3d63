use futures_util::{SinkExt, StreamExt};
use hyper::header::{CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, UPGRADE};
use hyper::{Body, Request, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::{Message, Role};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::monitor::HealthMonitor;

/// Interval between pushed metric snapshots.
const PUSH_INTERVAL: Duration = Duration::from_secs(3);

/// Upgrade GET /metrics/ws and stream the current snapshot every 3 seconds
/// until the client disconnects or the server shuts down.
pub fn handle_metrics_ws(
    mut req: Request<Body>,
    monitor: Arc<HealthMonitor>,
    cancel: CancellationToken,
) -> Result<Response<Body>, hyper::http::Error> {
    let is_upgrade = req
        .headers()
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    let key = match req.headers().get(SEC_WEBSOCKET_KEY) {
        Some(key) if is_upgrade => key.clone(),
        _ => {
            return Response::builder()
                .status(StatusCode::BAD_REQUEST)
                .body(Body::from("Expected WebSocket upgrade"));
        }
    };

    let accept = derive_accept_key(key.as_bytes());
    let on_upgrade = hyper::upgrade::on(&mut req);

    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                info!("metrics stream client connected");
                let ws = WebSocketStream::from_raw_socket(upgraded, Role::Server, None).await;
                stream_metrics(ws, monitor, cancel).await;
                info!("metrics stream client disconnected");
            }
            Err(e) => {
                warn!("metrics stream upgrade failed: {}", e);
            }
        }
    });

    Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(CONNECTION, "upgrade")
        .header(UPGRADE, "websocket")
        .header(SEC_WEBSOCKET_ACCEPT, accept)
        .body(Body::empty())
}

async fn stream_metrics<S>(
    mut ws: WebSocketStream<S>,
    monitor: Arc<HealthMonitor>,
    cancel: CancellationToken,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mut ticker = tokio::time::interval(PUSH_INTERVAL);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = ws.send(Message::Close(None)).await;
                return;
            }
            incoming = ws.next() => {
                match incoming {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
                    // Pings are answered by tungstenite itself; other client
                    // frames are ignored.
                    Some(Ok(_)) => {}
                }
            }
            _ = ticker.tick() => {
                let snapshot = monitor.snapshot().await;
                let payload = match serde_json::to_string(&snapshot) {
                    Ok(payload) => payload,
                    Err(e) => {
                        debug!("failed to encode metrics snapshot: {}", e);
                        continue;
                    }
                };

                if ws.send(Message::Text(payload)).await.is_err() {
                    return;
                }
            }
        }
    }
}
