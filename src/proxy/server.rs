use anyhow::Result;
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::handler::Dispatcher;

/// How long in-flight requests get to drain after shutdown is requested.
pub(crate) const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// The inbound client listener.
pub struct ProxyServer {
    dispatcher: Arc<Dispatcher>,
    addr: SocketAddr,
}

impl ProxyServer {
    pub fn new(dispatcher: Arc<Dispatcher>, addr: SocketAddr) -> Self {
        Self { dispatcher, addr }
    }

    /// Serve until the cancellation token fires, then drain in-flight
    /// requests within the grace period.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let dispatcher = self.dispatcher;

        let make_service = make_service_fn(move |conn: &AddrStream| {
            let dispatcher = Arc::clone(&dispatcher);
            let remote = conn.remote_addr();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let dispatcher = Arc::clone(&dispatcher);
                    async move { dispatcher.handle(req, remote).await }
                }))
            }
        });

        let server = Server::try_bind(&self.addr)?.serve(make_service);
        info!("Proxy server running on {}", self.addr);

        let drain = cancel.clone();
        let graceful = server.with_graceful_shutdown(async move {
            drain.cancelled().await;
        });

        tokio::select! {
            result = graceful => {
                result?;
                info!("proxy server drained cleanly");
            }
            _ = async {
                cancel.cancelled().await;
                sleep(SHUTDOWN_GRACE).await;
            } => {
                warn!(
                    "proxy server drain exceeded {:?}, terminating remaining requests",
                    SHUTDOWN_GRACE
                );
            }
        }

        Ok(())
    }
}
