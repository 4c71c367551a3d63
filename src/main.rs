use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod advisor;
mod breaker;
mod config;
mod error;
mod monitor;
mod optimizer;
mod proxy;
mod ratelimit;
mod types;
mod web;

use breaker::BreakerFleet;
use config::Config;
use monitor::HealthMonitor;
use optimizer::WeightOptimizer;
use proxy::{Dispatcher, ProxyServer};
use ratelimit::RateLimiterManager;
use web::WebState;

#[derive(Parser)]
#[command(name = "drover")]
#[command(about = "An adaptive layer-7 reverse proxy with health-aware load balancing")]
struct Args {
    #[arg(short, long, default_value = "config.json")]
    config: String,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("drover={}", level))
        .init();

    info!("Starting drover reverse proxy");

    // A configuration failure is fatal; main returns the error and the
    // process exits nonzero.
    let config = Config::load_or_create(&args.config)
        .await
        .context("failed to load configuration")?;
    let config = Arc::new(config);
    info!(
        "Loaded configuration with {} backends",
        config.backends.len()
    );

    let monitor = Arc::new(HealthMonitor::new(
        &config.enabled_backends(),
        config.monitor.period(),
        config.monitor.alpha,
        config.monitor.timeout(),
    ));
    let fleet = Arc::new(BreakerFleet::new(config.circuit_breaker.clone()));
    let optimizer = Arc::new(WeightOptimizer::new(config.weight_optimization.clone()));
    let rate_limiter = Arc::new(RateLimiterManager::new(config.rate_limit.clone()));

    let dispatcher = Arc::new(Dispatcher::new(
        config.proxy.clone(),
        Arc::clone(&monitor),
        Arc::clone(&fleet),
        Arc::clone(&optimizer),
        Arc::clone(&rate_limiter),
    ));

    // One token shuts everything down: monitor loop, advisory pipeline,
    // metric collection and both listeners.
    let cancel = CancellationToken::new();

    let monitor_handle = monitor.start_polling(cancel.clone());

    let advisor_handles = match monitor.take_updates() {
        Some(updates) => advisor::start_advisory_pipeline(updates, cancel.clone()),
        None => Vec::new(),
    };

    let web_state = WebState {
        config: Arc::clone(&config),
        monitor: Arc::clone(&monitor),
        fleet: Arc::clone(&fleet),
        optimizer: Arc::clone(&optimizer),
        rate_limiter: Arc::clone(&rate_limiter),
    };
    let web_handle = web::start_web_server(web_state, cancel.clone()).await?;

    let proxy_addr = SocketAddr::from(([0, 0, 0, 0], config.proxy.port));
    let proxy_server = ProxyServer::new(dispatcher, proxy_addr);

    // Ctrl-C fires the cancellation token; the servers drain and return.
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                warn!("Received CTRL+C, shutting down gracefully...");
            }
            cancel.cancel();
        });
    }

    proxy_server.run(cancel.clone()).await?;

    let _ = web_handle.await;
    let _ = monitor_handle.await;
    for handle in advisor_handles {
        let _ = handle.await;
    }

    info!("drover shutdown complete");
    Ok(())
}
