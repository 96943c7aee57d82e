//! Storelink sync API
//!
//! Single-binary Rust service that:
//! 1. Loads linked marketplace accounts from the account store
//! 2. Keeps every account's access token fresh (preventive refresh job)
//! 3. Quarantines accounts with rejected refresh tokens and sweeps them
//!    for recovery on a schedule
//! 4. Exposes the trigger surface (force refresh, reconnect, quarantine
//!    management, on-demand sweep) and a live SSE progress stream

mod config;
mod events;
mod metrics;
mod rate_limit;
mod routes;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use marketplace::{HttpRefreshClient, Platform, RefreshClient};
use progress::ProgressBroadcaster;
use token_lifecycle::{LifecycleManager, RecoveryScheduler, spawn_preventive_task, spawn_sweep_task};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::rate_limit::RateLimiter;
use crate::routes::{AppState, build_router};

/// Maximum time to wait for in-flight requests after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Cadence of the rate-limit bucket pruning sweep.
const LIMITER_PRUNE_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting storelink-sync-api");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.service.listen_addr,
        platforms = config.platforms.len(),
        account_file = %config.service.account_file.display(),
        "configuration loaded"
    );

    let store = Arc::new(
        account_store::AccountStore::load(config.service.account_file.clone())
            .await
            .context("failed to load account store")?,
    );

    // One refresh client per configured platform, sharing the HTTP client
    let http_client = reqwest::Client::new();
    let refresh_timeout = Duration::from_secs(config.lifecycle.refresh_timeout_secs);
    let mut clients: HashMap<Platform, Arc<dyn RefreshClient>> = HashMap::new();
    for platform in config.platforms {
        if platform.client_secret.is_none() {
            warn!(
                platform = platform.name.label(),
                "no client secret configured, refreshing as a public client"
            );
        }
        clients.insert(
            platform.name,
            Arc::new(HttpRefreshClient::new(
                platform.name,
                http_client.clone(),
                platform.token_endpoint,
                platform.client_id,
                platform.client_secret,
                refresh_timeout,
            )),
        );
    }

    let broadcaster = Arc::new(ProgressBroadcaster::new());
    let manager = Arc::new(LifecycleManager::new(
        store,
        clients,
        broadcaster.clone(),
        Duration::from_secs(config.lifecycle.safety_margin_secs),
    ));
    let scheduler = Arc::new(RecoveryScheduler::new(
        manager.clone(),
        config.lifecycle.sweep_concurrency,
    ));

    // Background jobs: preventive refresh, recovery sweep, limiter pruning
    let _preventive = spawn_preventive_task(
        scheduler.clone(),
        Duration::from_secs(config.lifecycle.preventive_interval_secs),
        Duration::from_secs(config.lifecycle.preventive_threshold_secs),
    );
    let _sweep = spawn_sweep_task(
        scheduler.clone(),
        Duration::from_secs(config.lifecycle.sweep_interval_secs),
    );

    let refresh_limiter = Arc::new(RateLimiter::new(
        config.limits.force_refresh_per_minute,
        Duration::from_secs(60),
    ));
    let reconnect_limiter = Arc::new(RateLimiter::new(
        config.limits.reconnect_per_minute,
        Duration::from_secs(60),
    ));
    let _prune = spawn_limiter_prune(vec![refresh_limiter.clone(), reconnect_limiter.clone()]);

    let state = AppState {
        manager,
        scheduler,
        broadcaster,
        refresh_limiter,
        reconnect_limiter,
        prometheus,
        started_at: Instant::now(),
    };

    let app = build_router(state, config.service.max_connections);

    let listen_addr = config.service.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;

    info!(addr = %listen_addr, "accepting requests");

    // Graceful shutdown with drain timeout enforcement:
    // 1. shutdown_signal() fires on SIGTERM/SIGINT
    // 2. axum stops accepting new connections and drains in-flight requests
    // 3. DRAIN_TIMEOUT bounds the drain so a slow client cannot block exit
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Spawn the periodic bucket-pruning task for the rate limiters.
fn spawn_limiter_prune(limiters: Vec<Arc<RateLimiter>>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(LIMITER_PRUNE_INTERVAL);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            for limiter in &limiters {
                let removed = limiter.prune_stale();
                if removed > 0 {
                    tracing::debug!(removed, "pruned stale rate-limit buckets");
                }
            }
        }
    })
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
