// =============================================================================
// goldlock — locked-price precious-metal trading core
// =============================================================================
//
// Startup order: env -> tracing -> config -> database -> hubs -> risk
// scheduler -> HTTP server. SIGINT/SIGTERM stops the scheduler (finishing
// any in-flight pass) and drains the HTTP surface; the hubs close with the
// process.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod balance;
mod commission;
mod config;
mod error;
mod model;
mod notify;
mod quote;
mod review;
mod risk;
mod store;
mod trade;

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::AppConfig;
use crate::risk::RiskScheduler;
use crate::store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let env = config::app_env();
    let cfg = AppConfig::load(&env).context("configuration load failed")?;
    info!(env = %env, "goldlock starting up");

    // ── 2. Database ──────────────────────────────────────────────────────
    let store = Store::connect(&cfg.database.url(), cfg.database.kind)
        .await
        .context("database connect/migrate failed")?;

    // Seed the risk-config singleton so the first tick sees real thresholds.
    let risk_cfg = store.risk_config().await.context("risk config load failed")?;
    info!(
        force_close_rate = risk_cfg.force_close_rate,
        warning_rate = risk_cfg.warning_rate,
        interval_s = risk_cfg.price_update_interval_s,
        "risk config active"
    );

    // ── 3. Shared state & hubs ───────────────────────────────────────────
    let state = Arc::new(AppState::new(cfg.clone(), store.clone()));

    let upstream_url = cfg.quote.upstream_url.clone();
    tokio::spawn(state.quote_hub.clone().run(upstream_url));

    // ── 4. Risk scheduler ────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = RiskScheduler::new(store.clone(), state.risk.clone(), state.quote_hub.clone());
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx));

    // ── 5. HTTP server ───────────────────────────────────────────────────
    let addr = cfg.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "API server listening");

    let app = api::rest::router(state.clone());
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!(error = %e, "API server exited with error");
        }
    });

    info!("all subsystems running, press Ctrl+C to stop");

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    shutdown_signal().await;
    warn!("shutdown signal received, stopping");

    let _ = shutdown_tx.send(true);
    let _ = scheduler_handle.await;
    server_handle.abort();

    info!("goldlock shut down complete");
    Ok(())
}

/// Resolve on SIGINT or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
