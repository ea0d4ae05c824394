use std::sync::Arc;

use order_dispatch::api;
use order_dispatch::config::Config;
use order_dispatch::error::AppError;
use order_dispatch::state::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let state = AppState::from_config(&config)
        .map_err(|err| AppError::Internal(format!("failed to build distance client: {err}")))?;
    let shared_state = Arc::new(state);

    let app = api::rest::router(shared_state.clone());

    tokio::spawn(run_reconciler(shared_state.clone(), config.reconcile_interval));

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

/// Times out offers left pending past their deadline and drops idle
/// realtime channels.
async fn run_reconciler(state: Arc<AppState>, every: std::time::Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match state.dispatcher.expire_stale_assignments().await {
            Ok(0) => {}
            Ok(expired) => tracing::info!(expired, "stale offers timed out"),
            Err(err) => tracing::warn!(error = %err, "offer reconciliation failed"),
        }
        state.hub.prune();
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
