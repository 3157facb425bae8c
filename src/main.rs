use std::sync::Arc;
use std::time::Duration;

use ride_dispatch::{api, broadcast, config, engine, error, state};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), error::DispatchError> {
    let config = config::Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let broadcast_interval = Duration::from_secs(config.broadcast_interval_secs);
    let (app_state, dispatch_rx) = state::AppState::new(config.clone());
    let shared_state = Arc::new(app_state);

    let app = api::rest::router(shared_state.clone());

    tokio::spawn(engine::worker::run_dispatch_worker(
        shared_state.clone(),
        dispatch_rx,
    ));
    tokio::spawn(broadcast::run_broadcaster(
        shared_state.clone(),
        broadcast_interval,
    ));

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| error::DispatchError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| error::DispatchError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
