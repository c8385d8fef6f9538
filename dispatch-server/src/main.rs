use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dispatch_server::config::ServerConfig;
use dispatch_server::dispatch::Dispatcher;
use dispatch_server::web::{AppState, create_router};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("dispatch_server=info,tower_http=info")),
        )
        .init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let state = AppState::new(Dispatcher::new(config.dispatch.clone()));

    // Periodically drop stale locations and long-finished rides. Queries
    // ignore stale records regardless.
    let dispatcher = Arc::clone(&state.dispatcher);
    let prune_interval = config.dispatch.prune_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(prune_interval);
        interval.tick().await; // First tick is immediate, skip it
        loop {
            interval.tick().await;
            dispatcher.sweep(Utc::now());
        }
    });

    let app = create_router(state);

    let listener = match tokio::net::TcpListener::bind(config.addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %config.addr, error = %e, "failed to bind");
            return ExitCode::FAILURE;
        }
    };
    info!(addr = %config.addr, "dispatch server listening");
    info!("  GET  /health                 - Health check");
    info!("  GET  /ws/{{user_id}}?role=     - Realtime connection");
    info!("  GET  /nearby-drivers         - Drivers near a point");
    info!("  POST /rides                  - Open a ride");
    info!("  GET  /rides/{{id}}             - Ride snapshot");
    info!("  PUT  /rides/{{id}}/assign      - Assign a driver");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
