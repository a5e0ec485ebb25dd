//! LEWS Server - always-on backend for landslide early warning

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lews_server::config::Config;
use lews_server::loops;
use lews_server::persistence;
use lews_server::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lews_server=debug".parse()?),
        )
        .init();

    tracing::info!("Starting LEWS server...");

    let config = Config::from_env();
    let port = config.server_port;

    let db = persistence::init_database(&config.database_path, config.database_max_connections)
        .await?;
    let state = Arc::new(AppState::new(db, config));

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    tokio::spawn(loops::detect_loop::run_detect_loop(
        state.clone(),
        shutdown_tx.subscribe(),
    ));
    tokio::spawn(loops::alert_expiry_loop::run_alert_expiry_loop(
        state.clone(),
        shutdown_tx.subscribe(),
    ));

    let app = lews_server::api::routes()
        .with_state(state)
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
