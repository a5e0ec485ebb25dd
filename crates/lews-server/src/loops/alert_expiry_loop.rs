//! Periodic sweep that expires alerts with no recent updates.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::interval;

use lews_core::models::now_epoch;

use crate::state::AppState;

pub async fn run_alert_expiry_loop(state: Arc<AppState>, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = interval(Duration::from_secs(state.config.expiry_sweep_interval_s));

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Alert expiry loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                if let Err(err) = state.alerts.expire(now_epoch()).await {
                    tracing::warn!(%err, "alert expiry sweep failed");
                }
            }
        }
    }
}
