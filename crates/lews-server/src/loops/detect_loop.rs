//! Periodic detection loop.
//!
//! One invocation in flight at a time: the next tick waits for the current
//! run to finish before firing again.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::interval;

use crate::state::AppState;

pub async fn run_detect_loop(state: Arc<AppState>, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = interval(Duration::from_secs(state.config.detect_interval_s));

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Detection loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                match state.detector.run().await {
                    Ok(summary) => {
                        tracing::info!(
                            sensors = summary.sensors_analyzed,
                            clusters = summary.clusters_detected,
                            created = summary.alerts_created,
                            escalated = summary.alerts_escalated,
                            "scheduled detection tick complete"
                        );
                    }
                    Err(err) => {
                        tracing::warn!(%err, "scheduled detection tick failed");
                    }
                }
            }
        }
    }
}
