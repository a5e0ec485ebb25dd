//! REST API routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use lews_core::models::{AlertStatus, RawReading};

use crate::error::LewsError;
use crate::ingest::{IngestStats, ItemError};
use crate::persistence;
use crate::state::AppState;

/// Create the API router.
pub fn create_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/v1/telemetry", post(ingest_telemetry))
        .route("/v1/zones/nearest", get(nearest_zone))
        .route("/v1/zones/radius", get(zones_in_radius))
        .route("/v1/alerts", get(list_alerts))
        .route("/v1/alerts/:alert_id/status", post(update_alert_status))
        .route("/v1/detect/run", post(run_detection))
}

// === Request/Response types ===

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub telemetry: Vec<RawReading>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub message: String,
    pub statistics: IngestStats,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub validation_errors: Vec<ItemError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub write_errors: Vec<ItemError>,
}

#[derive(Debug, Deserialize)]
pub struct NearestQuery {
    pub lat: f64,
    pub lon: f64,
    pub max_km: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct RadiusQuery {
    pub lat: f64,
    pub lon: f64,
    pub km: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: AlertStatus,
}

// === Handlers ===

async fn ingest_telemetry(
    State(state): State<Arc<AppState>>,
    Json(request): Json<IngestRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    if request.telemetry.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "No telemetry data provided",
                "expected_format": {"telemetry": []},
            })),
        );
    }

    match state.ingest.handle_batch(request.telemetry).await {
        Ok(outcome) => {
            // An all-invalid batch is a caller error.
            let status = if outcome.statistics.validated == 0 {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::OK
            };
            let response = IngestResponse {
                message: "Telemetry processed".into(),
                statistics: outcome.statistics,
                validation_errors: outcome.validation_errors,
                write_errors: outcome.write_errors,
            };
            (status, Json(serde_json::to_value(response).unwrap_or_default()))
        }
        Err(err) => {
            tracing::error!(%err, "ingest batch aborted");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Internal server error", "message": err.to_string()})),
            )
        }
    }
}

async fn nearest_zone(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NearestQuery>,
) -> (StatusCode, Json<serde_json::Value>) {
    let max_km = query.max_km.unwrap_or(state.config.max_distance_km);
    match state.zones.nearest(query.lat, query.lon, max_km).await {
        Ok(Some(hit)) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "nearest_zone": hit,
                "query_location": {"lat": query.lat, "lon": query.lon},
            })),
        ),
        Ok(None) => (
            StatusCode::OK,
            Json(json!({
                "success": false,
                "message": format!("No hazard zones found within {max_km}km"),
                "query_location": {"lat": query.lat, "lon": query.lon},
            })),
        ),
        Err(err) => zone_error(err),
    }
}

async fn zones_in_radius(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RadiusQuery>,
) -> (StatusCode, Json<serde_json::Value>) {
    let km = query.km.unwrap_or(state.config.radius_km);
    match state.zones.within_radius(query.lat, query.lon, km).await {
        Ok(result) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "zones": result.zones,
                "count": result.count,
                "radius_km": result.radius_km,
                "risk_summary": result.risk_summary,
                "risk_context": result.risk_context,
                "query_location": {"lat": query.lat, "lon": query.lon},
            })),
        ),
        Err(err) => zone_error(err),
    }
}

fn zone_error(err: LewsError) -> (StatusCode, Json<serde_json::Value>) {
    tracing::warn!(%err, "zone query failed");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({"success": false, "error": err.to_string()})),
    )
}

async fn list_alerts(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<serde_json::Value>) {
    match persistence::alerts::list_alerts(state.db.pool(), 100).await {
        Ok(alerts) => (StatusCode::OK, Json(json!({"alerts": alerts}))),
        Err(err) => {
            tracing::error!(%err, "alert listing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": err.to_string()})),
            )
        }
    }
}

async fn update_alert_status(
    State(state): State<Arc<AppState>>,
    Path(alert_id): Path<String>,
    Json(request): Json<StatusUpdateRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.alerts.transition(&alert_id, request.status).await {
        Ok(true) => (StatusCode::OK, Json(json!({"alert_id": alert_id, "status": request.status}))),
        Ok(false) => (
            StatusCode::CONFLICT,
            Json(json!({
                "error": "transition not allowed from the alert's current status",
                "alert_id": alert_id,
            })),
        ),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": err.to_string()})),
        ),
    }
}

async fn run_detection(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.detector.run().await {
        Ok(summary) => (
            StatusCode::OK,
            Json(serde_json::to_value(summary).unwrap_or_default()),
        ),
        Err(err) => {
            tracing::error!(%err, "detection run failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "error", "error": err.to_string()})),
            )
        }
    }
}
