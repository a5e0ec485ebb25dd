use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use lews_core::models::{BoundingBox, HazardLevel, HazardZone};

use crate::{api, config::Config, persistence, state::AppState};

async fn setup_app() -> (axum::Router, Arc<AppState>) {
    let mut config = Config::from_env();
    config.database_path = std::env::temp_dir()
        .join(format!("lews-test-{}.db", uuid::Uuid::new_v4()))
        .to_string_lossy()
        .to_string();
    config.database_max_connections = 1;
    config.event_bus_url = None;
    config.notifier_url = None;
    config.geocoder_url = None;

    let db = persistence::init_database(&config.database_path, config.database_max_connections)
        .await
        .expect("init db");
    let state = Arc::new(AppState::new(db, config));

    let app = api::routes().with_state(state.clone());
    (app, state)
}

async fn read_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("parse json")
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn seed_zone() -> HazardZone {
    HazardZone {
        zone_id: "NBRO-TEST-0001".into(),
        hazard_level: HazardLevel::High,
        centroid_lat: 6.85,
        centroid_lon: 80.93,
        geohash4: "tc1w".into(),
        geohash6: "tc1wcx".into(),
        bounding_box: BoundingBox {
            min_lat: 6.8,
            max_lat: 6.9,
            min_lon: 80.9,
            max_lon: 81.0,
        },
        district: Some("Badulla".into()),
        ds_division: None,
        gn_division: None,
        soil_type: Some("Colluvium".into()),
        land_use: Some("Tea".into()),
        landslide_type: None,
        area_sqm: 10_000.0,
        version: 1,
    }
}

#[tokio::test]
async fn ingest_single_valid_reading() {
    let (app, _state) = setup_app().await;

    let request = post_json(
        "/v1/telemetry",
        json!({
            "telemetry": [{
                "sensor_id": "SENSOR_001",
                "timestamp": 1735430400,
                "latitude": 6.85,
                "longitude": 80.93,
                "geohash": "tc1xyz",
                "moisture_percent": 75.5
            }]
        }),
    );

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await;
    assert_eq!(body["statistics"]["total_received"], 1);
    assert_eq!(body["statistics"]["validated"], 1);
    assert_eq!(body["statistics"]["validation_errors"], 0);
    assert_eq!(body["statistics"]["written"], 1);
    assert_eq!(body["statistics"]["high_risk_events"], 0);
}

#[tokio::test]
async fn ingest_rejects_out_of_range_batch() {
    let (app, _state) = setup_app().await;

    let request = post_json(
        "/v1/telemetry",
        json!({
            "telemetry": [{
                "sensor_id": "SENSOR_001",
                "timestamp": 1735430400,
                "latitude": 6.85,
                "longitude": 80.93,
                "geohash": "tc1xyz",
                "moisture_percent": 105.0
            }]
        }),
    );

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = read_json(response).await;
    assert_eq!(body["statistics"]["total_received"], 1);
    assert_eq!(body["statistics"]["validated"], 0);
    assert_eq!(body["statistics"]["validation_errors"], 1);
    let error = body["validation_errors"][0]["error"].as_str().unwrap();
    assert!(error.contains("out of range"), "{error}");
}

#[tokio::test]
async fn ingest_empty_batch_is_bad_request() {
    let (app, _state) = setup_app().await;
    let response = app
        .oneshot(post_json("/v1/telemetry", json!({"telemetry": []})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn ingest_counts_high_risk_events() {
    let (app, _state) = setup_app().await;

    let request = post_json(
        "/v1/telemetry",
        json!({
            "telemetry": [{
                "sensor_id": "SENSOR_002",
                "timestamp": 1735430400,
                "latitude": 6.85,
                "longitude": 80.93,
                "geohash": "tc1xyz",
                "moisture_percent": 90.0,
                "pore_pressure_kpa": 12.0,
                "tilt_rate_mm_hr": 6.0,
                "safety_factor": 1.1
            }]
        }),
    );

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["statistics"]["high_risk_events"], 1);
}

#[tokio::test]
async fn ingest_mixed_batch_isolates_the_bad_item() {
    let (app, _state) = setup_app().await;

    let request = post_json(
        "/v1/telemetry",
        json!({
            "telemetry": [
                {
                    "sensor_id": "SENSOR_001",
                    "timestamp": 1735430400,
                    "latitude": 6.85,
                    "longitude": 80.93,
                    "geohash": "tc1xyz",
                    "moisture_percent": 55.0
                },
                {
                    "sensor_id": "S",
                    "timestamp": 1735430400,
                    "latitude": 6.85,
                    "longitude": 80.93,
                    "geohash": "tc1xyz",
                    "moisture_percent": 55.0
                }
            ]
        }),
    );

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["statistics"]["validated"], 1);
    assert_eq!(body["statistics"]["written"], 1);
    assert_eq!(body["statistics"]["validation_errors"], 1);
    assert_eq!(body["validation_errors"][0]["index"], 1);
}

#[tokio::test]
async fn zone_queries_round_trip() {
    let (app, state) = setup_app().await;
    persistence::zones::upsert_zone(state.db.pool(), &seed_zone())
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v1/zones/nearest?lat=6.85&lon=80.93&max_km=5.0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["nearest_zone"]["zone_id"], "NBRO-TEST-0001");
    assert_eq!(body["nearest_zone"]["distance_m"], 0.0);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/zones/radius?lat=6.85&lon=80.93&km=1.0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["risk_summary"]["High"], 1);
}

#[tokio::test]
async fn zone_query_misses_return_success_false() {
    let (app, _state) = setup_app().await;
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/zones/nearest?lat=6.85&lon=80.93")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn alert_status_route_walks_state_machine() {
    let (app, state) = setup_app().await;

    // Seed one active alert directly.
    let mut alert = crate::alerts::tests_support::sample_alert();
    alert.alert_id = "SENSOR:SENSOR_009_20241229_000000".into();
    persistence::alerts::insert_alert(state.db.pool(), &alert)
        .await
        .unwrap();

    let uri = format!("/v1/alerts/{}/status", alert.alert_id);

    // active -> resolved is rejected
    let response = app
        .clone()
        .oneshot(post_json(&uri, json!({"status": "resolved"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // active -> acknowledged -> resolved
    let response = app
        .clone()
        .oneshot(post_json(&uri, json!({"status": "acknowledged"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(post_json(&uri, json!({"status": "resolved"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/alerts")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = read_json(response).await;
    assert_eq!(body["alerts"][0]["status"], "resolved");
}
