//! Outbound event bus and notification clients.
//!
//! Both are fire-and-forget: a publish failure is logged and never affects
//! pipeline state.

use std::time::Duration;

use reqwest::Client;
use serde_json::json;

use lews_core::models::{Alert, Reading};

const EVENT_SOURCE: &str = "openlews.ingestor";
const HIGH_RISK_DETAIL_TYPE: &str = "HighRiskTelemetry";
const PUBLISH_TIMEOUT_SECS: u64 = 5;

/// Event bus client for high-risk telemetry events. Disabled when no
/// endpoint is configured.
#[derive(Clone)]
pub struct EventBusClient {
    client: Client,
    endpoint: Option<String>,
}

impl EventBusClient {
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(PUBLISH_TIMEOUT_SECS))
                .build()
                .expect("Failed to create HTTP client"),
            endpoint,
        }
    }

    /// Publish a `HighRiskTelemetry` event for a reading that crossed the
    /// ingest thresholds.
    pub async fn publish_high_risk(&self, reading: &Reading) {
        let Some(endpoint) = self.endpoint.as_deref() else {
            tracing::debug!(sensor_id = %reading.sensor_id, "event bus disabled, skipping publish");
            return;
        };

        let event = high_risk_event(reading);

        match self.client.post(endpoint).json(&event).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::info!(sensor_id = %reading.sensor_id, "published high-risk event");
            }
            Ok(response) => {
                tracing::warn!(
                    sensor_id = %reading.sensor_id,
                    status = %response.status(),
                    "event bus rejected publish"
                );
            }
            Err(err) => {
                tracing::warn!(sensor_id = %reading.sensor_id, %err, "event bus publish failed");
            }
        }
    }
}

/// The event envelope published for a high-risk reading.
fn high_risk_event(reading: &Reading) -> serde_json::Value {
    json!({
        "source": EVENT_SOURCE,
        "detail_type": HIGH_RISK_DETAIL_TYPE,
        "detail": {
            "sensor_id": reading.sensor_id,
            "timestamp": reading.timestamp,
            "latitude": reading.latitude,
            "longitude": reading.longitude,
            "moisture_percent": reading.moisture_percent,
            "pore_pressure_kpa": reading.pore_pressure_kpa,
            "tilt_rate_mm_hr": reading.tilt_rate_mm_hr,
            "safety_factor": reading.safety_factor,
            "hazard_level": reading.zone_ref.as_ref().map(|z| z.hazard_level.as_str()),
            "alert_reason": "Critical thresholds exceeded",
        },
    })
}

/// Notification channel for alert fan-out (email/SMS bridge lives behind
/// the endpoint). Disabled when no endpoint is configured.
#[derive(Clone)]
pub struct Notifier {
    client: Client,
    endpoint: Option<String>,
}

impl Notifier {
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(PUBLISH_TIMEOUT_SECS))
                .build()
                .expect("Failed to create HTTP client"),
            endpoint,
        }
    }

    pub async fn publish_alert(&self, alert: &Alert) {
        let Some(endpoint) = self.endpoint.as_deref() else {
            tracing::debug!(alert_id = %alert.alert_id, "notifier disabled, skipping publish");
            return;
        };

        let subject = format!("OpenLEWS {} - {}", alert.risk_level.as_str(), alert.alert_id);
        let payload = json!({
            "subject": subject,
            "alert_id": alert.alert_id,
            "status": alert.status,
            "risk_level": alert.risk_level,
            "confidence": alert.confidence,
            "recommended_action": alert.recommended_action,
            "time_to_failure": alert.time_to_failure,
            "latitude": alert.center_lat,
            "longitude": alert.center_lon,
            "location": alert.location,
            "narrative": alert.narrative,
            "created_at": alert.created_at,
        });

        match self.client.post(endpoint).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::info!(alert_id = %alert.alert_id, "alert notification published");
            }
            Ok(response) => {
                tracing::warn!(
                    alert_id = %alert.alert_id,
                    status = %response.status(),
                    "notification rejected"
                );
            }
            Err(err) => {
                tracing::warn!(alert_id = %alert.alert_id, %err, "notification publish failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_risk_event_carries_detail_type_and_readings() {
        let reading: Reading = serde_json::from_value(serde_json::json!({
            "sensor_id": "SENSOR_001",
            "timestamp": 1735430400,
            "latitude": 6.85,
            "longitude": 80.93,
            "geohash": "tc1xyz",
            "moisture_percent": 92.0,
            "pore_pressure_kpa": 12.0
        }))
        .unwrap();

        let event = high_risk_event(&reading);
        assert_eq!(event["source"], "openlews.ingestor");
        assert_eq!(event["detail_type"], "HighRiskTelemetry");
        assert_eq!(event["detail"]["sensor_id"], "SENSOR_001");
        assert_eq!(event["detail"]["moisture_percent"], 92.0);
        assert_eq!(event["detail"]["alert_reason"], "Critical thresholds exceeded");
    }
}
