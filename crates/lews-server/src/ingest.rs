//! Ingest pipeline: validate, enrich, classify, persist.
//!
//! Each batch item gets an independent outcome; only a fatal storage error
//! aborts the batch. The enrichment cache (`geohash4 -> zones`) lives for
//! one batch and is discarded with it.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;

use lews_core::models::{HazardLevel, RawReading, Reading, ZoneRef};
use lews_core::zones::{critical_moisture, pick_zone};
use lews_core::{validate, HazardZone};

use crate::config::Config;
use crate::error::LewsError;
use crate::events::EventBusClient;
use crate::persistence::{self, Database};

/// Per-batch processing statistics, returned to the HTTP caller.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestStats {
    pub total_received: usize,
    pub validated: usize,
    pub validation_errors: usize,
    pub written: usize,
    pub write_failures: usize,
    pub high_risk_events: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemError {
    pub index: usize,
    pub sensor_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub statistics: IngestStats,
    pub validation_errors: Vec<ItemError>,
    pub write_errors: Vec<ItemError>,
}

#[derive(Clone)]
pub struct IngestHandler {
    db: Database,
    config: std::sync::Arc<Config>,
    events: EventBusClient,
}

impl IngestHandler {
    pub fn new(db: Database, config: std::sync::Arc<Config>, events: EventBusClient) -> Self {
        Self { db, config, events }
    }

    /// Process one telemetry batch end to end.
    pub async fn handle_batch(&self, batch: Vec<RawReading>) -> Result<IngestOutcome, LewsError> {
        let mut stats = IngestStats {
            total_received: batch.len(),
            ..Default::default()
        };
        let mut validation_errors = Vec::new();
        let mut write_errors = Vec::new();
        let mut readings: Vec<(usize, Reading)> = Vec::new();

        // Scoped to this invocation: sensors in the same cell share one lookup.
        let mut zone_cache: HashMap<String, Vec<HazardZone>> = HashMap::new();

        for (index, raw) in batch.iter().enumerate() {
            let mut reading = match validate(raw) {
                Ok(reading) => reading,
                Err(err) => {
                    tracing::warn!(index, %err, "validation failed");
                    validation_errors.push(ItemError {
                        index,
                        sensor_id: raw.sensor_id.clone().unwrap_or_else(|| "unknown".into()),
                        error: err.to_string(),
                    });
                    continue;
                }
            };

            if self.config.enable_enrichment {
                // Best-effort: a zone-store failure keeps the reading.
                if let Err(err) = self.enrich(&mut reading, &mut zone_cache).await {
                    tracing::warn!(sensor_id = %reading.sensor_id, %err, "enrichment skipped");
                }
            }

            if self.config.enable_event_publish && is_high_risk(&reading) {
                self.events.publish_high_risk(&reading).await;
                stats.high_risk_events += 1;
            }

            readings.push((index, reading));
        }

        stats.validated = readings.len();
        stats.validation_errors = validation_errors.len();

        let now = lews_core::models::now_epoch();
        for (_, reading) in readings.iter_mut() {
            reading.stamp_ingested(now);
        }

        let batch_only: Vec<Reading> = readings.iter().map(|(_, r)| r.clone()).collect();
        let results = persistence::telemetry::put_batch(self.db.pool(), &batch_only).await;
        for ((index, reading), result) in readings.iter().zip(results) {
            match result {
                Ok(()) => stats.written += 1,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    tracing::warn!(sensor_id = %reading.sensor_id, %err, "write failed");
                    stats.write_failures += 1;
                    write_errors.push(ItemError {
                        index: *index,
                        sensor_id: reading.sensor_id.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            total = stats.total_received,
            validated = stats.validated,
            written = stats.written,
            high_risk = stats.high_risk_events,
            "ingest batch complete"
        );

        Ok(IngestOutcome {
            statistics: stats,
            validation_errors,
            write_errors,
        })
    }

    /// Attach the most relevant hazard zone to a reading.
    async fn enrich(
        &self,
        reading: &mut Reading,
        cache: &mut HashMap<String, Vec<HazardZone>>,
    ) -> Result<(), LewsError> {
        let geohash4 = reading.geohash[..4].to_string();

        if !cache.contains_key(&geohash4) {
            let timeout = Duration::from_secs(self.config.zone_query_timeout_s);
            let zones = tokio::time::timeout(
                timeout,
                persistence::zones::find_by_geohash4(self.db.pool(), &geohash4),
            )
            .await
            .map_err(|_| LewsError::RagUnavailable(format!("zone query timed out for {geohash4}")))?
            .map_err(|e| LewsError::RagUnavailable(e.to_string()))?;
            cache.insert(geohash4.clone(), zones);
        }

        let candidates = &cache[&geohash4];
        if let Some(zone) = pick_zone(candidates, reading.latitude, reading.longitude) {
            reading.zone_ref = Some(ZoneRef {
                zone_id: zone.zone_id.clone(),
                hazard_level: zone.hazard_level,
                district: zone.district.clone(),
                ds_division: zone.ds_division.clone(),
                gn_division: zone.gn_division.clone(),
                soil_type: zone.soil_type.clone(),
                landslide_type: zone.landslide_type.clone(),
                critical_moisture_percent: critical_moisture(zone, &self.config.soil_defaults),
            });
            reading.enriched = true;
        }
        Ok(())
    }
}

/// Threshold classification for the `HighRiskTelemetry` event.
pub fn is_high_risk(reading: &Reading) -> bool {
    if reading.moisture_percent >= 85.0 {
        return true;
    }
    if reading.pore_pressure_kpa.unwrap_or(0.0) >= 10.0 {
        return true;
    }
    if reading.tilt_rate_mm_hr.unwrap_or(0.0) >= 5.0 {
        return true;
    }
    let sf = reading.safety_factor.unwrap_or(10.0);
    if sf > 0.0 && sf < 1.2 {
        return true;
    }
    if let Some(zone) = &reading.zone_ref {
        if zone.hazard_level >= HazardLevel::High && reading.moisture_percent > 70.0 {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{init_database, zones::upsert_zone};
    use lews_core::models::{BoundingBox, TimestampValue};

    fn raw(sensor_id: &str, moisture: f64) -> RawReading {
        RawReading {
            sensor_id: Some(sensor_id.into()),
            timestamp: Some(TimestampValue::Epoch(1_735_430_400.0)),
            latitude: Some(6.85),
            longitude: Some(80.93),
            geohash: Some("tc1wcx".into()),
            moisture_percent: Some(moisture),
            ..Default::default()
        }
    }

    fn zone(id: &str, level: HazardLevel) -> HazardZone {
        HazardZone {
            zone_id: id.into(),
            hazard_level: level,
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
            land_use: None,
            landslide_type: None,
            area_sqm: 10_000.0,
            version: 1,
        }
    }

    async fn handler(enrichment: bool) -> IngestHandler {
        let db = init_database(":memory:", 1).await.unwrap();
        let mut config = Config::from_env();
        config.enable_enrichment = enrichment;
        config.enable_event_publish = true;
        config.event_bus_url = None;
        IngestHandler::new(db, std::sync::Arc::new(config), EventBusClient::new(None))
    }

    #[tokio::test]
    async fn valid_reading_is_persisted_with_expiry() {
        let h = handler(false).await;
        let outcome = h.handle_batch(vec![raw("SENSOR_001", 75.5)]).await.unwrap();

        assert_eq!(outcome.statistics.total_received, 1);
        assert_eq!(outcome.statistics.validated, 1);
        assert_eq!(outcome.statistics.validation_errors, 0);
        assert_eq!(outcome.statistics.written, 1);
        assert_eq!(outcome.statistics.high_risk_events, 0);

        let stored = persistence::telemetry::query_by_time(h.db.pool(), 0, i64::MAX, None)
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        let ingested_at = stored[0].ingested_at.expect("stamped");
        assert_eq!(stored[0].expires_at, Some(ingested_at + 30 * 86400));
    }

    #[tokio::test]
    async fn out_of_range_item_is_rejected_without_stopping_siblings() {
        let h = handler(false).await;
        let outcome = h
            .handle_batch(vec![raw("SENSOR_001", 105.0), raw("SENSOR_002", 50.0)])
            .await
            .unwrap();

        assert_eq!(outcome.statistics.total_received, 2);
        assert_eq!(outcome.statistics.validated, 1);
        assert_eq!(outcome.statistics.validation_errors, 1);
        assert_eq!(outcome.statistics.written, 1);
        assert_eq!(outcome.validation_errors[0].index, 0);
        assert_eq!(outcome.validation_errors[0].sensor_id, "SENSOR_001");
        assert!(outcome.validation_errors[0].error.contains("out of range"));
    }

    #[tokio::test]
    async fn high_risk_thresholds_fire_events() {
        let h = handler(false).await;
        let mut hot = raw("SENSOR_003", 90.0);
        hot.pore_pressure_kpa = Some(12.0);
        hot.tilt_rate_mm_hr = Some(6.0);
        hot.safety_factor = Some(1.1);

        let outcome = h
            .handle_batch(vec![hot, raw("SENSOR_004", 40.0)])
            .await
            .unwrap();
        assert_eq!(outcome.statistics.high_risk_events, 1);
    }

    #[tokio::test]
    async fn enrichment_attaches_highest_severity_containing_zone() {
        let h = handler(true).await;
        upsert_zone(h.db.pool(), &zone("Z_MOD", HazardLevel::Moderate))
            .await
            .unwrap();
        upsert_zone(h.db.pool(), &zone("Z_HIGH", HazardLevel::High))
            .await
            .unwrap();

        h.handle_batch(vec![raw("SENSOR_001", 60.0)]).await.unwrap();

        let stored = persistence::telemetry::query_by_time(h.db.pool(), 0, i64::MAX, None)
            .await
            .unwrap();
        let zone_ref = stored[0].zone_ref.as_ref().expect("enriched");
        assert!(stored[0].enriched);
        assert_eq!(zone_ref.zone_id, "Z_HIGH");
        // Colluvium 35 with High adjustment -2.
        assert_eq!(zone_ref.critical_moisture_percent, 33.0);
    }

    #[tokio::test]
    async fn zone_hazard_plus_moisture_is_high_risk() {
        let h = handler(true).await;
        upsert_zone(h.db.pool(), &zone("Z_HIGH", HazardLevel::High))
            .await
            .unwrap();

        // 72% moisture alone is not high risk; with a High zone it is.
        let outcome = h.handle_batch(vec![raw("SENSOR_001", 72.0)]).await.unwrap();
        assert_eq!(outcome.statistics.high_risk_events, 1);
    }

    #[tokio::test]
    async fn replayed_batch_yields_identical_statistics() {
        let h = handler(false).await;
        let batch = vec![raw("SENSOR_001", 55.0), raw("SENSOR_002", 105.0)];

        let first = h.handle_batch(batch.clone()).await.unwrap();
        let second = h.handle_batch(batch).await.unwrap();

        assert_eq!(first.statistics.written, second.statistics.written);
        assert_eq!(
            first.statistics.validation_errors,
            second.statistics.validation_errors
        );

        let stored = persistence::telemetry::query_by_time(h.db.pool(), 0, i64::MAX, None)
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
    }
}
