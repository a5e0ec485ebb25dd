//! Scheduled detection run: score, fuse, cluster, assess, alert.
//!
//! One run fetches the rolling telemetry window, collapses it to the latest
//! reading per sensor, scores and fuses, then pushes each high-risk cluster
//! or isolated sensor through location + zone + LLM + alert with a bounded
//! fan-out. The run carries a deadline; targets left unprocessed when it
//! elapses are retried from telemetry on the next tick.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use lews_core::fusion::{apply_spatial_fusion, detect_clusters};
use lews_core::models::{now_epoch, Cluster, DetectionType, HazardZone, SensorAnalysis};
use lews_core::scorer::{base_risk, DEFAULT_CRITICAL_MOISTURE};

use crate::alerts::{AlertAction, AlertManager, Detection};
use crate::config::Config;
use crate::error::LewsError;
use crate::llm::{AssessmentContext, LlmClient, LlmTransport};
use crate::location::LocationResolver;
use crate::persistence::{self, Database};
use crate::rag::ZoneIndex;

/// Summary returned by every detection run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DetectSummary {
    pub sensors_analyzed: usize,
    pub clusters_detected: usize,
    pub alerts_created: usize,
    pub alerts_escalated: usize,
    pub execution_time_s: f64,
}

/// One element of the high-risk set S.
enum Target {
    Cluster(Cluster),
    Individual(Box<SensorAnalysis>),
}

pub struct Detector<T: LlmTransport> {
    db: Database,
    config: Arc<Config>,
    llm: LlmClient<T>,
    zones: ZoneIndex,
    alerts: AlertManager,
    location: LocationResolver,
}

impl<T: LlmTransport> Detector<T> {
    pub fn new(
        db: Database,
        config: Arc<Config>,
        llm: LlmClient<T>,
        zones: ZoneIndex,
        alerts: AlertManager,
        location: LocationResolver,
    ) -> Self {
        Self {
            db,
            config,
            llm,
            zones,
            alerts,
            location,
        }
    }

    /// Execute one detection pass.
    pub async fn run(self: &Arc<Self>) -> Result<DetectSummary, LewsError> {
        let started = Instant::now();
        let deadline = Duration::from_secs(self.config.detect_deadline_s);

        let end = now_epoch();
        let start = end - self.config.window_seconds;

        let readings = tokio::time::timeout(
            Duration::from_secs(self.config.telemetry_page_timeout_s),
            persistence::telemetry::latest_per_sensor(self.db.pool(), start, end),
        )
        .await
        .map_err(|_| LewsError::StorageTransient("telemetry fetch timed out".into()))??;

        let mut summary = DetectSummary::default();
        if readings.is_empty() {
            tracing::info!("no telemetry in window, nothing to analyse");
            summary.execution_time_s = started.elapsed().as_secs_f64();
            return Ok(summary);
        }

        // Score every sensor on its latest reading.
        let mut analyses: Vec<SensorAnalysis> = readings
            .into_iter()
            .map(|reading| {
                let critical = reading
                    .zone_ref
                    .as_ref()
                    .map(|z| z.critical_moisture_percent)
                    .unwrap_or(DEFAULT_CRITICAL_MOISTURE);
                let risk = base_risk(
                    &reading,
                    critical,
                    self.config.treat_zero_safety_factor_as_failure,
                );
                SensorAnalysis {
                    sensor_id: reading.sensor_id.clone(),
                    reading,
                    base_risk: risk,
                    spatial_correlation: 0.0,
                    composite_risk: 0.0,
                    neighbour_ids: Vec::new(),
                    zone_context: None,
                    critical_moisture_percent: critical,
                }
            })
            .collect();

        let params = self.config.fusion_params();
        apply_spatial_fusion(&mut analyses, &params);
        let clusters = detect_clusters(&analyses, &params);

        summary.sensors_analyzed = analyses.len();
        summary.clusters_detected = clusters.len();

        tracing::info!(
            sensors = summary.sensors_analyzed,
            clusters = summary.clusters_detected,
            "analysis complete"
        );

        // S = high-risk clusters + high-risk sensors outside any cluster.
        let clustered: std::collections::HashSet<String> = clusters
            .iter()
            .flat_map(|c| c.member_ids.iter().cloned())
            .collect();

        let mut targets: Vec<Target> = Vec::new();
        for cluster in clusters {
            if cluster.avg_composite_risk > self.config.risk_threshold {
                targets.push(Target::Cluster(cluster));
            }
        }
        for analysis in &analyses {
            if analysis.composite_risk > self.config.risk_threshold
                && !clustered.contains(analysis.sensor_id.as_str())
            {
                targets.push(Target::Individual(Box::new(analysis.clone())));
            }
        }

        // Bounded fan-out over the remaining work, within the run deadline.
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_detections));
        let mut join_set: JoinSet<Result<AlertAction, LewsError>> = JoinSet::new();

        for target in targets {
            let Some(remaining) = deadline.checked_sub(started.elapsed()) else {
                tracing::warn!("run deadline reached, remaining targets deferred to next run");
                break;
            };

            let detector = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let analyses_for_cluster = match &target {
                Target::Cluster(cluster) => cluster
                    .member_ids
                    .iter()
                    .filter_map(|id| analyses.iter().find(|a| &a.sensor_id == id))
                    .cloned()
                    .collect(),
                Target::Individual(_) => Vec::new(),
            };

            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| LewsError::Deadline)?;
                match tokio::time::timeout(
                    remaining,
                    detector.process_target(target, analyses_for_cluster),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(LewsError::Deadline),
                }
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(AlertAction::Created)) => summary.alerts_created += 1,
                Ok(Ok(AlertAction::Escalated)) => summary.alerts_escalated += 1,
                Ok(Ok(AlertAction::Unchanged)) => {}
                Ok(Err(err)) => {
                    // Item failures never sink the run.
                    tracing::warn!(%err, "detection target failed");
                }
                Err(err) => {
                    tracing::warn!(%err, "detection task panicked");
                }
            }
        }

        summary.execution_time_s = started.elapsed().as_secs_f64();
        tracing::info!(
            created = summary.alerts_created,
            escalated = summary.alerts_escalated,
            execution_time_s = summary.execution_time_s,
            "detection run complete"
        );
        Ok(summary)
    }

    /// Location + zone context + assessment + (narrative) + alert for one
    /// element of the high-risk set.
    async fn process_target(
        self: Arc<Self>,
        target: Target,
        cluster_members: Vec<SensorAnalysis>,
    ) -> Result<AlertAction, LewsError> {
        let (lat, lon) = match &target {
            Target::Cluster(c) => (c.centroid_lat, c.centroid_lon),
            Target::Individual(a) => (a.reading.latitude, a.reading.longitude),
        };

        let location = self.location.resolve(lat, lon).await;

        // RAG context is advisory: an unavailable index downgrades to defaults.
        let zone_hit = match self.zones.nearest(lat, lon, self.config.max_distance_km).await {
            Ok(hit) => hit,
            Err(err) => {
                tracing::warn!(%err, "zone context unavailable, proceeding with defaults");
                None
            }
        };
        let zone_snapshot: Option<HazardZone> = zone_hit.as_ref().map(|h| h.zone.clone());
        let critical = zone_snapshot
            .as_ref()
            .map(|z| lews_core::zones::critical_moisture(z, &self.config.soil_defaults))
            .unwrap_or(DEFAULT_CRITICAL_MOISTURE);

        let zone_json = match &zone_hit {
            Some(hit) => json!({
                "zone_id": hit.zone.zone_id,
                "hazard_level": hit.zone.hazard_level.as_str(),
                "soil_type": hit.zone.soil_type,
                "land_use": hit.zone.land_use,
                "landslide_type": hit.zone.landslide_type,
                "district": hit.zone.district,
                "distance_m": hit.distance_m,
            }),
            None => json!({"hazard_level": "Unknown"}),
        };

        let (context, detection) = match &target {
            Target::Cluster(cluster) => {
                let representative = cluster
                    .member_ids
                    .first()
                    .cloned()
                    .unwrap_or_default();
                let lead = cluster_members
                    .iter()
                    .find(|a| a.sensor_id == representative);

                let context = AssessmentContext {
                    detection_type: "cluster".into(),
                    cluster_size: Some(cluster.member_ids.len()),
                    avg_risk: Some(cluster.avg_composite_risk),
                    risk_score: cluster.max_composite_risk,
                    spatial_correlation: lead.map(|a| a.spatial_correlation).unwrap_or(0.0),
                    sensor_ids: cluster.member_ids.clone(),
                    latitude: lat,
                    longitude: lon,
                    location_label: location.label.clone(),
                    telemetry: lead
                        .map(|a| telemetry_summary(a))
                        .unwrap_or_else(|| json!({})),
                    critical_moisture_percent: critical,
                    zone: zone_json,
                };
                let detection = Detection {
                    detection_type: DetectionType::Cluster,
                    representative_sensor: representative,
                    sensors_affected: cluster.member_ids.clone(),
                    center_lat: lat,
                    center_lon: lon,
                };
                (context, detection)
            }
            Target::Individual(analysis) => {
                let context = AssessmentContext {
                    detection_type: "individual".into(),
                    cluster_size: None,
                    avg_risk: None,
                    risk_score: analysis.composite_risk,
                    spatial_correlation: analysis.spatial_correlation,
                    sensor_ids: vec![analysis.sensor_id.clone()],
                    latitude: lat,
                    longitude: lon,
                    location_label: location.label.clone(),
                    telemetry: telemetry_summary(analysis),
                    critical_moisture_percent: critical,
                    zone: zone_json,
                };
                let detection = Detection {
                    detection_type: DetectionType::Individual,
                    representative_sensor: analysis.sensor_id.clone(),
                    sensors_affected: vec![analysis.sensor_id.clone()],
                    center_lat: lat,
                    center_lon: lon,
                };
                (context, detection)
            }
        };

        let assessment = self.llm.assess_risk(&context).await?;

        let narrative = if assessment.risk_level >= lews_core::models::RiskLevel::Orange {
            let issued_at = chrono::Utc::now().format("%Y-%m-%d %H:%M UTC").to_string();
            Some(
                self.llm
                    .generate_narrative(&assessment, &location.label, &issued_at)
                    .await?,
            )
        } else {
            None
        };

        self.alerts
            .ensure_alert(&detection, &assessment, narrative, location, zone_snapshot)
            .await
    }
}

/// Key readings for the assessment prompt.
fn telemetry_summary(analysis: &SensorAnalysis) -> serde_json::Value {
    let r = &analysis.reading;
    json!({
        "sensor_id": r.sensor_id,
        "moisture_percent": r.moisture_percent,
        "tilt_rate_mm_hr": r.tilt_rate_mm_hr,
        "vibration_count": r.vibration_count,
        "vibration_baseline": r.vibration_baseline,
        "pore_pressure_kpa": r.pore_pressure_kpa,
        "safety_factor": r.safety_factor,
        "rainfall_24h_mm": r.rainfall_24h_mm,
        "base_risk": analysis.base_risk,
        "composite_risk": analysis.composite_risk,
    })
}
