//! Core data models for the LEWS pipeline.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Seconds a persisted reading or alert is retained before expiry.
pub const RETENTION_SECONDS: i64 = 30 * 24 * 3600;

/// Hazard zonation severity. Ordering is total: Unknown < Low < Moderate
/// < High < VeryHigh.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum HazardLevel {
    #[default]
    Unknown,
    Low,
    Moderate,
    High,
    #[serde(rename = "Very High", alias = "VeryHigh")]
    VeryHigh,
}

impl HazardLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            HazardLevel::Unknown => "Unknown",
            HazardLevel::Low => "Low",
            HazardLevel::Moderate => "Moderate",
            HazardLevel::High => "High",
            HazardLevel::VeryHigh => "Very High",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "Low" => HazardLevel::Low,
            "Moderate" => HazardLevel::Moderate,
            "High" => HazardLevel::High,
            "Very High" | "VeryHigh" => HazardLevel::VeryHigh,
            _ => HazardLevel::Unknown,
        }
    }
}

/// Inclusive geographic bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// Inclusive containment test.
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        self.min_lat <= lat && lat <= self.max_lat && self.min_lon <= lon && lon <= self.max_lon
    }

    /// Axis-aligned box around a polygon's vertices ([lat, lon] pairs).
    /// Returns None for an empty ring.
    pub fn around(points: &[[f64; 2]]) -> Option<Self> {
        let first = points.first()?;
        let mut bbox = BoundingBox {
            min_lat: first[0],
            max_lat: first[0],
            min_lon: first[1],
            max_lon: first[1],
        };
        for point in &points[1..] {
            bbox.min_lat = bbox.min_lat.min(point[0]);
            bbox.max_lat = bbox.max_lat.max(point[0]);
            bbox.min_lon = bbox.min_lon.min(point[1]);
            bbox.max_lon = bbox.max_lon.max(point[1]);
        }
        Some(bbox)
    }
}

/// A hazard polygon's projection into index form. Zones are written by an
/// external loader; this system only reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HazardZone {
    pub zone_id: String,
    pub hazard_level: HazardLevel,
    pub centroid_lat: f64,
    pub centroid_lon: f64,
    pub geohash4: String,
    pub geohash6: String,
    pub bounding_box: BoundingBox,
    #[serde(default)]
    pub district: Option<String>,
    #[serde(default)]
    pub ds_division: Option<String>,
    #[serde(default)]
    pub gn_division: Option<String>,
    #[serde(default)]
    pub soil_type: Option<String>,
    #[serde(default)]
    pub land_use: Option<String>,
    #[serde(default)]
    pub landslide_type: Option<String>,
    #[serde(default)]
    pub area_sqm: f64,
    #[serde(default)]
    pub version: i64,
}

/// Zone metadata attached to a reading during enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneRef {
    pub zone_id: String,
    pub hazard_level: HazardLevel,
    #[serde(default)]
    pub district: Option<String>,
    #[serde(default)]
    pub ds_division: Option<String>,
    #[serde(default)]
    pub gn_division: Option<String>,
    #[serde(default)]
    pub soil_type: Option<String>,
    #[serde(default)]
    pub landslide_type: Option<String>,
    /// Site-specific moisture threshold derived from the zone (percent).
    pub critical_moisture_percent: f64,
}

/// Raw inbound telemetry as it arrives on the wire. All fields are optional
/// so each item in a batch can be validated (and rejected) independently.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawReading {
    pub sensor_id: Option<String>,
    pub timestamp: Option<TimestampValue>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub geohash: Option<String>,
    pub moisture_percent: Option<f64>,
    pub tilt_x_degrees: Option<f64>,
    pub tilt_y_degrees: Option<f64>,
    pub tilt_rate_mm_hr: Option<f64>,
    pub pore_pressure_kpa: Option<f64>,
    pub vibration_count: Option<f64>,
    pub vibration_baseline: Option<f64>,
    pub safety_factor: Option<f64>,
    pub rainfall_24h_mm: Option<f64>,
    pub battery_percent: Option<f64>,
    pub temperature_c: Option<f64>,
}

/// Timestamp on the wire: epoch seconds or an ISO-8601 string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TimestampValue {
    Epoch(f64),
    Iso(String),
}

/// A validated sensor observation. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub sensor_id: String,
    /// Epoch seconds.
    pub timestamp: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub geohash: String,
    pub moisture_percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tilt_x_degrees: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tilt_y_degrees: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tilt_rate_mm_hr: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pore_pressure_kpa: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vibration_count: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vibration_baseline: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rainfall_24h_mm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_ref: Option<ZoneRef>,
    #[serde(default)]
    pub enriched: bool,
    /// Stamped at write time (epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingested_at: Option<i64>,
    /// `ingested_at` + 30 days.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl Reading {
    /// Stamp write-time metadata: ingestion time and retention expiry.
    pub fn stamp_ingested(&mut self, now: i64) {
        self.ingested_at = Some(now);
        self.expires_at = Some(now + RETENTION_SECONDS);
    }
}

/// Per-sensor analysis state for a single detection run.
#[derive(Debug, Clone, Serialize)]
pub struct SensorAnalysis {
    pub sensor_id: String,
    pub reading: Reading,
    pub base_risk: f64,
    pub spatial_correlation: f64,
    pub composite_risk: f64,
    pub neighbour_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_context: Option<HazardZone>,
    pub critical_moisture_percent: f64,
}

/// A connected group of high-risk sensors.
#[derive(Debug, Clone, Serialize)]
pub struct Cluster {
    /// Ordered by descending composite risk.
    pub member_ids: Vec<String>,
    pub centroid_lat: f64,
    pub centroid_lon: f64,
    pub avg_composite_risk: f64,
    pub max_composite_risk: f64,
}

/// Operator-facing alert severity, distinct from the [0,1] risk scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Yellow,
    Orange,
    Red,
}

impl RiskLevel {
    pub fn ordinal(&self) -> i64 {
        match self {
            RiskLevel::Yellow => 1,
            RiskLevel::Orange => 2,
            RiskLevel::Red => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Yellow => "Yellow",
            RiskLevel::Orange => "Orange",
            RiskLevel::Red => "Red",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Yellow" => Some(RiskLevel::Yellow),
            "Orange" => Some(RiskLevel::Orange),
            "Red" => Some(RiskLevel::Red),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
    Expired,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Active => "active",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Resolved => "resolved",
            AlertStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AlertStatus::Active),
            "acknowledged" => Some(AlertStatus::Acknowledged),
            "resolved" => Some(AlertStatus::Resolved),
            "expired" => Some(AlertStatus::Expired),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionType {
    Cluster,
    Individual,
}

impl DetectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionType::Cluster => "cluster",
            DetectionType::Individual => "individual",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeToFailure {
    Hours,
    Days,
    #[default]
    Unknown,
}

/// Actions the assessment model may recommend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecommendedAction {
    #[serde(rename = "Monitor closely")]
    MonitorClosely,
    #[serde(rename = "Prepare evacuation")]
    PrepareEvacuation,
    #[serde(rename = "Evacuate immediately")]
    EvacuateImmediately,
}

/// Structured risk judgement returned by the assessment model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assessment {
    pub risk_level: RiskLevel,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub trigger_factors: Vec<String>,
    pub recommended_action: RecommendedAction,
    #[serde(default)]
    pub time_to_failure_estimate: TimeToFailure,
    #[serde(default)]
    pub references: Vec<String>,
}

/// Reverse-geocoded (or coordinate-fallback) location attached to alerts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub label: String,
    pub maps_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directions_url: Option<String>,
    pub resolved_by: String,
    #[serde(default)]
    pub address: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationEntry {
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_level: Option<RiskLevel>,
    pub to_level: RiskLevel,
    pub reason: String,
}

/// A durable alert. `risk_level` is monotonically non-decreasing across
/// updates for the same `alert_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    /// `CLUSTER:<sensor>` or `SENSOR:<sensor>`; escalation lookups match on this.
    pub dedup_key: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub status: AlertStatus,
    pub risk_level: RiskLevel,
    pub confidence: f64,
    pub llm_reasoning: String,
    pub trigger_factors: Vec<String>,
    pub recommended_action: RecommendedAction,
    pub time_to_failure: TimeToFailure,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narrative: Option<String>,
    pub detection_type: DetectionType,
    pub sensors_affected: Vec<String>,
    pub center_lat: f64,
    pub center_lon: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<ResolvedLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_snapshot: Option<HazardZone>,
    pub escalation_history: Vec<EscalationEntry>,
    pub expires_at: i64,
}

pub fn now_epoch() -> i64 {
    Utc::now().timestamp()
}
