//! Hazard-zone ranking and site-threshold derivation.

use serde::{Deserialize, Serialize};

use crate::geo::haversine_m;
use crate::models::{HazardLevel, HazardZone};

/// Soil-type baselines for the critical moisture threshold (percent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoilDefaults {
    pub colluvium: f64,
    pub residual: f64,
    pub fill: f64,
    pub bedrock: f64,
    pub default: f64,
}

impl Default for SoilDefaults {
    fn default() -> Self {
        Self {
            colluvium: 35.0,
            residual: 45.0,
            fill: 30.0,
            bedrock: 60.0,
            default: 40.0,
        }
    }
}

/// Derive the site-specific critical moisture percentage for a zone.
///
/// Starts from the soil-type baseline, then shifts by hazard level: the
/// worse the zonation, the earlier the moisture component saturates.
/// Clamped to [20, 80].
pub fn critical_moisture(zone: &HazardZone, defaults: &SoilDefaults) -> f64 {
    let soil = zone.soil_type.as_deref().unwrap_or("").to_ascii_lowercase();
    let baseline = if soil.contains("colluvium") {
        defaults.colluvium
    } else if soil.contains("residual") {
        defaults.residual
    } else if soil.contains("fill") {
        defaults.fill
    } else if soil.contains("bedrock") {
        defaults.bedrock
    } else {
        defaults.default
    };

    let adjustment = match zone.hazard_level {
        HazardLevel::VeryHigh => -5.0,
        HazardLevel::High => -2.0,
        HazardLevel::Moderate => 0.0,
        HazardLevel::Low => 5.0,
        HazardLevel::Unknown => 0.0,
    };

    (baseline + adjustment).clamp(20.0, 80.0)
}

/// Distance from a query point to a zone: zero when the bounding box
/// contains the point, otherwise Haversine to the centroid.
pub fn zone_distance_m(zone: &HazardZone, lat: f64, lon: f64) -> f64 {
    if zone.bounding_box.contains(lat, lon) {
        0.0
    } else {
        haversine_m(lat, lon, zone.centroid_lat, zone.centroid_lon)
    }
}

/// Pick the best zone for a point from a candidate list.
///
/// Zones whose bounding box contains the point are preferred; among those
/// (or among all candidates when none contain it) the highest hazard level
/// wins, ties broken by smallest centroid distance.
pub fn pick_zone<'a>(candidates: &'a [HazardZone], lat: f64, lon: f64) -> Option<&'a HazardZone> {
    let containing: Vec<&HazardZone> = candidates
        .iter()
        .filter(|z| z.bounding_box.contains(lat, lon))
        .collect();

    let pool: Vec<&HazardZone> = if containing.is_empty() {
        candidates.iter().collect()
    } else {
        containing
    };

    pool.into_iter().min_by(|a, b| {
        b.hazard_level
            .cmp(&a.hazard_level)
            .then_with(|| {
                let da = haversine_m(lat, lon, a.centroid_lat, a.centroid_lon);
                let db = haversine_m(lat, lon, b.centroid_lat, b.centroid_lon);
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
    })
}
