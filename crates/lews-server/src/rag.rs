//! Hazard-zone query service.
//!
//! Lookups expand the query point's geohash cell to its 9-cell
//! neighbourhood, fetch the bucketed zones, and rank by distance. A zone
//! whose bounding box contains the query point counts as distance zero.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use lews_core::geohash;
use lews_core::models::{HazardLevel, HazardZone};
use lews_core::zones::zone_distance_m;

use crate::config::Config;
use crate::error::LewsError;
use crate::persistence::{self, Database};

/// A zone hit with its distance from the query point.
#[derive(Debug, Clone, Serialize)]
pub struct ZoneHit {
    #[serde(flatten)]
    pub zone: HazardZone,
    pub distance_m: f64,
}

/// Result of a radius query.
#[derive(Debug, Clone, Serialize)]
pub struct RadiusResult {
    pub zones: Vec<ZoneHit>,
    pub count: usize,
    pub radius_km: f64,
    /// Histogram of hazard levels among the hits.
    pub risk_summary: BTreeMap<String, usize>,
    pub risk_context: String,
}

#[derive(Clone)]
pub struct ZoneIndex {
    db: Database,
    precision: usize,
    query_timeout: Duration,
}

impl ZoneIndex {
    pub fn new(db: Database, config: &Config) -> Self {
        Self {
            db,
            precision: config.zone_geohash_precision,
            query_timeout: Duration::from_secs(config.zone_query_timeout_s),
        }
    }

    /// Fetch candidate zones from the query point's 9-cell neighbourhood,
    /// de-duplicated by zone id.
    async fn candidates(&self, lat: f64, lon: f64) -> Result<Vec<HazardZone>, LewsError> {
        let cell = geohash::encode(lat, lon, self.precision);
        let cells = geohash::neighbours8(&cell);

        let mut zones: Vec<HazardZone> = Vec::new();
        for cell in &cells {
            let found = tokio::time::timeout(
                self.query_timeout,
                persistence::zones::find_by_geohash4(self.db.pool(), cell),
            )
            .await
            .map_err(|_| LewsError::RagUnavailable(format!("zone query timed out for {cell}")))?
            .map_err(|e| LewsError::RagUnavailable(e.to_string()))?;

            for zone in found {
                if !zones.iter().any(|z| z.zone_id == zone.zone_id) {
                    zones.push(zone);
                }
            }
        }
        Ok(zones)
    }

    /// Nearest zone within `max_km`, or None. Ties at the same distance go
    /// to the higher hazard level.
    pub async fn nearest(
        &self,
        lat: f64,
        lon: f64,
        max_km: f64,
    ) -> Result<Option<ZoneHit>, LewsError> {
        let max_m = max_km * 1000.0;
        let best = self
            .candidates(lat, lon)
            .await?
            .into_iter()
            .map(|zone| {
                let distance_m = zone_distance_m(&zone, lat, lon);
                ZoneHit { zone, distance_m }
            })
            .filter(|hit| hit.distance_m <= max_m)
            .min_by(|a, b| {
                a.distance_m
                    .partial_cmp(&b.distance_m)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.zone.hazard_level.cmp(&a.zone.hazard_level))
            });
        Ok(best)
    }

    /// All zones within `km`, ascending by distance, with a severity
    /// histogram and a short human-readable context line.
    pub async fn within_radius(
        &self,
        lat: f64,
        lon: f64,
        km: f64,
    ) -> Result<RadiusResult, LewsError> {
        let max_m = km * 1000.0;
        let mut hits: Vec<ZoneHit> = self
            .candidates(lat, lon)
            .await?
            .into_iter()
            .map(|zone| {
                let distance_m = zone_distance_m(&zone, lat, lon);
                ZoneHit { zone, distance_m }
            })
            .filter(|hit| hit.distance_m <= max_m)
            .collect();

        hits.sort_by(|a, b| {
            a.distance_m
                .partial_cmp(&b.distance_m)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut risk_summary: BTreeMap<String, usize> = BTreeMap::new();
        for hit in &hits {
            *risk_summary
                .entry(hit.zone.hazard_level.as_str().to_string())
                .or_default() += 1;
        }

        let risk_context = summarise(&hits, &risk_summary);

        Ok(RadiusResult {
            count: hits.len(),
            radius_km: km,
            zones: hits,
            risk_summary,
            risk_context,
        })
    }
}

fn summarise(hits: &[ZoneHit], summary: &BTreeMap<String, usize>) -> String {
    let Some(nearest) = hits.first() else {
        return "No hazard zones in vicinity".to_string();
    };

    let mut parts = vec![format!(
        "Nearest zone is {} hazard level ({:.0}m away)",
        nearest.zone.hazard_level.as_str(),
        nearest.distance_m
    )];

    let severe = summary.get(HazardLevel::High.as_str()).copied().unwrap_or(0)
        + summary
            .get(HazardLevel::VeryHigh.as_str())
            .copied()
            .unwrap_or(0);
    if severe > 0 {
        parts.push(format!("{severe} HIGH risk zone(s) detected"));
    }

    parts.join(". ")
}
