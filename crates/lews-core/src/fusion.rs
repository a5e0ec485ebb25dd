//! Spatial fusion: neighbour correlation, composite risk, and cluster
//! extraction over a detection run's analyses.

use serde::{Deserialize, Serialize};

use crate::geo::haversine_m;
use crate::models::{Cluster, SensorAnalysis};

/// Neighbour risks within this delta count as "agreeing".
const AGREEMENT_DELTA: f64 = 0.2;
/// Correlation above this boosts composite risk.
const CORRELATION_BOOST_ABOVE: f64 = 0.6;
/// Correlation below this attenuates composite risk (suspected fault).
const CORRELATION_ATTENUATE_BELOW: f64 = 0.3;
const BOOST_MULTIPLIER: f64 = 1.3;
const ATTENUATE_MULTIPLIER: f64 = 0.5;
/// Correlation assigned to sensors with no neighbours in range.
const NEUTRAL_CORRELATION: f64 = 0.5;

/// Tunable fusion parameters, injected from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionParams {
    /// Neighbourhood radius for correlation (metres).
    pub correlation_radius_m: f64,
    /// Single-linkage radius for cluster membership (metres).
    pub cluster_radius_m: f64,
    /// Minimum connected-component size to emit a cluster.
    pub min_cluster_size: usize,
    /// Composite-risk cut for cluster membership and alerting.
    pub risk_threshold: f64,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            correlation_radius_m: 50.0,
            cluster_radius_m: 50.0,
            min_cluster_size: 3,
            risk_threshold: 0.6,
        }
    }
}

/// Fill in `spatial_correlation`, `neighbour_ids`, and `composite_risk` for
/// every analysis in the run.
///
/// Correlation is the share of in-radius neighbours whose base risk agrees
/// (|delta| <= 0.2). Isolated sensors get a neutral 0.5: there is nobody to
/// confirm or contradict them.
pub fn apply_spatial_fusion(analyses: &mut [SensorAnalysis], params: &FusionParams) {
    let sites: Vec<(String, f64, f64, f64)> = analyses
        .iter()
        .map(|a| {
            (
                a.sensor_id.clone(),
                a.reading.latitude,
                a.reading.longitude,
                a.base_risk,
            )
        })
        .collect();

    for analysis in analyses.iter_mut() {
        let mut neighbour_ids = Vec::new();
        let mut agreeing = 0usize;

        for (other_id, lat, lon, other_risk) in &sites {
            if *other_id == analysis.sensor_id {
                continue;
            }
            let dist = haversine_m(analysis.reading.latitude, analysis.reading.longitude, *lat, *lon);
            if dist <= params.correlation_radius_m {
                if (other_risk - analysis.base_risk).abs() <= AGREEMENT_DELTA {
                    agreeing += 1;
                }
                neighbour_ids.push(other_id.clone());
            }
        }

        let correlation = if neighbour_ids.is_empty() {
            NEUTRAL_CORRELATION
        } else {
            agreeing as f64 / neighbour_ids.len() as f64
        };

        let multiplier = if correlation > CORRELATION_BOOST_ABOVE {
            BOOST_MULTIPLIER
        } else if correlation < CORRELATION_ATTENUATE_BELOW {
            ATTENUATE_MULTIPLIER
        } else {
            1.0
        };

        neighbour_ids.sort();
        analysis.neighbour_ids = neighbour_ids;
        analysis.spatial_correlation = correlation;
        analysis.composite_risk = (analysis.base_risk * multiplier).clamp(0.0, 1.0);
    }
}

/// Extract clusters of high-risk sensors by single-linkage within
/// `cluster_radius_m`. Emission is invariant to input ordering: candidates
/// are sorted by sensor id before the union pass, and members within a
/// cluster are ordered by descending composite risk (ties by id).
pub fn detect_clusters(analyses: &[SensorAnalysis], params: &FusionParams) -> Vec<Cluster> {
    let mut candidates: Vec<&SensorAnalysis> = analyses
        .iter()
        .filter(|a| a.composite_risk >= params.risk_threshold)
        .collect();
    candidates.sort_by(|a, b| a.sensor_id.cmp(&b.sensor_id));

    if candidates.len() < params.min_cluster_size {
        return Vec::new();
    }

    // Union-find over pairwise linkage.
    let mut parent: Vec<usize> = (0..candidates.len()).collect();
    fn find(parent: &mut Vec<usize>, i: usize) -> usize {
        if parent[i] != i {
            let up = parent[i];
            let root = find(parent, up);
            parent[i] = root;
        }
        parent[i]
    }

    for i in 0..candidates.len() {
        for j in (i + 1)..candidates.len() {
            let a = &candidates[i].reading;
            let b = &candidates[j].reading;
            if haversine_m(a.latitude, a.longitude, b.latitude, b.longitude)
                <= params.cluster_radius_m
            {
                let ra = find(&mut parent, i);
                let rb = find(&mut parent, j);
                if ra != rb {
                    parent[ra] = rb;
                }
            }
        }
    }

    let mut components: std::collections::BTreeMap<usize, Vec<usize>> =
        std::collections::BTreeMap::new();
    for i in 0..candidates.len() {
        let root = find(&mut parent, i);
        components.entry(root).or_default().push(i);
    }

    let mut clusters = Vec::new();
    for (_, member_idx) in components {
        if member_idx.len() < params.min_cluster_size {
            continue;
        }

        let mut members: Vec<&SensorAnalysis> =
            member_idx.iter().map(|&i| candidates[i]).collect();
        members.sort_by(|a, b| {
            b.composite_risk
                .partial_cmp(&a.composite_risk)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.sensor_id.cmp(&b.sensor_id))
        });

        let n = members.len() as f64;
        let centroid_lat = members.iter().map(|m| m.reading.latitude).sum::<f64>() / n;
        let centroid_lon = members.iter().map(|m| m.reading.longitude).sum::<f64>() / n;
        let avg = members.iter().map(|m| m.composite_risk).sum::<f64>() / n;
        let max = members
            .iter()
            .map(|m| m.composite_risk)
            .fold(f64::NEG_INFINITY, f64::max);

        clusters.push(Cluster {
            member_ids: members.iter().map(|m| m.sensor_id.clone()).collect(),
            centroid_lat,
            centroid_lon,
            avg_composite_risk: avg,
            max_composite_risk: max,
        });
    }

    // Highest-risk clusters first.
    clusters.sort_by(|a, b| {
        b.avg_composite_risk
            .partial_cmp(&a.avg_composite_risk)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.member_ids.cmp(&b.member_ids))
    });
    clusters
}
