//! Spatial math for correlation, clustering, and zone ranking.

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Metres per degree of latitude (and of longitude at the equator).
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Calculate distance between two points in metres using the Haversine formula.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Offset a position by metres in the north and east directions.
///
/// Uses the flat-earth approximation (1 degree latitude ~ 111 320 m), which
/// is accurate well beyond the 50 m neighbourhoods this system works with.
pub fn offset_m(lat: f64, lon: f64, north_m: f64, east_m: f64) -> (f64, f64) {
    let dlat = north_m / METERS_PER_DEGREE;
    let lon_scale = (METERS_PER_DEGREE * lat.to_radians().cos()).max(1e-9);
    let dlon = east_m / lon_scale;
    (lat + dlat, lon + dlon)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_known_distance() {
        // One degree of longitude on the equator is ~111.195 km.
        let dist = haversine_m(0.0, 0.0, 0.0, 1.0);
        assert!((dist - 111_195.0).abs() < 50.0, "got {dist}");
    }

    #[test]
    fn haversine_identity_and_symmetry() {
        assert!(haversine_m(6.85, 80.93, 6.85, 80.93) < 1e-6);
        let d1 = haversine_m(6.85, 80.93, 6.86, 80.94);
        let d2 = haversine_m(6.86, 80.94, 6.85, 80.93);
        assert!((d1 - d2).abs() < 1e-9);
    }

    #[test]
    fn haversine_triangle_inequality() {
        let a = (6.85, 80.93);
        let b = (6.87, 80.95);
        let c = (6.84, 80.97);
        let ab = haversine_m(a.0, a.1, b.0, b.1);
        let bc = haversine_m(b.0, b.1, c.0, c.1);
        let ac = haversine_m(a.0, a.1, c.0, c.1);
        assert!(ac <= ab + bc + 1e-9);
    }

    #[test]
    fn offset_round_trips_through_haversine() {
        let (lat, lon) = offset_m(6.85, 80.93, 30.0, 40.0);
        let dist = haversine_m(6.85, 80.93, lat, lon);
        // 3-4-5 triangle: 50 m offset
        assert!((dist - 50.0).abs() < 0.5, "got {dist}");
    }
}
