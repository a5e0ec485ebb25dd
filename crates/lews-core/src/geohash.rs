//! Geohash encoding and neighbour expansion.
//!
//! Hazard zones are bucketed by 4-character cells (~39 x 19 km); fine
//! enrichment uses 6 characters (~1.2 x 0.6 km). Neighbour expansion uses
//! the even/odd row maps so cells at base-32 grid edges resolve through the
//! parent cell rather than needing pole/meridian special cases.

/// Base-32 alphabet used by the geohash encoding (no a, i, l, o).
pub const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Cardinal direction for [`adjacent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Top,
    Bottom,
    Left,
    Right,
}

fn neighbour_map(direction: Direction, even: bool) -> &'static str {
    match (direction, even) {
        (Direction::Right, true) => "bc01fg45238967deuvhjyznpkmstqrwx",
        (Direction::Right, false) => "p0r21436x8zb9dcf5h7kjnmqesgutwvy",
        (Direction::Left, true) => "238967debc01fg45kmstqrwxuvhjyznp",
        (Direction::Left, false) => "14365h7k9dcfesgujnmqp0r2twvyx8zb",
        (Direction::Top, true) => "p0r21436x8zb9dcf5h7kjnmqesgutwvy",
        (Direction::Top, false) => "bc01fg45238967deuvhjyznpkmstqrwx",
        (Direction::Bottom, true) => "14365h7k9dcfesgujnmqp0r2twvyx8zb",
        (Direction::Bottom, false) => "238967debc01fg45kmstqrwxuvhjyznp",
    }
}

fn border_set(direction: Direction, even: bool) -> &'static str {
    match (direction, even) {
        (Direction::Right, true) => "bcfguvyz",
        (Direction::Right, false) => "prxz",
        (Direction::Left, true) => "0145hjnp",
        (Direction::Left, false) => "028b",
        (Direction::Top, true) => "prxz",
        (Direction::Top, false) => "bcfguvyz",
        (Direction::Bottom, true) => "028b",
        (Direction::Bottom, false) => "0145hjnp",
    }
}

/// Encode a latitude/longitude to a geohash of the given precision.
pub fn encode(lat: f64, lon: f64, precision: usize) -> String {
    let mut lat_lo = -90.0_f64;
    let mut lat_hi = 90.0_f64;
    let mut lon_lo = -180.0_f64;
    let mut lon_hi = 180.0_f64;

    let mut hash = String::with_capacity(precision);
    let mut bits = 0u8;
    let mut ch = 0usize;
    let mut even = true;

    while hash.len() < precision {
        if even {
            let mid = (lon_lo + lon_hi) / 2.0;
            if lon >= mid {
                ch = (ch << 1) | 1;
                lon_lo = mid;
            } else {
                ch <<= 1;
                lon_hi = mid;
            }
        } else {
            let mid = (lat_lo + lat_hi) / 2.0;
            if lat >= mid {
                ch = (ch << 1) | 1;
                lat_lo = mid;
            } else {
                ch <<= 1;
                lat_hi = mid;
            }
        }
        even = !even;
        bits += 1;
        if bits == 5 {
            hash.push(BASE32[ch] as char);
            bits = 0;
            ch = 0;
        }
    }

    hash
}

/// Return the adjacent cell in the given direction.
///
/// When the last character sits on the row/column border, the parent cell is
/// shifted first, so adjacency is correct across parent-cell boundaries.
pub fn adjacent(cell: &str, direction: Direction) -> String {
    if cell.is_empty() {
        return String::new();
    }

    let cell = cell.to_ascii_lowercase();
    let last = cell.as_bytes()[cell.len() - 1] as char;
    let mut parent = cell[..cell.len() - 1].to_string();
    let even = cell.len() % 2 == 0;

    if border_set(direction, even).contains(last) && !parent.is_empty() {
        parent = adjacent(&parent, direction);
        if parent.is_empty() {
            return String::new();
        }
    }

    match neighbour_map(direction, even).find(last) {
        Some(idx) => {
            parent.push(BASE32[idx] as char);
            parent
        }
        None => String::new(),
    }
}

/// Return the cell itself plus its 8 surrounding cells.
///
/// Diagonals are composed from the cardinal shifts. Cells that fall off the
/// grid entirely (degenerate inputs) are dropped, so callers always get
/// distinct same-length cells.
pub fn neighbours8(cell: &str) -> Vec<String> {
    let cell = cell.to_ascii_lowercase();
    if cell.is_empty() {
        return Vec::new();
    }

    let top = adjacent(&cell, Direction::Top);
    let bottom = adjacent(&cell, Direction::Bottom);

    let mut candidates = vec![
        cell.clone(),
        top.clone(),
        bottom.clone(),
        adjacent(&cell, Direction::Right),
        adjacent(&cell, Direction::Left),
    ];
    if !top.is_empty() {
        candidates.push(adjacent(&top, Direction::Right));
        candidates.push(adjacent(&top, Direction::Left));
    }
    if !bottom.is_empty() {
        candidates.push(adjacent(&bottom, Direction::Right));
        candidates.push(adjacent(&bottom, Direction::Left));
    }

    let mut out = Vec::with_capacity(9);
    for c in candidates {
        if !c.is_empty() && c.len() == cell.len() && !out.contains(&c) {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIRECTIONS: [Direction; 4] = [
        Direction::Top,
        Direction::Bottom,
        Direction::Left,
        Direction::Right,
    ];

    #[test]
    fn encode_known_cells() {
        // Ella, Sri Lanka
        assert_eq!(encode(6.8667, 81.0462, 6), "tc1xh6");
        // Greenwich area
        assert_eq!(encode(51.5074, -0.1278, 5), "gcpvj");
    }

    #[test]
    fn encode_precision_is_prefix_stable() {
        let full = encode(6.85, 80.93, 8);
        for p in 1..8 {
            assert_eq!(encode(6.85, 80.93, p), full[..p]);
        }
    }

    #[test]
    fn neighbours8_has_nine_distinct_cells() {
        for cell in ["tc1x", "9q8y", "u000", "gcpv", "zzzz", "tc3p5m"] {
            let ring = neighbours8(cell);
            assert_eq!(ring.len(), 9, "cell {cell} ring: {ring:?}");
            for c in &ring {
                assert_eq!(c.len(), cell.len());
            }
        }
    }

    #[test]
    fn each_ring_cell_is_reachable_in_one_step() {
        let cell = "tc1x";
        let ring = neighbours8(cell);

        let top = adjacent(cell, Direction::Top);
        let bottom = adjacent(cell, Direction::Bottom);
        let mut reachable = vec![
            cell.to_string(),
            top.clone(),
            bottom.clone(),
            adjacent(cell, Direction::Left),
            adjacent(cell, Direction::Right),
            adjacent(&top, Direction::Left),
            adjacent(&top, Direction::Right),
            adjacent(&bottom, Direction::Left),
            adjacent(&bottom, Direction::Right),
        ];
        reachable.sort();

        let mut sorted_ring = ring.clone();
        sorted_ring.sort();
        assert_eq!(sorted_ring, reachable);
    }

    #[test]
    fn adjacency_is_symmetric_across_cell_borders() {
        // "u000" has its last char on left/bottom borders, forcing parent recursion.
        let cell = "u000";
        let right = adjacent(cell, Direction::Right);
        assert_eq!(adjacent(&right, Direction::Left), cell);
        let top = adjacent(cell, Direction::Top);
        assert_eq!(adjacent(&top, Direction::Bottom), cell);
    }

    #[test]
    fn adjacency_round_trips_in_all_directions() {
        for cell in ["tc1x", "9q8y", "gcpvj0"] {
            for dir in DIRECTIONS {
                let back = match dir {
                    Direction::Top => Direction::Bottom,
                    Direction::Bottom => Direction::Top,
                    Direction::Left => Direction::Right,
                    Direction::Right => Direction::Left,
                };
                assert_eq!(adjacent(&adjacent(cell, dir), back), cell);
            }
        }
    }
}
