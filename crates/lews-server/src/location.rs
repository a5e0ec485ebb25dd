//! Reverse geocoding with a deterministic coordinate fallback.
//!
//! The geocoder is optional: with no endpoint configured (or any lookup
//! failure) alerts still carry a usable "lat, lon" label and map URL.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;

use lews_core::models::ResolvedLocation;

const GEOCODE_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    label: String,
    #[serde(default)]
    address: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone)]
pub struct LocationResolver {
    client: Client,
    endpoint: Option<String>,
}

fn maps_search_url(lat: f64, lon: f64) -> String {
    format!("https://www.google.com/maps/search/?api=1&query={lat:.6},{lon:.6}")
}

fn maps_directions_url(lat: f64, lon: f64) -> String {
    format!("https://www.google.com/maps/dir/?api=1&destination={lat:.6},{lon:.6}")
}

/// Coordinates-only location payload.
fn fallback(lat: f64, lon: f64) -> ResolvedLocation {
    ResolvedLocation {
        latitude: lat,
        longitude: lon,
        label: format!("{lat:.5}, {lon:.5}"),
        maps_url: maps_search_url(lat, lon),
        directions_url: Some(maps_directions_url(lat, lon)),
        resolved_by: "coordinates_only".into(),
        address: serde_json::Map::new(),
    }
}

impl LocationResolver {
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(GEOCODE_TIMEOUT_SECS))
                .build()
                .expect("Failed to create HTTP client"),
            endpoint,
        }
    }

    /// Resolve a human-readable location. Never fails: any error degrades
    /// to the coordinate fallback.
    pub async fn resolve(&self, lat: f64, lon: f64) -> ResolvedLocation {
        let Some(endpoint) = self.endpoint.as_deref() else {
            return fallback(lat, lon);
        };

        let result = self
            .client
            .get(endpoint)
            .query(&[("lat", lat), ("lon", lon)])
            .send()
            .await;

        let response = match result {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                tracing::warn!(status = %r.status(), "geocoder rejected lookup");
                return fallback(lat, lon);
            }
            Err(err) => {
                tracing::warn!(%err, "geocoder unreachable");
                return fallback(lat, lon);
            }
        };

        match response.json::<GeocodeResponse>().await {
            Ok(geo) if !geo.label.trim().is_empty() => ResolvedLocation {
                latitude: lat,
                longitude: lon,
                label: geo.label,
                maps_url: maps_search_url(lat, lon),
                directions_url: Some(maps_directions_url(lat, lon)),
                resolved_by: "geocoder".into(),
                address: geo.address,
            },
            Ok(_) => fallback(lat, lon),
            Err(err) => {
                tracing::warn!(%err, "geocoder returned unparseable body");
                fallback(lat, lon)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_endpoint_yields_coordinate_fallback() {
        let resolver = LocationResolver::new(None);
        let loc = resolver.resolve(6.85, 80.93).await;
        assert_eq!(loc.label, "6.85000, 80.93000");
        assert_eq!(loc.resolved_by, "coordinates_only");
        assert!(loc.maps_url.contains("query=6.850000,80.930000"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_degrades_to_fallback() {
        // Nothing listens on this port; resolve must still return a label.
        let resolver = LocationResolver::new(Some("http://127.0.0.1:9/geocode".into()));
        let loc = resolver.resolve(-6.85, 80.93).await;
        assert_eq!(loc.resolved_by, "coordinates_only");
        assert_eq!(loc.label, "-6.85000, 80.93000");
    }
}
