//! Shape, range, and timestamp checks on inbound readings.

use chrono::{DateTime, NaiveDateTime};
use thiserror::Error;

use crate::models::{RawReading, Reading, TimestampValue};

/// Epoch-second window accepted for reading timestamps
/// (2020-01-01 through 2038-01-19).
const TIMESTAMP_MIN: i64 = 1_577_836_800;
const TIMESTAMP_MAX: i64 = 2_147_483_647;

const MIN_SENSOR_ID_LEN: usize = 3;
const MIN_GEOHASH_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("{field}={value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("identifier too short: {field}={value:?}")]
    ShortIdentifier { field: &'static str, value: String },
}

/// Range rules for measurement fields. A missing optional field passes;
/// a present field outside its domain is rejected.
const RANGE_RULES: &[(&str, f64, f64)] = &[
    ("latitude", -90.0, 90.0),
    ("longitude", -180.0, 180.0),
    ("moisture_percent", 0.0, 100.0),
    ("tilt_x_degrees", -30.0, 30.0),
    ("tilt_y_degrees", -30.0, 30.0),
    ("tilt_rate_mm_hr", 0.0, 50.0),
    ("pore_pressure_kpa", -100.0, 50.0),
    ("vibration_count", 0.0, 1000.0),
    ("vibration_baseline", 0.0, f64::INFINITY),
    ("safety_factor", 0.0, 10.0),
    ("rainfall_24h_mm", 0.0, f64::INFINITY),
    ("battery_percent", 0.0, 100.0),
    ("temperature_c", -10.0, 50.0),
];

fn field_value(raw: &RawReading, field: &str) -> Option<f64> {
    match field {
        "latitude" => raw.latitude,
        "longitude" => raw.longitude,
        "moisture_percent" => raw.moisture_percent,
        "tilt_x_degrees" => raw.tilt_x_degrees,
        "tilt_y_degrees" => raw.tilt_y_degrees,
        "tilt_rate_mm_hr" => raw.tilt_rate_mm_hr,
        "pore_pressure_kpa" => raw.pore_pressure_kpa,
        "vibration_count" => raw.vibration_count,
        "vibration_baseline" => raw.vibration_baseline,
        "safety_factor" => raw.safety_factor,
        "rainfall_24h_mm" => raw.rainfall_24h_mm,
        "battery_percent" => raw.battery_percent,
        "temperature_c" => raw.temperature_c,
        _ => None,
    }
}

/// Normalise a timestamp to epoch seconds. Accepts epoch numbers and
/// ISO-8601 strings with or without a timezone designator.
fn normalise_timestamp(value: &TimestampValue) -> Result<i64, ValidationError> {
    let epoch = match value {
        TimestampValue::Epoch(secs) => {
            if !secs.is_finite() {
                return Err(ValidationError::InvalidTimestamp(secs.to_string()));
            }
            *secs as i64
        }
        TimestampValue::Iso(text) => {
            let text = text.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
                dt.timestamp()
            } else if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
                naive.and_utc().timestamp()
            } else {
                return Err(ValidationError::InvalidTimestamp(text.to_string()));
            }
        }
    };

    if !(TIMESTAMP_MIN..=TIMESTAMP_MAX).contains(&epoch) {
        return Err(ValidationError::OutOfRange {
            field: "timestamp",
            value: epoch as f64,
            min: TIMESTAMP_MIN as f64,
            max: TIMESTAMP_MAX as f64,
        });
    }
    Ok(epoch)
}

/// Validate a raw reading and produce the canonical [`Reading`].
pub fn validate(raw: &RawReading) -> Result<Reading, ValidationError> {
    let sensor_id = raw
        .sensor_id
        .as_deref()
        .ok_or(ValidationError::MissingField("sensor_id"))?;
    if sensor_id.len() < MIN_SENSOR_ID_LEN {
        return Err(ValidationError::ShortIdentifier {
            field: "sensor_id",
            value: sensor_id.to_string(),
        });
    }

    let timestamp = raw
        .timestamp
        .as_ref()
        .ok_or(ValidationError::MissingField("timestamp"))?;
    let timestamp = normalise_timestamp(timestamp)?;

    let latitude = raw
        .latitude
        .ok_or(ValidationError::MissingField("latitude"))?;
    let longitude = raw
        .longitude
        .ok_or(ValidationError::MissingField("longitude"))?;
    let moisture = raw
        .moisture_percent
        .ok_or(ValidationError::MissingField("moisture_percent"))?;

    let geohash = raw
        .geohash
        .as_deref()
        .ok_or(ValidationError::MissingField("geohash"))?;
    if geohash.len() < MIN_GEOHASH_LEN {
        return Err(ValidationError::ShortIdentifier {
            field: "geohash",
            value: geohash.to_string(),
        });
    }

    for (field, min, max) in RANGE_RULES {
        if let Some(value) = field_value(raw, field) {
            if !value.is_finite() || value < *min || value > *max {
                return Err(ValidationError::OutOfRange {
                    field,
                    value,
                    min: *min,
                    max: *max,
                });
            }
        }
    }

    Ok(Reading {
        sensor_id: sensor_id.to_string(),
        timestamp,
        latitude,
        longitude,
        geohash: geohash.to_ascii_lowercase(),
        moisture_percent: moisture,
        tilt_x_degrees: raw.tilt_x_degrees,
        tilt_y_degrees: raw.tilt_y_degrees,
        tilt_rate_mm_hr: raw.tilt_rate_mm_hr,
        pore_pressure_kpa: raw.pore_pressure_kpa,
        vibration_count: raw.vibration_count,
        vibration_baseline: raw.vibration_baseline,
        safety_factor: raw.safety_factor,
        rainfall_24h_mm: raw.rainfall_24h_mm,
        battery_percent: raw.battery_percent,
        temperature_c: raw.temperature_c,
        zone_ref: None,
        enriched: false,
        ingested_at: None,
        expires_at: None,
    })
}
