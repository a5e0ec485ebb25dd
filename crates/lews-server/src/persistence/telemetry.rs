//! Telemetry persistence operations.

use sqlx::SqlitePool;

use lews_core::models::Reading;

use crate::error::{classify_sqlx, LewsError};

/// Write a single reading. `INSERT OR REPLACE` on the (sensor_id, timestamp)
/// key makes batch replays idempotent.
pub async fn put_reading(pool: &SqlitePool, reading: &Reading) -> Result<(), LewsError> {
    let payload = serde_json::to_string(reading)
        .map_err(|e| LewsError::StorageFatal(format!("reading serialisation: {e}")))?;

    sqlx::query(
        r#"
        INSERT OR REPLACE INTO telemetry
            (sensor_id, timestamp, latitude, longitude, geohash, payload, ingested_at, expires_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(&reading.sensor_id)
    .bind(reading.timestamp)
    .bind(reading.latitude)
    .bind(reading.longitude)
    .bind(&reading.geohash)
    .bind(&payload)
    .bind(reading.ingested_at.unwrap_or(0))
    .bind(reading.expires_at.unwrap_or(0))
    .execute(pool)
    .await
    .map_err(classify_sqlx)?;

    Ok(())
}

/// Write a batch with per-item outcomes: one bad item must not stop its
/// siblings.
pub async fn put_batch(
    pool: &SqlitePool,
    readings: &[Reading],
) -> Vec<Result<(), LewsError>> {
    let mut results = Vec::with_capacity(readings.len());
    for reading in readings {
        results.push(put_reading(pool, reading).await);
    }
    results
}

fn parse_payload(payload: &str) -> Result<Reading, LewsError> {
    serde_json::from_str(payload)
        .map_err(|e| LewsError::StorageFatal(format!("stored reading corrupt: {e}")))
}

/// All readings in the inclusive time range, oldest first.
pub async fn query_by_time(
    pool: &SqlitePool,
    range_start: i64,
    range_end: i64,
    limit: Option<i64>,
) -> Result<Vec<Reading>, LewsError> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT payload FROM telemetry
        WHERE timestamp BETWEEN ?1 AND ?2
        ORDER BY timestamp ASC
        LIMIT ?3
        "#,
    )
    .bind(range_start)
    .bind(range_end)
    .bind(limit.unwrap_or(i64::MAX))
    .fetch_all(pool)
    .await
    .map_err(classify_sqlx)?;

    rows.iter().map(|(p,)| parse_payload(p)).collect()
}

/// The most recent reading per sensor within the time range.
pub async fn latest_per_sensor(
    pool: &SqlitePool,
    range_start: i64,
    range_end: i64,
) -> Result<Vec<Reading>, LewsError> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT payload FROM telemetry AS t
        WHERE timestamp BETWEEN ?1 AND ?2
          AND timestamp = (
            SELECT MAX(timestamp) FROM telemetry
            WHERE sensor_id = t.sensor_id AND timestamp BETWEEN ?1 AND ?2
          )
        ORDER BY sensor_id ASC
        "#,
    )
    .bind(range_start)
    .bind(range_end)
    .fetch_all(pool)
    .await
    .map_err(classify_sqlx)?;

    rows.iter().map(|(p,)| parse_payload(p)).collect()
}
