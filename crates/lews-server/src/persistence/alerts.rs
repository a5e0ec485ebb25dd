//! Alert persistence operations.
//!
//! Escalation is a single conditional UPDATE guarded on the stored risk
//! ordinal, so overlapping detection runs can never regress severity and
//! cancellation can never leave a half-written alert.

use sqlx::SqlitePool;

use lews_core::models::{
    Alert, AlertStatus, DetectionType, EscalationEntry, HazardZone, RecommendedAction,
    ResolvedLocation, RiskLevel, TimeToFailure,
};

use crate::error::{classify_sqlx, LewsError};

pub async fn insert_alert(pool: &SqlitePool, alert: &Alert) -> Result<(), LewsError> {
    sqlx::query(
        r#"
        INSERT INTO alerts
            (alert_id, dedup_key, created_at, updated_at, status,
             risk_level, risk_ordinal, confidence, llm_reasoning, trigger_factors,
             recommended_action, time_to_failure, narrative, detection_type,
             sensors_affected, center_lat, center_lon, location, zone_snapshot,
             escalation_history, expires_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                ?18, ?19, ?20, ?21)
        "#,
    )
    .bind(&alert.alert_id)
    .bind(&alert.dedup_key)
    .bind(alert.created_at)
    .bind(alert.updated_at)
    .bind(alert.status.as_str())
    .bind(alert.risk_level.as_str())
    .bind(alert.risk_level.ordinal())
    .bind(alert.confidence)
    .bind(&alert.llm_reasoning)
    .bind(to_json(&alert.trigger_factors)?)
    .bind(to_json(&alert.recommended_action)?)
    .bind(to_json(&alert.time_to_failure)?)
    .bind(&alert.narrative)
    .bind(alert.detection_type.as_str())
    .bind(to_json(&alert.sensors_affected)?)
    .bind(alert.center_lat)
    .bind(alert.center_lon)
    .bind(opt_json(&alert.location)?)
    .bind(opt_json(&alert.zone_snapshot)?)
    .bind(to_json(&alert.escalation_history)?)
    .bind(alert.expires_at)
    .execute(pool)
    .await
    .map_err(classify_sqlx)?;

    Ok(())
}

/// The most recent active alert for a dedup key, updated within the window.
pub async fn get_active_by_dedup(
    pool: &SqlitePool,
    dedup_key: &str,
    updated_since: i64,
) -> Result<Option<Alert>, LewsError> {
    let row = sqlx::query_as::<_, AlertRow>(
        r#"
        SELECT * FROM alerts
        WHERE dedup_key = ?1 AND status = 'active' AND updated_at >= ?2
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(dedup_key)
    .bind(updated_since)
    .fetch_optional(pool)
    .await
    .map_err(classify_sqlx)?;

    row.map(Alert::try_from).transpose()
}

pub async fn get_alert(pool: &SqlitePool, alert_id: &str) -> Result<Option<Alert>, LewsError> {
    let row = sqlx::query_as::<_, AlertRow>("SELECT * FROM alerts WHERE alert_id = ?1")
        .bind(alert_id)
        .fetch_optional(pool)
        .await
        .map_err(classify_sqlx)?;

    row.map(Alert::try_from).transpose()
}

pub async fn list_alerts(pool: &SqlitePool, limit: i64) -> Result<Vec<Alert>, LewsError> {
    let rows = sqlx::query_as::<_, AlertRow>(
        "SELECT * FROM alerts ORDER BY updated_at DESC LIMIT ?1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(classify_sqlx)?;

    rows.into_iter().map(Alert::try_from).collect()
}

/// Escalate an alert, conditional on the stored risk never decreasing.
/// Returns false when the condition did not hold (a concurrent run already
/// wrote a higher level) or the alert is no longer active.
#[allow(clippy::too_many_arguments)]
pub async fn escalate_alert(
    pool: &SqlitePool,
    alert_id: &str,
    new_level: RiskLevel,
    confidence: f64,
    reasoning: &str,
    recommended_action: &RecommendedAction,
    narrative: Option<&str>,
    history: &[EscalationEntry],
    updated_at: i64,
) -> Result<bool, LewsError> {
    let result = sqlx::query(
        r#"
        UPDATE alerts SET
            risk_level = ?2,
            risk_ordinal = ?3,
            confidence = ?4,
            llm_reasoning = ?5,
            recommended_action = ?6,
            narrative = COALESCE(?7, narrative),
            escalation_history = ?8,
            updated_at = ?9
        WHERE alert_id = ?1 AND status = 'active' AND risk_ordinal <= ?3
        "#,
    )
    .bind(alert_id)
    .bind(new_level.as_str())
    .bind(new_level.ordinal())
    .bind(confidence)
    .bind(reasoning)
    .bind(to_json(recommended_action)?)
    .bind(narrative)
    .bind(to_json(&history)?)
    .bind(updated_at)
    .execute(pool)
    .await
    .map_err(classify_sqlx)?;

    Ok(result.rows_affected() > 0)
}

/// Refresh `updated_at` without touching assessment fields (idempotent
/// re-detection inside the dedup window).
pub async fn touch_alert(pool: &SqlitePool, alert_id: &str, updated_at: i64) -> Result<(), LewsError> {
    sqlx::query("UPDATE alerts SET updated_at = ?2 WHERE alert_id = ?1 AND status = 'active'")
        .bind(alert_id)
        .bind(updated_at)
        .execute(pool)
        .await
        .map_err(classify_sqlx)?;
    Ok(())
}

/// Mark stale active alerts as expired. Returns how many were expired.
pub async fn expire_stale(pool: &SqlitePool, updated_before: i64) -> Result<u64, LewsError> {
    let result = sqlx::query(
        "UPDATE alerts SET status = 'expired' WHERE status = 'active' AND updated_at < ?1",
    )
    .bind(updated_before)
    .execute(pool)
    .await
    .map_err(classify_sqlx)?;
    Ok(result.rows_affected())
}

/// External state transition (acknowledge / resolve). Conditional on the
/// expected current status so the state machine cannot be skipped.
pub async fn set_status(
    pool: &SqlitePool,
    alert_id: &str,
    from: AlertStatus,
    to: AlertStatus,
    updated_at: i64,
) -> Result<bool, LewsError> {
    let result = sqlx::query(
        "UPDATE alerts SET status = ?3, updated_at = ?4 WHERE alert_id = ?1 AND status = ?2",
    )
    .bind(alert_id)
    .bind(from.as_str())
    .bind(to.as_str())
    .bind(updated_at)
    .execute(pool)
    .await
    .map_err(classify_sqlx)?;
    Ok(result.rows_affected() > 0)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, LewsError> {
    serde_json::to_string(value)
        .map_err(|e| LewsError::StorageFatal(format!("alert serialisation: {e}")))
}

fn opt_json<T: serde::Serialize>(value: &Option<T>) -> Result<Option<String>, LewsError> {
    value.as_ref().map(|v| to_json(v)).transpose()
}

fn from_json<T: serde::de::DeserializeOwned>(value: &str) -> Result<T, LewsError> {
    serde_json::from_str(value)
        .map_err(|e| LewsError::StorageFatal(format!("stored alert corrupt: {e}")))
}

#[derive(sqlx::FromRow)]
struct AlertRow {
    alert_id: String,
    dedup_key: String,
    created_at: i64,
    updated_at: i64,
    status: String,
    risk_level: String,
    #[allow(dead_code)]
    risk_ordinal: i64,
    confidence: f64,
    llm_reasoning: String,
    trigger_factors: String,
    recommended_action: String,
    time_to_failure: String,
    narrative: Option<String>,
    detection_type: String,
    sensors_affected: String,
    center_lat: f64,
    center_lon: f64,
    location: Option<String>,
    zone_snapshot: Option<String>,
    escalation_history: String,
    expires_at: i64,
}

impl TryFrom<AlertRow> for Alert {
    type Error = LewsError;

    fn try_from(row: AlertRow) -> Result<Self, Self::Error> {
        let status = AlertStatus::parse(&row.status)
            .ok_or_else(|| LewsError::StorageFatal(format!("bad alert status: {}", row.status)))?;
        let risk_level = RiskLevel::parse(&row.risk_level)
            .ok_or_else(|| LewsError::StorageFatal(format!("bad risk level: {}", row.risk_level)))?;
        let detection_type = match row.detection_type.as_str() {
            "cluster" => DetectionType::Cluster,
            _ => DetectionType::Individual,
        };

        let location: Option<ResolvedLocation> =
            row.location.as_deref().map(from_json).transpose()?;
        let zone_snapshot: Option<HazardZone> =
            row.zone_snapshot.as_deref().map(from_json).transpose()?;
        let time_to_failure: TimeToFailure = from_json(&row.time_to_failure)?;
        let recommended_action: RecommendedAction = from_json(&row.recommended_action)?;

        Ok(Alert {
            alert_id: row.alert_id,
            dedup_key: row.dedup_key,
            created_at: row.created_at,
            updated_at: row.updated_at,
            status,
            risk_level,
            confidence: row.confidence,
            llm_reasoning: row.llm_reasoning,
            trigger_factors: from_json(&row.trigger_factors)?,
            recommended_action,
            time_to_failure,
            narrative: row.narrative,
            detection_type,
            sensors_affected: from_json(&row.sensors_affected)?,
            center_lat: row.center_lat,
            center_lon: row.center_lon,
            location,
            zone_snapshot,
            escalation_history: from_json(&row.escalation_history)?,
            expires_at: row.expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::init_database;

    pub(crate) fn alert(dedup_key: &str, created_at: i64, level: RiskLevel) -> Alert {
        Alert {
            alert_id: format!("{dedup_key}_{created_at}"),
            dedup_key: dedup_key.into(),
            created_at,
            updated_at: created_at,
            status: AlertStatus::Active,
            risk_level: level,
            confidence: 0.6,
            llm_reasoning: "Moisture above threshold with neighbour agreement.".into(),
            trigger_factors: vec!["moisture".into()],
            recommended_action: RecommendedAction::MonitorClosely,
            time_to_failure: TimeToFailure::Days,
            narrative: None,
            detection_type: DetectionType::Cluster,
            sensors_affected: vec!["SENSOR_001".into(), "SENSOR_002".into(), "SENSOR_003".into()],
            center_lat: 6.85,
            center_lon: 80.93,
            location: None,
            zone_snapshot: None,
            escalation_history: vec![EscalationEntry {
                timestamp: created_at,
                from_level: None,
                to_level: level,
                reason: "Initial alert".into(),
            }],
            expires_at: created_at + 30 * 86400,
        }
    }

    #[tokio::test]
    async fn insert_and_dedup_lookup() {
        let db = init_database(":memory:", 1).await.unwrap();
        let a = alert("CLUSTER:SENSOR_001", 1_735_430_000, RiskLevel::Yellow);
        insert_alert(db.pool(), &a).await.unwrap();

        let hit = get_active_by_dedup(db.pool(), "CLUSTER:SENSOR_001", 1_735_000_000)
            .await
            .unwrap()
            .expect("alert within window");
        assert_eq!(hit.alert_id, a.alert_id);
        assert_eq!(hit.risk_level, RiskLevel::Yellow);

        // Outside the window: no hit.
        let miss = get_active_by_dedup(db.pool(), "CLUSTER:SENSOR_001", 1_735_430_001)
            .await
            .unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn escalation_is_conditional_and_monotonic() {
        let db = init_database(":memory:", 1).await.unwrap();
        let a = alert("SENSOR:SENSOR_009", 1_735_430_000, RiskLevel::Orange);
        insert_alert(db.pool(), &a).await.unwrap();

        // Regression to Yellow must be rejected by the guard.
        let regressed = escalate_alert(
            db.pool(),
            &a.alert_id,
            RiskLevel::Yellow,
            0.9,
            "lower",
            &RecommendedAction::MonitorClosely,
            None,
            &a.escalation_history,
            1_735_431_000,
        )
        .await
        .unwrap();
        assert!(!regressed);

        let escalated = escalate_alert(
            db.pool(),
            &a.alert_id,
            RiskLevel::Red,
            0.92,
            "tilt accelerating",
            &RecommendedAction::EvacuateImmediately,
            Some("URGENT LANDSLIDE WARNING"),
            &a.escalation_history,
            1_735_431_000,
        )
        .await
        .unwrap();
        assert!(escalated);

        let stored = get_alert(db.pool(), &a.alert_id).await.unwrap().unwrap();
        assert_eq!(stored.risk_level, RiskLevel::Red);
        assert_eq!(stored.narrative.as_deref(), Some("URGENT LANDSLIDE WARNING"));
        assert_eq!(stored.updated_at, 1_735_431_000);
    }

    #[tokio::test]
    async fn expiry_only_touches_stale_active_alerts() {
        let db = init_database(":memory:", 1).await.unwrap();
        let stale = alert("SENSOR:SENSOR_001", 1_735_000_000, RiskLevel::Yellow);
        let fresh = alert("SENSOR:SENSOR_002", 1_735_430_000, RiskLevel::Yellow);
        insert_alert(db.pool(), &stale).await.unwrap();
        insert_alert(db.pool(), &fresh).await.unwrap();

        let expired = expire_stale(db.pool(), 1_735_100_000).await.unwrap();
        assert_eq!(expired, 1);

        let stale_now = get_alert(db.pool(), &stale.alert_id).await.unwrap().unwrap();
        assert_eq!(stale_now.status, AlertStatus::Expired);
        let fresh_now = get_alert(db.pool(), &fresh.alert_id).await.unwrap().unwrap();
        assert_eq!(fresh_now.status, AlertStatus::Active);
    }

    #[tokio::test]
    async fn status_transitions_follow_the_state_machine() {
        let db = init_database(":memory:", 1).await.unwrap();
        let a = alert("SENSOR:SENSOR_003", 1_735_430_000, RiskLevel::Yellow);
        insert_alert(db.pool(), &a).await.unwrap();

        // resolve straight from active is not a legal edge
        let skipped = set_status(
            db.pool(),
            &a.alert_id,
            AlertStatus::Acknowledged,
            AlertStatus::Resolved,
            1_735_431_000,
        )
        .await
        .unwrap();
        assert!(!skipped);

        assert!(set_status(
            db.pool(),
            &a.alert_id,
            AlertStatus::Active,
            AlertStatus::Acknowledged,
            1_735_431_000,
        )
        .await
        .unwrap());
        assert!(set_status(
            db.pool(),
            &a.alert_id,
            AlertStatus::Acknowledged,
            AlertStatus::Resolved,
            1_735_432_000,
        )
        .await
        .unwrap());
    }
}
