//! Alert lifecycle: create, deduplicate, escalate, expire.

use chrono::{TimeZone, Utc};

use lews_core::models::{
    now_epoch, Alert, AlertStatus, Assessment, DetectionType, EscalationEntry, HazardZone,
    ResolvedLocation,
};

use crate::config::Config;
use crate::error::LewsError;
use crate::events::Notifier;
use crate::persistence::{self, Database};

/// What `ensure_alert` did for a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertAction {
    Created,
    Escalated,
    Unchanged,
}

/// One detection ready for alerting, assembled by the detector.
#[derive(Debug, Clone)]
pub struct Detection {
    pub detection_type: DetectionType,
    /// Highest-risk member for clusters, the sensor itself for individuals.
    pub representative_sensor: String,
    pub sensors_affected: Vec<String>,
    pub center_lat: f64,
    pub center_lon: f64,
}

impl Detection {
    /// `CLUSTER:<sensor>` / `SENSOR:<sensor>` - the escalation lookup key.
    pub fn dedup_key(&self) -> String {
        match self.detection_type {
            DetectionType::Cluster => format!("CLUSTER:{}", self.representative_sensor),
            DetectionType::Individual => format!("SENSOR:{}", self.representative_sensor),
        }
    }
}

#[derive(Clone)]
pub struct AlertManager {
    db: Database,
    notifier: Notifier,
    dedup_window_s: i64,
    ttl_seconds: i64,
    expiry_grace_s: i64,
}

impl AlertManager {
    pub fn new(db: Database, config: &Config, notifier: Notifier) -> Self {
        Self {
            db,
            notifier,
            dedup_window_s: config.alert_dedup_window_s,
            ttl_seconds: config.alert_ttl_seconds,
            expiry_grace_s: config.alert_expiry_grace_s,
        }
    }

    /// Create a new alert or escalate the active one for the same dedup key.
    ///
    /// Alert writes are single conditional statements; notification publish
    /// is best-effort and never rolls back the write.
    pub async fn ensure_alert(
        &self,
        detection: &Detection,
        assessment: &Assessment,
        narrative: Option<String>,
        location: ResolvedLocation,
        zone_snapshot: Option<HazardZone>,
    ) -> Result<AlertAction, LewsError> {
        let now = now_epoch();
        let dedup_key = detection.dedup_key();
        let window_start = now - self.dedup_window_s;

        let existing =
            persistence::alerts::get_active_by_dedup(self.db.pool(), &dedup_key, window_start)
                .await?;

        let Some(existing) = existing else {
            let alert = self.build_alert(
                detection,
                assessment,
                narrative,
                location,
                zone_snapshot,
                &dedup_key,
                now,
            );
            persistence::alerts::insert_alert(self.db.pool(), &alert).await?;
            tracing::info!(alert_id = %alert.alert_id, risk_level = alert.risk_level.as_str(), "alert created");
            self.notifier.publish_alert(&alert).await;
            return Ok(AlertAction::Created);
        };

        if !should_escalate(&existing, assessment) {
            persistence::alerts::touch_alert(self.db.pool(), &existing.alert_id, now).await?;
            tracing::info!(alert_id = %existing.alert_id, "alert already active, no escalation");
            return Ok(AlertAction::Unchanged);
        }

        let mut history = existing.escalation_history.clone();
        history.push(EscalationEntry {
            timestamp: now,
            from_level: Some(existing.risk_level),
            to_level: assessment.risk_level,
            reason: format!(
                "Risk level increased. New confidence: {:.2}",
                assessment.confidence
            ),
        });

        let applied = persistence::alerts::escalate_alert(
            self.db.pool(),
            &existing.alert_id,
            assessment.risk_level,
            assessment.confidence,
            &assessment.reasoning,
            &assessment.recommended_action,
            narrative.as_deref(),
            &history,
            now,
        )
        .await?;

        if !applied {
            // A concurrent run already holds a higher level; leave it be.
            tracing::warn!(alert_id = %existing.alert_id, "escalation lost monotonicity race");
            return Ok(AlertAction::Unchanged);
        }

        tracing::info!(
            alert_id = %existing.alert_id,
            from = existing.risk_level.as_str(),
            to = assessment.risk_level.as_str(),
            "alert escalated"
        );

        if let Some(updated) =
            persistence::alerts::get_alert(self.db.pool(), &existing.alert_id).await?
        {
            self.notifier.publish_alert(&updated).await;
        }

        Ok(AlertAction::Escalated)
    }

    /// Mark active alerts with no update inside the grace period as expired.
    pub async fn expire(&self, now: i64) -> Result<u64, LewsError> {
        let expired =
            persistence::alerts::expire_stale(self.db.pool(), now - self.expiry_grace_s).await?;
        if expired > 0 {
            tracing::info!(expired, "expired stale alerts");
        }
        Ok(expired)
    }

    /// External state transition: acknowledge or resolve.
    pub async fn transition(
        &self,
        alert_id: &str,
        to: AlertStatus,
    ) -> Result<bool, LewsError> {
        let from = match to {
            AlertStatus::Acknowledged => AlertStatus::Active,
            AlertStatus::Resolved => AlertStatus::Acknowledged,
            _ => return Ok(false),
        };
        persistence::alerts::set_status(self.db.pool(), alert_id, from, to, now_epoch()).await
    }

    #[allow(clippy::too_many_arguments)]
    fn build_alert(
        &self,
        detection: &Detection,
        assessment: &Assessment,
        narrative: Option<String>,
        location: ResolvedLocation,
        zone_snapshot: Option<HazardZone>,
        dedup_key: &str,
        now: i64,
    ) -> Alert {
        let stamp = Utc
            .timestamp_opt(now, 0)
            .single()
            .unwrap_or_else(Utc::now)
            .format("%Y%m%d_%H%M%S");

        Alert {
            alert_id: format!("{dedup_key}_{stamp}"),
            dedup_key: dedup_key.to_string(),
            created_at: now,
            updated_at: now,
            status: AlertStatus::Active,
            risk_level: assessment.risk_level,
            confidence: assessment.confidence,
            llm_reasoning: assessment.reasoning.clone(),
            trigger_factors: assessment.trigger_factors.clone(),
            recommended_action: assessment.recommended_action,
            time_to_failure: assessment.time_to_failure_estimate,
            narrative,
            detection_type: detection.detection_type,
            sensors_affected: detection.sensors_affected.clone(),
            center_lat: detection.center_lat,
            center_lon: detection.center_lon,
            location: Some(location),
            zone_snapshot,
            escalation_history: vec![EscalationEntry {
                timestamp: now,
                from_level: None,
                to_level: assessment.risk_level,
                reason: "Initial alert".into(),
            }],
            expires_at: now + self.ttl_seconds,
        }
    }
}

/// Escalate when severity rises, or confidence jumps >= 0.15 at the same
/// severity.
fn should_escalate(existing: &Alert, new: &Assessment) -> bool {
    if new.risk_level.ordinal() > existing.risk_level.ordinal() {
        return true;
    }
    new.risk_level == existing.risk_level && new.confidence >= existing.confidence + 0.15
}

#[cfg(test)]
pub(crate) mod tests_support {
    use lews_core::models::{
        Alert, AlertStatus, DetectionType, EscalationEntry, RecommendedAction, RiskLevel,
        TimeToFailure,
    };

    pub(crate) fn sample_alert() -> Alert {
        let created_at = 1_735_430_400;
        Alert {
            alert_id: "SENSOR:SENSOR_001_20241229_000000".into(),
            dedup_key: "SENSOR:SENSOR_001".into(),
            created_at,
            updated_at: created_at,
            status: AlertStatus::Active,
            risk_level: RiskLevel::Yellow,
            confidence: 0.6,
            llm_reasoning: "Moisture above threshold.".into(),
            trigger_factors: vec!["moisture".into()],
            recommended_action: RecommendedAction::MonitorClosely,
            time_to_failure: TimeToFailure::Days,
            narrative: None,
            detection_type: DetectionType::Individual,
            sensors_affected: vec!["SENSOR_001".into()],
            center_lat: 6.85,
            center_lon: 80.93,
            location: None,
            zone_snapshot: None,
            escalation_history: vec![EscalationEntry {
                timestamp: created_at,
                from_level: None,
                to_level: RiskLevel::Yellow,
                reason: "Initial alert".into(),
            }],
            expires_at: created_at + 30 * 86400,
        }
    }
}
