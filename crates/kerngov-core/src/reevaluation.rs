//! # Reevaluation
//!
//! Records of "look at this Kernel again" triggers, deduplicated within a
//! time window measured against the injected clock.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReevaluationStatus {
    Pending,
    Completed,
}

/// A triggered reevaluation.
///
/// Stored in the governance store with a binary codec, so every field is
/// always serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReevaluationRecord {
    pub reevaluation_id: String,
    pub kernel_id: String,
    pub trigger_type: String,
    pub entity_id: Option<String>,
    pub dedupe_key: String,
    pub status: ReevaluationStatus,
    pub triggered_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub outcome: Option<String>,
}

impl ReevaluationRecord {
    #[must_use]
    pub fn new(
        reevaluation_id: String,
        kernel_id: &str,
        trigger_type: &str,
        entity_id: Option<&str>,
        triggered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            reevaluation_id,
            kernel_id: kernel_id.to_string(),
            trigger_type: trigger_type.to_string(),
            entity_id: entity_id.map(str::to_string),
            dedupe_key: dedupe_key(kernel_id, trigger_type, entity_id),
            status: ReevaluationStatus::Pending,
            triggered_at,
            completed_at: None,
            outcome: None,
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == ReevaluationStatus::Pending
    }

    pub fn complete(&mut self, outcome: &str, at: DateTime<Utc>) {
        self.status = ReevaluationStatus::Completed;
        self.completed_at = Some(at);
        self.outcome = Some(outcome.to_string());
    }

    /// Whether this record suppresses a new trigger at `now`.
    #[must_use]
    pub fn suppresses(&self, key: &str, now: DateTime<Utc>, window: TimeDelta) -> bool {
        self.dedupe_key == key && within_window(self.triggered_at, now, window)
    }
}

/// `kernel_id:trigger_type:entity_id`, with an empty entity segment when
/// none is given.
#[must_use]
pub fn dedupe_key(kernel_id: &str, trigger_type: &str, entity_id: Option<&str>) -> String {
    format!("{}:{}:{}", kernel_id, trigger_type, entity_id.unwrap_or(""))
}

/// `triggered_at` lies in `[now - window, now]`, exclusive of the far edge.
#[must_use]
pub fn within_window(triggered_at: DateTime<Utc>, now: DateTime<Utc>, window: TimeDelta) -> bool {
    let age = now.signed_duration_since(triggered_at);
    age >= TimeDelta::zero() && age < window
}

/// Receives one notification per recorded (non-deduplicated) trigger.
pub trait ReevaluationSink: Send + Sync {
    fn reevaluation_started(&self, record: &ReevaluationRecord);
}

/// Sink that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ReevaluationSink for TracingSink {
    fn reevaluation_started(&self, record: &ReevaluationRecord) {
        tracing::info!(
            reevaluation_id = %record.reevaluation_id,
            kernel_id = %record.kernel_id,
            trigger = %record.trigger_type,
            "reevaluation started"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 8, 0, 0).single().expect("date")
    }

    #[test]
    fn key_includes_optional_entity() {
        assert_eq!(dedupe_key("K1", "evidence_changed", Some("E1")), "K1:evidence_changed:E1");
        assert_eq!(dedupe_key("K1", "manual", None), "K1:manual:");
    }

    #[test]
    fn window_is_half_open() {
        let day = TimeDelta::hours(24);
        assert!(within_window(t0(), t0(), day));
        assert!(within_window(t0(), t0() + TimeDelta::hours(23), day));
        assert!(!within_window(t0(), t0() + TimeDelta::hours(24), day));
        assert!(!within_window(t0(), t0() - TimeDelta::hours(1), day));
    }

    #[test]
    fn record_suppresses_same_key_only() {
        let rec = ReevaluationRecord::new("R1".to_string(), "K1", "manual", None, t0());
        let day = TimeDelta::hours(24);
        assert!(rec.suppresses("K1:manual:", t0() + TimeDelta::hours(1), day));
        assert!(!rec.suppresses("K2:manual:", t0() + TimeDelta::hours(1), day));
        assert!(!rec.suppresses("K1:manual:", t0() + TimeDelta::hours(25), day));
    }

    #[test]
    fn complete_sets_outcome() {
        let mut rec = ReevaluationRecord::new("R1".to_string(), "K1", "manual", None, t0());
        assert!(rec.is_pending());
        rec.complete("still valid", t0());
        assert_eq!(rec.status, ReevaluationStatus::Completed);
        assert_eq!(rec.outcome.as_deref(), Some("still valid"));
    }
}
