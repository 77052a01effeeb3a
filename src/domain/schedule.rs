//! Scheduling decisions and learned load patterns.

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Predicted or observed background load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl LoadLevel {
    /// Score contribution of a candidate slot at this load level.
    pub fn slot_score(self) -> f64 {
        match self {
            Self::Low => 10.0,
            Self::Medium => 6.0,
            Self::High => 3.0,
            Self::Critical => 1.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Where and when a pending trigger should execute.
///
/// Lives only until the scheduled time passes; then it is converted to
/// an execution or discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingDecision {
    pub id: Uuid,
    pub trigger_id: String,
    pub scheduled_time: DateTime<Utc>,
    pub estimated_duration_ms: f64,
    pub priority_score: f64,
    pub predicted_load: LoadLevel,
    /// Human-readable account of the choice: priority, chosen time,
    /// predicted load, and whether peak-avoidance applied.
    pub reasoning: Vec<String>,
    /// Computed alternative time options, for observability.
    pub alternatives: Vec<DateTime<Utc>>,
}

/// Hour-of-day x day-of-week bucket key. Weekday is days from Monday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatternKey {
    pub hour: u32,
    pub weekday: u32,
}

impl PatternKey {
    pub fn from_datetime(t: DateTime<Utc>) -> Self {
        Self {
            hour: t.hour(),
            weekday: t.weekday().num_days_from_monday(),
        }
    }
}

/// Learned load/performance expectation for one hour/weekday bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformancePattern {
    pub key: PatternKey,
    pub avg_execution_time_ms: f64,
    pub avg_success_rate: f64,
    pub avg_resource_usage: f64,
    pub sample_count: u32,
    /// min(1, sample_count / (2 * min_samples)).
    pub confidence: f64,
    pub last_updated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn slot_scores_are_ordered_by_load() {
        assert!(LoadLevel::Low.slot_score() > LoadLevel::Medium.slot_score());
        assert!(LoadLevel::Medium.slot_score() > LoadLevel::High.slot_score());
        assert!(LoadLevel::High.slot_score() > LoadLevel::Critical.slot_score());
    }

    #[test]
    fn pattern_key_buckets_by_hour_and_weekday() {
        // 2026-08-17 is a Monday.
        let t = Utc.with_ymd_and_hms(2026, 8, 17, 14, 30, 0).unwrap();
        let key = PatternKey::from_datetime(t);
        assert_eq!(key.hour, 14);
        assert_eq!(key.weekday, 0);
    }
}
