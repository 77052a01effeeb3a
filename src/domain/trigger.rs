//! Trigger definitions and execution records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::component::Implementation;

/// What causes a trigger to be considered for firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    PerformanceDegradation,
    TimeBased,
    Manual,
    ThresholdBased,
    ScheduleBased,
    EventDriven,
}

impl TriggerType {
    /// Types whose predicate evaluates metric conditions.
    pub fn is_condition_based(self) -> bool {
        matches!(
            self,
            Self::PerformanceDegradation | Self::ThresholdBased | Self::EventDriven
        )
    }

    /// Types whose predicate evaluates a time schedule.
    pub fn is_schedule_based(self) -> bool {
        matches!(self, Self::TimeBased | Self::ScheduleBased)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PerformanceDegradation => "performance_degradation",
            Self::TimeBased => "time_based",
            Self::Manual => "manual",
            Self::ThresholdBased => "threshold_based",
            Self::ScheduleBased => "schedule_based",
            Self::EventDriven => "event_driven",
        }
    }
}

/// Trigger priority. Ordering matters: `Critical` outranks everything.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TriggerPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl TriggerPriority {
    /// Weight used by the scheduler's slot scoring.
    pub fn weight(self) -> f64 {
        match self {
            Self::Low => 1.0,
            Self::Medium => 2.0,
            Self::High => 3.0,
            Self::Critical => 4.0,
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

/// Comparison operator for metric conditions.
///
/// Equality comparisons on floats use an epsilon of 0.001.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOp {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

const FLOAT_EPSILON: f64 = 0.001;

impl ComparisonOp {
    pub fn evaluate(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => value > threshold,
            Self::Lt => value < threshold,
            Self::Ge => value >= threshold,
            Self::Le => value <= threshold,
            Self::Eq => (value - threshold).abs() <= FLOAT_EPSILON,
            Self::Ne => (value - threshold).abs() > FLOAT_EPSILON,
        }
    }
}

/// One metric condition. All of a trigger's conditions must hold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerCondition {
    pub metric: String,
    pub operator: ComparisonOp,
    pub threshold: f64,
    /// If set, the condition must have held continuously for at least
    /// this long before the trigger fires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,
}

impl TriggerCondition {
    pub fn holds(&self, value: f64) -> bool {
        self.operator.evaluate(value, self.threshold)
    }
}

/// An explicit datetime range during which a trigger must not fire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlackoutPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BlackoutPeriod {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t <= self.end
    }
}

/// When a schedule-based trigger fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleKind {
    /// Fires the first time `now >= start_time`, never again.
    Once { start_time: DateTime<Utc> },
    /// Fires whenever at least `interval_seconds` elapsed since the
    /// last execution.
    Interval { interval_seconds: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerSchedule {
    #[serde(flatten)]
    pub kind: ScheduleKind,
    /// Blackout periods veto execution regardless of other conditions.
    #[serde(default)]
    pub blackouts: Vec<BlackoutPeriod>,
}

impl TriggerSchedule {
    pub fn in_blackout(&self, t: DateTime<Utc>) -> bool {
        self.blackouts.iter().any(|b| b.contains(t))
    }
}

/// The named operation a trigger runs against its target components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutAction {
    pub implementation: Implementation,
    pub percentage: f64,
}

/// A trigger definition, owned by the trigger engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub trigger_id: String,
    pub name: String,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub priority: TriggerPriority,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub conditions: Vec<TriggerCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<TriggerSchedule>,
    pub target_components: Vec<String>,
    pub action: RolloutAction,
    /// Minimum seconds between successive executions.
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: u64,
    #[serde(default = "default_max_per_hour")]
    pub max_executions_per_hour: u32,
    #[serde(default)]
    pub execution_count: u64,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub failure_count: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_cooldown() -> u64 {
    300
}

fn default_max_per_hour() -> u32 {
    4
}

/// Outcome of a single trigger execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Executing,
    Succeeded,
    Failed,
}

/// Record of one trigger execution.
///
/// Created at execution start, sealed at completion, immutable
/// thereafter. Retained as a bounded ring of recent history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerExecution {
    pub id: Uuid,
    pub trigger_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TriggerExecution {
    pub fn begin(trigger_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger_id: trigger_id.into(),
            started_at,
            completed_at: None,
            status: ExecutionStatus::Executing,
            result: None,
            error: None,
        }
    }

    /// Seal a successful execution with its result payload.
    pub fn succeed(mut self, completed_at: DateTime<Utc>, result: serde_json::Value) -> Self {
        self.completed_at = Some(completed_at);
        self.status = ExecutionStatus::Succeeded;
        self.result = Some(result);
        self
    }

    /// Seal a failed execution with an error message.
    pub fn fail(mut self, completed_at: DateTime<Utc>, error: impl Into<String>) -> Self {
        self.completed_at = Some(completed_at);
        self.status = ExecutionStatus::Failed;
        self.error = Some(error.into());
        self
    }

    pub fn duration_ms(&self) -> Option<f64> {
        self.completed_at
            .map(|end| (end - self.started_at).num_milliseconds() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparison_ops_evaluate() {
        assert!(ComparisonOp::Gt.evaluate(95.0, 90.0));
        assert!(!ComparisonOp::Gt.evaluate(85.0, 90.0));
        assert!(ComparisonOp::Le.evaluate(90.0, 90.0));
        assert!(ComparisonOp::Ne.evaluate(1.0, 2.0));
    }

    #[test]
    fn float_equality_uses_epsilon() {
        assert!(ComparisonOp::Eq.evaluate(1.0005, 1.0));
        assert!(!ComparisonOp::Eq.evaluate(1.01, 1.0));
        assert!(!ComparisonOp::Ne.evaluate(1.0005, 1.0));
    }

    #[test]
    fn operator_serializes_as_symbol() {
        let json = serde_json::to_string(&ComparisonOp::Ge).unwrap();
        assert_eq!(json, "\">=\"");
        let back: ComparisonOp = serde_json::from_str("\"!=\"").unwrap();
        assert_eq!(back, ComparisonOp::Ne);
    }

    #[test]
    fn blackout_contains_bounds() {
        let start = Utc::now();
        let end = start + chrono::Duration::hours(1);
        let blackout = BlackoutPeriod { start, end };
        assert!(blackout.contains(start));
        assert!(blackout.contains(end));
        assert!(!blackout.contains(end + chrono::Duration::seconds(1)));
    }

    #[test]
    fn execution_seals_immutably() {
        let now = Utc::now();
        let exec = TriggerExecution::begin("t1", now);
        assert_eq!(exec.status, ExecutionStatus::Executing);

        let sealed = exec.succeed(now + chrono::Duration::seconds(2), serde_json::json!({"ok": true}));
        assert_eq!(sealed.status, ExecutionStatus::Succeeded);
        assert_eq!(sealed.duration_ms(), Some(2000.0));
    }

    #[test]
    fn trigger_config_defaults_from_json() {
        let json = r#"{
            "trigger_id": "cpu-guard",
            "name": "CPU guard",
            "trigger_type": "threshold_based",
            "conditions": [{"metric": "cpu_usage", "operator": ">", "threshold": 90.0}],
            "target_components": ["parser"],
            "action": {"implementation": "baseline", "percentage": 0.0}
        }"#;
        let trigger: TriggerConfig = serde_json::from_str(json).unwrap();
        assert!(trigger.enabled);
        assert_eq!(trigger.priority, TriggerPriority::Medium);
        assert_eq!(trigger.cooldown_seconds, 300);
        assert_eq!(trigger.execution_count, 0);
    }
}
