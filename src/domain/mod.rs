//! Core domain types: component rollout state, decisions, triggers,
//! schedules, and metric summaries.

mod component;
mod decision;
mod metrics;
mod schedule;
mod trigger;

pub use component::{ComponentState, Implementation, RolloutStatus, RolloutStrategy};
pub use decision::OptimizationDecision;
pub use metrics::{ImplMetrics, MetricSnapshot, PerformanceSummary};
pub use schedule::{LoadLevel, PatternKey, PerformancePattern, SchedulingDecision};
pub use trigger::{
    BlackoutPeriod, ComparisonOp, ExecutionStatus, RolloutAction, ScheduleKind, TriggerCondition,
    TriggerConfig, TriggerExecution, TriggerPriority, TriggerSchedule, TriggerType,
};
