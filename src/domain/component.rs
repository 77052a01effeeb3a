//! Per-component rollout state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which implementation a component currently runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Implementation {
    /// The incumbent implementation.
    Baseline,
    /// The candidate implementation under rollout.
    NewImpl,
    /// Blended mode: traffic split by rollout percentage.
    Hybrid,
}

impl std::fmt::Display for Implementation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Baseline => write!(f, "baseline"),
            Self::NewImpl => write!(f, "new_impl"),
            Self::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// How aggressively a component's rollout advances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutStrategy {
    Conservative,
    #[default]
    Balanced,
    Aggressive,
    PerformanceDriven,
    SafetyFirst,
}

/// Lifecycle of a component's rollout. Exactly one status at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    RolledBack,
    Paused,
}

/// Mutable rollout state for one monitored component.
///
/// Owned exclusively by the rollout controller; other components only
/// see cloned snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentState {
    pub component_name: String,
    pub current_implementation: Implementation,
    pub strategy: RolloutStrategy,
    pub rollout_status: RolloutStatus,
    /// Fraction of traffic on the candidate implementation, 0-100.
    pub rollout_percentage: f64,
    /// Running comparison score in [0, 1], nudged per evaluation cycle.
    pub performance_score: f64,
    /// Recomputed each cycle from the windowed telemetry aggregate.
    pub error_count: u64,
    pub success_count: u64,
    pub last_updated: DateTime<Utc>,
}

impl ComponentState {
    pub fn new(component_name: impl Into<String>, strategy: RolloutStrategy) -> Self {
        Self {
            component_name: component_name.into(),
            current_implementation: Implementation::Baseline,
            strategy,
            rollout_status: RolloutStatus::NotStarted,
            rollout_percentage: 0.0,
            performance_score: 0.5,
            error_count: 0,
            success_count: 0,
            last_updated: Utc::now(),
        }
    }

    /// Whether the state machine may still move this component forward.
    pub fn is_advanceable(&self) -> bool {
        matches!(
            self.rollout_status,
            RolloutStatus::NotStarted | RolloutStatus::InProgress
        )
    }
}
