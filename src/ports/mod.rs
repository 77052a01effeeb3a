//! Trait seams for external collaborators.
//!
//! The core never talks to a network or a database directly; everything
//! outside the process is reached through these traits so adapters can
//! be swapped in tests and deployments.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{Implementation, MetricSnapshot, PerformanceSummary};
use crate::error::Result;

/// Status of a named feature flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagStatus {
    Enabled,
    Disabled,
    /// Enabled for a fraction of traffic, per the rollout percentage.
    Conditional,
}

/// Supplies per-component, per-implementation execution telemetry.
///
/// Absence of data is not an error; it simply skips that component's
/// update this cycle.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn performance_summary(&self, component: &str) -> Result<Option<PerformanceSummary>>;

    /// Flat snapshot of live metrics for trigger condition evaluation.
    async fn metric_snapshot(&self) -> Result<MetricSnapshot>;
}

/// Holds named flags consulted by the traffic-splitting layer.
///
/// Writes must be idempotent: repeating a write with the same
/// percentage produces the same externally observed state.
#[async_trait]
pub trait FeatureFlagStore: Send + Sync {
    async fn set_flag(
        &self,
        name: &str,
        status: FlagStatus,
        rollout_percentage: Option<f64>,
        conditions: Option<serde_json::Value>,
    ) -> Result<()>;
}

/// Applies a rollout action to a component.
///
/// Invoked both by forced administrative calls and by normal rollout
/// progression. Failure returns `false` and is logged, never raised.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn force_optimization(
        &self,
        component: &str,
        implementation: Implementation,
        percentage: f64,
    ) -> bool;
}
