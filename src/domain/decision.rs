//! Immutable audit records for rollout decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::component::{Implementation, RolloutStrategy};

/// One entry in the controller's append-only decision log.
///
/// Decisions are advisory/audit, not the system of record for the
/// effective percentage - the flag store is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationDecision {
    pub id: Uuid,
    pub component_name: String,
    pub timestamp: DateTime<Utc>,
    pub strategy: RolloutStrategy,
    pub implementation: Implementation,
    pub rollout_percentage: f64,
    /// Confidence in [0, 1]; forced administrative decisions carry 1.0.
    pub confidence: f64,
    pub reason: String,
}

impl OptimizationDecision {
    pub fn new(
        component_name: impl Into<String>,
        strategy: RolloutStrategy,
        implementation: Implementation,
        rollout_percentage: f64,
        confidence: f64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            component_name: component_name.into(),
            timestamp: Utc::now(),
            strategy,
            implementation,
            rollout_percentage,
            confidence: confidence.clamp(0.0, 1.0),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_is_clamped() {
        let decision = OptimizationDecision::new(
            "parser",
            RolloutStrategy::Balanced,
            Implementation::NewImpl,
            50.0,
            1.7,
            "test",
        );
        assert_eq!(decision.confidence, 1.0);
    }
}
