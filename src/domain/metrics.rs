//! Value types consumed from the metrics source.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::component::Implementation;

/// Windowed telemetry aggregate for one implementation of a component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImplMetrics {
    pub execution_count: u64,
    pub avg_time_ms: f64,
    pub success_rate: f64,
    pub error_rate: f64,
}

/// Per-implementation metrics for one component, as reported by the
/// metrics source once per evaluation cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub component: String,
    pub implementations: HashMap<Implementation, ImplMetrics>,
}

impl PerformanceSummary {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            implementations: HashMap::new(),
        }
    }

    pub fn with(mut self, implementation: Implementation, metrics: ImplMetrics) -> Self {
        self.implementations.insert(implementation, metrics);
        self
    }

    pub fn baseline(&self) -> Option<&ImplMetrics> {
        self.implementations.get(&Implementation::Baseline)
    }

    pub fn candidate(&self) -> Option<&ImplMetrics> {
        self.implementations.get(&Implementation::NewImpl)
    }
}

/// Flat metric name -> value snapshot used for trigger conditions.
pub type MetricSnapshot = HashMap<String, f64>;
