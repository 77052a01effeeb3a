//! In-memory adapters for the external ports.
//!
//! Used by the binary's standalone mode and throughout the test suite.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::domain::{Implementation, MetricSnapshot, PerformanceSummary};
use crate::error::Result;
use crate::ports::{ActionExecutor, FeatureFlagStore, FlagStatus, MetricsSource};

/// One stored flag, as last written.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagRecord {
    pub status: FlagStatus,
    pub rollout_percentage: Option<f64>,
    pub conditions: Option<serde_json::Value>,
}

/// Feature flag store backed by a map.
#[derive(Default)]
pub struct InMemoryFlagStore {
    flags: Mutex<HashMap<String, FlagRecord>>,
    write_count: Mutex<u64>,
    /// When set, every write fails. Used to exercise retry paths.
    fail_writes: Mutex<bool>,
}

impl InMemoryFlagStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flag(&self, name: &str) -> Option<FlagRecord> {
        self.flags.lock().get(name).cloned()
    }

    pub fn write_count(&self) -> u64 {
        *self.write_count.lock()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock() = fail;
    }
}

#[async_trait]
impl FeatureFlagStore for InMemoryFlagStore {
    async fn set_flag(
        &self,
        name: &str,
        status: FlagStatus,
        rollout_percentage: Option<f64>,
        conditions: Option<serde_json::Value>,
    ) -> Result<()> {
        if *self.fail_writes.lock() {
            return Err(crate::error::IntegrationError::FlagStore(
                "simulated store outage".to_string(),
            )
            .into());
        }
        *self.write_count.lock() += 1;
        self.flags.lock().insert(
            name.to_string(),
            FlagRecord {
                status,
                rollout_percentage,
                conditions,
            },
        );
        Ok(())
    }
}

/// Metrics source backed by maps the caller updates directly.
#[derive(Default)]
pub struct InMemoryMetrics {
    summaries: RwLock<HashMap<String, PerformanceSummary>>,
    snapshot: RwLock<MetricSnapshot>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_summary(&self, summary: PerformanceSummary) {
        self.summaries
            .write()
            .insert(summary.component.clone(), summary);
    }

    pub fn clear_summary(&self, component: &str) {
        self.summaries.write().remove(component);
    }

    pub fn set_metric(&self, name: impl Into<String>, value: f64) {
        self.snapshot.write().insert(name.into(), value);
    }
}

#[async_trait]
impl MetricsSource for InMemoryMetrics {
    async fn performance_summary(&self, component: &str) -> Result<Option<PerformanceSummary>> {
        Ok(self.summaries.read().get(component).cloned())
    }

    async fn metric_snapshot(&self) -> Result<MetricSnapshot> {
        Ok(self.snapshot.read().clone())
    }
}

/// Records `force_optimization` calls; optionally fails them.
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<(String, Implementation, f64)>>,
    fail: Mutex<bool>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(String, Implementation, f64)> {
        self.calls.lock().clone()
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock() = fail;
    }
}

#[async_trait]
impl ActionExecutor for RecordingExecutor {
    async fn force_optimization(
        &self,
        component: &str,
        implementation: Implementation,
        percentage: f64,
    ) -> bool {
        self.calls
            .lock()
            .push((component.to_string(), implementation, percentage));
        !*self.fail.lock()
    }
}
