//! Per-component rollout state machine.
//!
//! A periodic evaluation cycle compares baseline and candidate latency
//! from the metrics source, nudges the component's performance score,
//! and advances or rolls back the rollout percentage. Every transition
//! is mirrored to the feature flag store and recorded as an
//! `OptimizationDecision`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::domain::{
    ComponentState, Implementation, OptimizationDecision, PerformanceSummary, RolloutStatus,
    RolloutStrategy,
};
use crate::error::{IntegrationError, Result};
use crate::ports::{ActionExecutor, FeatureFlagStore, FlagStatus, MetricsSource};

use super::anomaly::{AnomalyDetector, AnomalySeverity, MetricKind};
use super::events::{Event, SubscriberRegistry};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutConfig {
    #[serde(default = "default_evaluation_interval")]
    pub evaluation_interval_seconds: u64,
    /// Errors at or above this count force a rollback.
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u64,
    /// Relative latency change that moves the performance score.
    #[serde(default = "default_performance_threshold")]
    pub performance_threshold: f64,
    #[serde(default = "default_rollout_increment")]
    pub rollout_increment: f64,
    #[serde(default = "default_max_percentage")]
    pub max_percentage: f64,
    #[serde(default = "default_score_step")]
    pub score_step: f64,
    /// Scores below this floor force a rollback.
    #[serde(default = "default_rollback_score_floor")]
    pub rollback_score_floor: f64,
    /// Score required to advance the rollout.
    #[serde(default = "default_advance_score")]
    pub advance_score: f64,
    /// Clean-record fallback: advance with zero errors and at least
    /// this many successes even below the advance score.
    #[serde(default = "default_min_success_count")]
    pub min_success_count: u64,
    #[serde(default = "default_external_timeout")]
    pub external_timeout_seconds: u64,
    /// Decisions retained in the audit ring.
    #[serde(default = "default_max_decisions")]
    pub max_decisions: usize,
}

fn default_evaluation_interval() -> u64 {
    300
}

fn default_error_threshold() -> u64 {
    5
}

fn default_performance_threshold() -> f64 {
    0.1
}

fn default_rollout_increment() -> f64 {
    10.0
}

fn default_max_percentage() -> f64 {
    100.0
}

fn default_score_step() -> f64 {
    0.1
}

fn default_rollback_score_floor() -> f64 {
    0.2
}

fn default_advance_score() -> f64 {
    0.6
}

fn default_min_success_count() -> u64 {
    10
}

fn default_external_timeout() -> u64 {
    10
}

fn default_max_decisions() -> usize {
    1000
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            evaluation_interval_seconds: default_evaluation_interval(),
            error_threshold: default_error_threshold(),
            performance_threshold: default_performance_threshold(),
            rollout_increment: default_rollout_increment(),
            max_percentage: default_max_percentage(),
            score_step: default_score_step(),
            rollback_score_floor: default_rollback_score_floor(),
            advance_score: default_advance_score(),
            min_success_count: default_min_success_count(),
            external_timeout_seconds: default_external_timeout(),
            max_decisions: default_max_decisions(),
        }
    }
}

enum CycleOutcome {
    Advanced,
    RolledBack { detail: String },
    Held,
}

/// Owns per-component rollout state and the append-only decision log.
pub struct RolloutController {
    config: RolloutConfig,
    metrics: Arc<dyn MetricsSource>,
    flags: Arc<dyn FeatureFlagStore>,
    anomalies: Arc<AnomalyDetector>,
    events: Arc<SubscriberRegistry>,
    states: RwLock<HashMap<String, ComponentState>>,
    decisions: Mutex<VecDeque<OptimizationDecision>>,
}

impl RolloutController {
    pub fn new(
        config: RolloutConfig,
        metrics: Arc<dyn MetricsSource>,
        flags: Arc<dyn FeatureFlagStore>,
        anomalies: Arc<AnomalyDetector>,
        events: Arc<SubscriberRegistry>,
    ) -> Self {
        Self {
            config,
            metrics,
            flags,
            anomalies,
            events,
            states: RwLock::new(HashMap::new()),
            decisions: Mutex::new(VecDeque::new()),
        }
    }

    /// Put a component under management. A no-op if it already is.
    pub fn register_component(&self, name: impl Into<String>, strategy: RolloutStrategy) {
        let name = name.into();
        self.states
            .write()
            .entry(name.clone())
            .or_insert_with(|| ComponentState::new(name, strategy));
    }

    pub fn component_state(&self, name: &str) -> Option<ComponentState> {
        self.states.read().get(name).cloned()
    }

    /// Snapshot of all managed component states.
    pub fn states(&self) -> Vec<ComponentState> {
        self.states.read().values().cloned().collect()
    }

    /// Snapshot of recent decisions, oldest first.
    pub fn decisions(&self) -> Vec<OptimizationDecision> {
        self.decisions.lock().iter().cloned().collect()
    }

    /// Evaluate every managed component. One component's failure never
    /// blocks the rest of the cycle.
    pub async fn evaluate_all(&self) {
        let names: Vec<String> = self.states.read().keys().cloned().collect();
        for name in names {
            if let Err(error) = self.evaluate_component(&name).await {
                warn!(component = %name, error = %error, "Evaluation cycle skipped");
            }
        }
    }

    /// Run one evaluation cycle for a component.
    ///
    /// Missing telemetry skips the update; integration failures leave
    /// state unchanged and are retried next cycle.
    pub async fn evaluate_component(&self, component: &str) -> Result<()> {
        let summary = self.fetch_summary(component).await?;
        let Some(summary) = summary else {
            debug!(component, "No telemetry this cycle");
            return Ok(());
        };

        let high_anomaly = self.feed_detector(component, &summary);
        let (outcome, snapshot) = self.apply_cycle(component, &summary, high_anomaly);

        match outcome {
            CycleOutcome::Advanced => {
                info!(
                    component,
                    percentage = snapshot.rollout_percentage,
                    score = snapshot.performance_score,
                    "Rollout advanced"
                );
                self.record_decision(OptimizationDecision::new(
                    component,
                    snapshot.strategy,
                    snapshot.current_implementation,
                    snapshot.rollout_percentage,
                    snapshot.performance_score,
                    format!("Advanced rollout to {}%", snapshot.rollout_percentage),
                ));
            }
            CycleOutcome::RolledBack { detail } => {
                warn!(component, detail = %detail, "Rollout rolled back");
                self.record_decision(OptimizationDecision::new(
                    component,
                    snapshot.strategy,
                    Implementation::Baseline,
                    0.0,
                    0.9,
                    format!("Rollback triggered: {detail}"),
                ));
            }
            CycleOutcome::Held => {}
        }

        // The flag write repeats every cycle; idempotence makes the
        // retry after a store outage safe.
        if let Err(error) = self.write_flag(&snapshot).await {
            warn!(component, error = %error, "Flag store write failed, will retry");
        }

        Ok(())
    }

    /// Administrative override: set state and flag directly, bypassing
    /// the state machine.
    pub async fn force_rollout(
        &self,
        component: &str,
        implementation: Implementation,
        percentage: f64,
    ) -> Result<ComponentState> {
        let percentage = percentage.clamp(0.0, self.config.max_percentage);
        let snapshot = {
            let mut states = self.states.write();
            let state = states
                .entry(component.to_string())
                .or_insert_with(|| ComponentState::new(component, RolloutStrategy::default()));
            state.current_implementation = implementation;
            state.rollout_percentage = percentage;
            state.rollout_status = if percentage == 0.0 {
                RolloutStatus::RolledBack
            } else if percentage >= self.config.max_percentage {
                RolloutStatus::Completed
            } else {
                RolloutStatus::InProgress
            };
            state.last_updated = Utc::now();
            state.clone()
        };

        info!(
            component,
            implementation = %implementation,
            percentage,
            "Forced rollout applied"
        );
        self.record_decision(OptimizationDecision::new(
            component,
            snapshot.strategy,
            implementation,
            percentage,
            1.0,
            "forced",
        ));

        if let Err(error) = self.write_flag(&snapshot).await {
            warn!(component, error = %error, "Flag store write failed, will retry");
        }
        Ok(snapshot)
    }

    /// Administrative reset: counters cleared, state back to
    /// `NotStarted`, flag disabled.
    pub async fn reset_component(&self, component: &str) -> Result<ComponentState> {
        let snapshot = {
            let mut states = self.states.write();
            let state = states
                .get_mut(component)
                .ok_or_else(|| unknown_component(component))?;
            *state = ComponentState::new(component, state.strategy);
            state.clone()
        };
        info!(component, "Component reset");
        if let Err(error) = self.write_flag(&snapshot).await {
            warn!(component, error = %error, "Flag store write failed, will retry");
        }
        Ok(snapshot)
    }

    /// Pause further transitions. Rollback still applies while paused.
    pub fn pause_component(&self, component: &str) -> Result<ComponentState> {
        self.set_status(component, RolloutStatus::Paused)
    }

    /// Resume a paused component.
    pub fn resume_component(&self, component: &str) -> Result<ComponentState> {
        let mut states = self.states.write();
        let state = states
            .get_mut(component)
            .ok_or_else(|| unknown_component(component))?;
        if state.rollout_status == RolloutStatus::Paused {
            state.rollout_status = if state.rollout_percentage > 0.0 {
                RolloutStatus::InProgress
            } else {
                RolloutStatus::NotStarted
            };
            state.last_updated = Utc::now();
        }
        Ok(state.clone())
    }

    /// Observability snapshot of the controller.
    pub fn system_status(&self) -> serde_json::Value {
        let states = self.states();
        json!({
            "components": states.len(),
            "decisions_recorded": self.decisions.lock().len(),
            "states": states,
        })
    }

    fn set_status(&self, component: &str, status: RolloutStatus) -> Result<ComponentState> {
        let mut states = self.states.write();
        let state = states
            .get_mut(component)
            .ok_or_else(|| unknown_component(component))?;
        state.rollout_status = status;
        state.last_updated = Utc::now();
        Ok(state.clone())
    }

    async fn fetch_summary(&self, component: &str) -> Result<Option<PerformanceSummary>> {
        let timeout = StdDuration::from_secs(self.config.external_timeout_seconds);
        match tokio::time::timeout(timeout, self.metrics.performance_summary(component)).await {
            Ok(result) => result,
            Err(_) => {
                Err(IntegrationError::Timeout(self.config.external_timeout_seconds).into())
            }
        }
    }

    /// Feed candidate telemetry into the anomaly detector. Returns
    /// whether a high-severity anomaly was flagged this cycle.
    fn feed_detector(&self, component: &str, summary: &PerformanceSummary) -> bool {
        let Some(candidate) = summary.candidate() else {
            return false;
        };
        let mut high = false;
        let points = [
            (
                format!("{component}.candidate.error_rate"),
                MetricKind::ErrorRate,
                candidate.error_rate,
            ),
            (
                format!("{component}.candidate.latency_ms"),
                MetricKind::Latency,
                candidate.avg_time_ms,
            ),
        ];
        for (metric, kind, value) in points {
            for anomaly in self.anomalies.record(&metric, kind, value) {
                if anomaly.severity == AnomalySeverity::High {
                    high = true;
                }
                self.events.publish_all(Event::AnomalyDetected(anomaly));
            }
        }
        high
    }

    /// Apply score update, counter recomputation, and the state machine
    /// transition for one cycle. Synchronous; no lock held across IO.
    fn apply_cycle(
        &self,
        component: &str,
        summary: &PerformanceSummary,
        high_anomaly: bool,
    ) -> (CycleOutcome, ComponentState) {
        let mut states = self.states.write();
        let state = states
            .entry(component.to_string())
            .or_insert_with(|| ComponentState::new(component, RolloutStrategy::default()));

        if let (Some(baseline), Some(candidate)) = (summary.baseline(), summary.candidate()) {
            if baseline.avg_time_ms > 0.0 {
                let improvement =
                    (baseline.avg_time_ms - candidate.avg_time_ms) / baseline.avg_time_ms;
                if improvement > self.config.performance_threshold {
                    state.performance_score =
                        (state.performance_score + self.config.score_step).min(1.0);
                } else if improvement < -self.config.performance_threshold {
                    state.performance_score =
                        (state.performance_score - self.config.score_step).max(0.0);
                }
            }
        }

        // Counts are recomputed, not incremented: the telemetry is a
        // windowed aggregate.
        if let Some(candidate) = summary.candidate() {
            state.error_count =
                (candidate.error_rate * candidate.execution_count as f64).round() as u64;
            state.success_count =
                (candidate.success_rate * candidate.execution_count as f64).round() as u64;
        }
        state.last_updated = Utc::now();

        let must_rollback = state.rollout_status != RolloutStatus::RolledBack
            && (state.error_count >= self.config.error_threshold
                || state.performance_score < self.config.rollback_score_floor
                || high_anomaly);

        let outcome = if must_rollback {
            let detail = if state.error_count >= self.config.error_threshold {
                format!(
                    "error count {} reached threshold {}",
                    state.error_count, self.config.error_threshold
                )
            } else if state.performance_score < self.config.rollback_score_floor {
                format!(
                    "performance score {:.2} below floor {:.2}",
                    state.performance_score, self.config.rollback_score_floor
                )
            } else {
                "high severity anomaly on candidate telemetry".to_string()
            };
            state.rollout_status = RolloutStatus::RolledBack;
            state.rollout_percentage = 0.0;
            state.current_implementation = Implementation::Baseline;
            CycleOutcome::RolledBack { detail }
        } else if state.is_advanceable()
            && state.error_count < self.config.error_threshold
            && (state.performance_score >= self.config.advance_score
                || (state.error_count == 0
                    && state.success_count >= self.config.min_success_count))
        {
            state.rollout_status = RolloutStatus::InProgress;
            state.rollout_percentage = (state.rollout_percentage
                + self.config.rollout_increment)
                .min(self.config.max_percentage);
            if state.rollout_percentage >= self.config.max_percentage {
                state.rollout_status = RolloutStatus::Completed;
                state.current_implementation = Implementation::NewImpl;
            } else {
                state.current_implementation = Implementation::Hybrid;
            }
            CycleOutcome::Advanced
        } else {
            CycleOutcome::Held
        };

        (outcome, state.clone())
    }

    fn record_decision(&self, decision: OptimizationDecision) {
        {
            let mut decisions = self.decisions.lock();
            decisions.push_back(decision.clone());
            while decisions.len() > self.config.max_decisions {
                decisions.pop_front();
            }
        }
        self.events.publish_all(Event::DecisionPublished(decision));
    }

    async fn write_flag(&self, state: &ComponentState) -> Result<()> {
        let name = format!("{}_new_impl", state.component_name);
        let status = match state.rollout_status {
            RolloutStatus::Completed => FlagStatus::Enabled,
            RolloutStatus::RolledBack | RolloutStatus::NotStarted => FlagStatus::Disabled,
            RolloutStatus::InProgress | RolloutStatus::Paused => FlagStatus::Conditional,
        };
        let conditions = json!({
            "implementation": state.current_implementation,
            "strategy": state.strategy,
        });
        let timeout = StdDuration::from_secs(self.config.external_timeout_seconds);
        match tokio::time::timeout(
            timeout,
            self.flags
                .set_flag(&name, status, Some(state.rollout_percentage), Some(conditions)),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                Err(IntegrationError::Timeout(self.config.external_timeout_seconds).into())
            }
        }
    }
}

fn unknown_component(component: &str) -> crate::error::Error {
    crate::error::ConfigError::InvalidValue {
        field: "component",
        reason: format!("'{component}' is not managed"),
    }
    .into()
}

/// Triggers drive rollout actions through the same administrative path.
#[async_trait]
impl ActionExecutor for RolloutController {
    async fn force_optimization(
        &self,
        component: &str,
        implementation: Implementation,
        percentage: f64,
    ) -> bool {
        match self.force_rollout(component, implementation, percentage).await {
            Ok(_) => true,
            Err(error) => {
                warn!(component, error = %error, "Forced optimization failed");
                false
            }
        }
    }
}
