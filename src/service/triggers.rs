//! Trigger ownership, gating, and execution.
//!
//! The engine owns trigger definitions and their execution history. An
//! execution gate runs before any action: enabled check, in-flight
//! guard, cooldown, hourly rate limit, then the type-specific
//! predicate. One trigger's failure never prevents evaluation of the
//! others.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::domain::{
    MetricSnapshot, ScheduleKind, TriggerCondition, TriggerConfig, TriggerExecution, TriggerType,
};
use crate::error::{ExecutionError, Result, ValidationError};
use crate::ports::ActionExecutor;

use super::events::{Event, SubscriberRegistry};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEngineConfig {
    /// Executions retained in the history ring.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// How much metric history to keep for duration conditions.
    #[serde(default = "default_metric_history_seconds")]
    pub metric_history_seconds: i64,
    /// Bound on each action call against the executor.
    #[serde(default = "default_action_timeout")]
    pub action_timeout_seconds: u64,
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_seconds: u64,
}

fn default_max_history() -> usize {
    1000
}

fn default_metric_history_seconds() -> i64 {
    3600
}

fn default_action_timeout() -> u64 {
    10
}

fn default_monitor_interval() -> u64 {
    15
}

impl Default for TriggerEngineConfig {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
            metric_history_seconds: default_metric_history_seconds(),
            action_timeout_seconds: default_action_timeout(),
            monitor_interval_seconds: default_monitor_interval(),
        }
    }
}

/// Context for one gate evaluation / execution attempt.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    /// Manual triggers only fire when this is set.
    pub manual_trigger: bool,
    /// Live metric snapshot for condition evaluation.
    pub metrics: MetricSnapshot,
}

impl ExecutionContext {
    pub fn automatic(metrics: MetricSnapshot) -> Self {
        Self {
            manual_trigger: false,
            metrics,
        }
    }

    pub fn manual(metrics: MetricSnapshot) -> Self {
        Self {
            manual_trigger: true,
            metrics,
        }
    }
}

/// Persisted trigger document: `{"triggers": [...]}`.
#[derive(Debug, Serialize, Deserialize)]
struct TriggerDocument {
    triggers: Vec<TriggerConfig>,
}

/// Validate a single trigger definition.
///
/// Rejection happens before any engine state is mutated.
pub fn validate_trigger(trigger: &TriggerConfig) -> Result<()> {
    if trigger.trigger_id.trim().is_empty() {
        return Err(ValidationError::EmptyTriggerId.into());
    }
    if trigger.target_components.is_empty() {
        return Err(ValidationError::NoTargetComponents {
            trigger_id: trigger.trigger_id.clone(),
        }
        .into());
    }
    if trigger.trigger_type.is_condition_based() && trigger.conditions.is_empty() {
        return Err(ValidationError::MissingConditions {
            trigger_id: trigger.trigger_id.clone(),
            trigger_type: trigger.trigger_type.as_str().to_string(),
        }
        .into());
    }
    if trigger.trigger_type.is_schedule_based() && trigger.schedule.is_none() {
        return Err(ValidationError::MissingSchedule {
            trigger_id: trigger.trigger_id.clone(),
            trigger_type: trigger.trigger_type.as_str().to_string(),
        }
        .into());
    }
    if !(0.0..=100.0).contains(&trigger.action.percentage) {
        return Err(ValidationError::InvalidField {
            trigger_id: trigger.trigger_id.clone(),
            field: "action.percentage",
            reason: format!("{} is outside 0-100", trigger.action.percentage),
        }
        .into());
    }
    Ok(())
}

/// Parse and validate a trigger document without mutating anything.
pub fn validate_document(path: &Path) -> Result<usize> {
    let content = std::fs::read_to_string(path)?;
    let document: TriggerDocument = serde_json::from_str(&content)?;
    let mut seen = std::collections::HashSet::new();
    for trigger in &document.triggers {
        validate_trigger(trigger)?;
        if !seen.insert(trigger.trigger_id.clone()) {
            return Err(ValidationError::DuplicateTrigger(trigger.trigger_id.clone()).into());
        }
    }
    Ok(document.triggers.len())
}

#[derive(Default)]
struct TriggerRuntime {
    in_flight: bool,
    last_execution: Option<DateTime<Utc>>,
    /// Start timestamps within the last hour, for the rate limit.
    recent_starts: VecDeque<DateTime<Utc>>,
}

/// Owns trigger definitions, evaluates their gates, and executes their
/// actions through the `ActionExecutor` port.
pub struct TriggerEngine {
    config: TriggerEngineConfig,
    executor: Arc<dyn ActionExecutor>,
    events: Arc<SubscriberRegistry>,
    triggers: RwLock<HashMap<String, TriggerConfig>>,
    runtime: Mutex<HashMap<String, TriggerRuntime>>,
    executions: Mutex<VecDeque<TriggerExecution>>,
    metric_history: Mutex<VecDeque<(DateTime<Utc>, MetricSnapshot)>>,
}

impl TriggerEngine {
    pub fn new(
        config: TriggerEngineConfig,
        executor: Arc<dyn ActionExecutor>,
        events: Arc<SubscriberRegistry>,
    ) -> Self {
        Self {
            config,
            executor,
            events,
            triggers: RwLock::new(HashMap::new()),
            runtime: Mutex::new(HashMap::new()),
            executions: Mutex::new(VecDeque::new()),
            metric_history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn add_trigger(&self, trigger: TriggerConfig) -> Result<()> {
        validate_trigger(&trigger)?;
        let mut triggers = self.triggers.write();
        if triggers.contains_key(&trigger.trigger_id) {
            return Err(ValidationError::DuplicateTrigger(trigger.trigger_id).into());
        }
        debug!(trigger_id = %trigger.trigger_id, "Trigger added");
        triggers.insert(trigger.trigger_id.clone(), trigger);
        Ok(())
    }

    pub fn update_trigger(&self, trigger: TriggerConfig) -> Result<()> {
        validate_trigger(&trigger)?;
        let mut triggers = self.triggers.write();
        if !triggers.contains_key(&trigger.trigger_id) {
            return Err(ValidationError::UnknownTrigger(trigger.trigger_id).into());
        }
        triggers.insert(trigger.trigger_id.clone(), trigger);
        Ok(())
    }

    pub fn remove_trigger(&self, trigger_id: &str) -> Result<()> {
        let removed = self.triggers.write().remove(trigger_id);
        if removed.is_none() {
            return Err(ValidationError::UnknownTrigger(trigger_id.to_string()).into());
        }
        self.runtime.lock().remove(trigger_id);
        Ok(())
    }

    pub fn trigger(&self, trigger_id: &str) -> Option<TriggerConfig> {
        self.triggers.read().get(trigger_id).cloned()
    }

    /// Snapshot of all trigger definitions.
    pub fn triggers(&self) -> Vec<TriggerConfig> {
        self.triggers.read().values().cloned().collect()
    }

    /// Snapshot of recent executions, oldest first.
    pub fn executions(&self) -> Vec<TriggerExecution> {
        self.executions.lock().iter().cloned().collect()
    }

    /// Record a live metric snapshot for duration-based conditions.
    pub fn record_metrics(&self, snapshot: MetricSnapshot) {
        self.record_metrics_at(snapshot, Utc::now());
    }

    pub fn record_metrics_at(&self, snapshot: MetricSnapshot, now: DateTime<Utc>) {
        let mut history = self.metric_history.lock();
        history.push_back((now, snapshot));
        let cutoff = now - Duration::seconds(self.config.metric_history_seconds);
        while history.front().is_some_and(|(t, _)| *t < cutoff) {
            history.pop_front();
        }
    }

    /// The execution gate. Returns whether the trigger may fire now.
    pub fn should_execute(&self, trigger_id: &str, ctx: &ExecutionContext) -> Result<bool> {
        self.should_execute_at(trigger_id, ctx, Utc::now())
    }

    pub fn should_execute_at(
        &self,
        trigger_id: &str,
        ctx: &ExecutionContext,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let trigger = self
            .trigger(trigger_id)
            .ok_or_else(|| ValidationError::UnknownTrigger(trigger_id.to_string()))?;

        if !trigger.enabled {
            return Ok(false);
        }

        {
            let mut runtime = self.runtime.lock();
            let rt = runtime.entry(trigger_id.to_string()).or_default();
            if rt.in_flight {
                return Ok(false);
            }
            if let Some(last) = rt.last_execution {
                if (now - last).num_seconds() < trigger.cooldown_seconds as i64 {
                    return Ok(false);
                }
            }
            let hour_ago = now - Duration::hours(1);
            while rt.recent_starts.front().is_some_and(|t| *t <= hour_ago) {
                rt.recent_starts.pop_front();
            }
            if rt.recent_starts.len() as u32 >= trigger.max_executions_per_hour {
                return Ok(false);
            }
        }

        Ok(self.type_predicate(&trigger, ctx, now))
    }

    fn type_predicate(
        &self,
        trigger: &TriggerConfig,
        ctx: &ExecutionContext,
        now: DateTime<Utc>,
    ) -> bool {
        match trigger.trigger_type {
            TriggerType::Manual => ctx.manual_trigger,
            t if t.is_condition_based() => trigger
                .conditions
                .iter()
                .all(|c| self.condition_satisfied(c, ctx, now)),
            _ => self.schedule_satisfied(trigger, now),
        }
    }

    fn condition_satisfied(
        &self,
        condition: &TriggerCondition,
        ctx: &ExecutionContext,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(value) = ctx.metrics.get(&condition.metric).copied() else {
            return false;
        };
        if !condition.holds(value) {
            return false;
        }
        match condition.duration_seconds {
            None => true,
            Some(duration) => self.held_continuously(condition, duration, now),
        }
    }

    /// Whether a condition has held for at least `duration` seconds,
    /// judged against the metric history buffer.
    fn held_continuously(
        &self,
        condition: &TriggerCondition,
        duration: u64,
        now: DateTime<Utc>,
    ) -> bool {
        let since = now - Duration::seconds(duration as i64);
        let history = self.metric_history.lock();

        // The buffer must reach back far enough to cover the duration.
        let Some((oldest, _)) = history.front() else {
            return false;
        };
        if *oldest > since {
            return false;
        }

        history
            .iter()
            .filter(|(t, _)| *t >= since)
            .all(|(_, snapshot)| {
                snapshot
                    .get(&condition.metric)
                    .is_some_and(|v| condition.holds(*v))
            })
    }

    fn schedule_satisfied(&self, trigger: &TriggerConfig, now: DateTime<Utc>) -> bool {
        let Some(schedule) = &trigger.schedule else {
            return false;
        };
        if schedule.in_blackout(now) {
            return false;
        }
        match &schedule.kind {
            ScheduleKind::Once { start_time } => {
                now >= *start_time && trigger.execution_count == 0
            }
            ScheduleKind::Interval { interval_seconds } => {
                let last = self
                    .runtime
                    .lock()
                    .get(&trigger.trigger_id)
                    .and_then(|rt| rt.last_execution);
                match last {
                    None => true,
                    Some(last) => (now - last).num_seconds() >= *interval_seconds as i64,
                }
            }
        }
    }

    /// Run the gate and, if it passes, execute the trigger's action.
    ///
    /// Returns `Ok(None)` when the gate rejects. Action failures are
    /// recorded on the sealed execution, never raised.
    pub async fn execute_trigger(
        &self,
        trigger_id: &str,
        ctx: &ExecutionContext,
    ) -> Result<Option<TriggerExecution>> {
        self.execute_trigger_at(trigger_id, ctx, Utc::now()).await
    }

    pub async fn execute_trigger_at(
        &self,
        trigger_id: &str,
        ctx: &ExecutionContext,
        now: DateTime<Utc>,
    ) -> Result<Option<TriggerExecution>> {
        if !self.should_execute_at(trigger_id, ctx, now)? {
            debug!(trigger_id, "Execution gate rejected trigger");
            return Ok(None);
        }
        let trigger = self
            .trigger(trigger_id)
            .ok_or_else(|| ValidationError::UnknownTrigger(trigger_id.to_string()))?;

        // Mark in-flight and stamp the start; cooldown is measured from
        // execution start.
        {
            let mut runtime = self.runtime.lock();
            let rt = runtime.entry(trigger_id.to_string()).or_default();
            rt.in_flight = true;
            rt.last_execution = Some(now);
            rt.recent_starts.push_back(now);
        }

        let execution = TriggerExecution::begin(trigger_id, now);
        let outcome = self.run_action(&trigger).await;
        let completed = Utc::now();

        let execution = match outcome {
            Ok((payload, true)) => execution.succeed(completed, payload),
            Ok((payload, false)) => {
                let mut failed = execution.fail(
                    completed,
                    "action returned failure for one or more components",
                );
                failed.result = Some(payload);
                failed
            }
            Err(error) => {
                warn!(trigger_id, error = %error, "Trigger action failed");
                execution.fail(completed, error.to_string())
            }
        };

        let success = execution.status == crate::domain::ExecutionStatus::Succeeded;

        // Always restore readiness and seal bookkeeping, whatever the
        // action outcome was.
        {
            let mut triggers = self.triggers.write();
            if let Some(t) = triggers.get_mut(trigger_id) {
                t.execution_count += 1;
                if success {
                    t.success_count += 1;
                } else {
                    t.failure_count += 1;
                }
            }
        }
        {
            let mut runtime = self.runtime.lock();
            if let Some(rt) = runtime.get_mut(trigger_id) {
                rt.in_flight = false;
            }
        }
        {
            let mut executions = self.executions.lock();
            executions.push_back(execution.clone());
            while executions.len() > self.config.max_history {
                executions.pop_front();
            }
        }

        self.events.publish_all(Event::TriggerCompleted {
            trigger_id: trigger_id.to_string(),
            success,
            details: execution
                .error
                .clone()
                .unwrap_or_else(|| "completed".to_string()),
        });

        Ok(Some(execution))
    }

    /// Apply the trigger's action to each target component, bounded by
    /// the action timeout. Returns the per-component payload and
    /// whether every component accepted it.
    async fn run_action(
        &self,
        trigger: &TriggerConfig,
    ) -> std::result::Result<(serde_json::Value, bool), ExecutionError> {
        let timeout = StdDuration::from_secs(self.config.action_timeout_seconds);
        let mut per_component = serde_json::Map::new();
        let mut all_ok = true;

        for component in &trigger.target_components {
            let call = self.executor.force_optimization(
                component,
                trigger.action.implementation,
                trigger.action.percentage,
            );
            match tokio::time::timeout(timeout, call).await {
                Ok(accepted) => {
                    if !accepted {
                        all_ok = false;
                    }
                    per_component.insert(component.clone(), json!(accepted));
                }
                Err(_) => {
                    return Err(ExecutionError::Timeout {
                        trigger_id: trigger.trigger_id.clone(),
                        timeout_secs: self.config.action_timeout_seconds,
                    })
                }
            }
        }

        Ok((serde_json::Value::Object(per_component), all_ok))
    }

    /// Load a trigger document, validating each entry as if added
    /// individually. Returns how many triggers were loaded.
    pub fn load_document(&self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)?;
        let document: TriggerDocument = serde_json::from_str(&content)?;
        // Validate the whole document before touching engine state.
        let mut seen = std::collections::HashSet::new();
        for trigger in &document.triggers {
            validate_trigger(trigger)?;
            if !seen.insert(trigger.trigger_id.clone())
                || self.triggers.read().contains_key(&trigger.trigger_id)
            {
                return Err(ValidationError::DuplicateTrigger(trigger.trigger_id.clone()).into());
            }
        }
        let count = document.triggers.len();
        let mut triggers = self.triggers.write();
        for trigger in document.triggers {
            triggers.insert(trigger.trigger_id.clone(), trigger);
        }
        Ok(count)
    }

    /// Persist the current trigger definitions.
    pub fn save_document(&self, path: &Path) -> Result<()> {
        let mut triggers = self.triggers();
        triggers.sort_by(|a, b| a.trigger_id.cmp(&b.trigger_id));
        let document = TriggerDocument { triggers };
        let content = serde_json::to_string_pretty(&document)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
