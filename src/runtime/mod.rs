//! Background worker orchestration.
//!
//! Four periodic workers run as tokio tasks: the rollout evaluation
//! cycle, the trigger monitor, the schedule dispatcher, and the pattern
//! retention sweep. All of them stop on the shared shutdown signal and
//! are joined with a bounded wait.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::{ExecutionStatus, MetricSnapshot};
use crate::error::IntegrationError;
use crate::ports::MetricsSource;
use crate::service::patterns::ExecutionSample;
use crate::service::{ExecutionContext, IntelligentScheduler, RolloutController, TriggerEngine};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_evaluation_interval")]
    pub evaluation_interval_seconds: u64,
    #[serde(default = "default_monitor_interval")]
    pub trigger_monitor_interval_seconds: u64,
    #[serde(default = "default_dispatch_interval")]
    pub dispatch_interval_seconds: u64,
    #[serde(default = "default_pattern_sweep_interval")]
    pub pattern_sweep_interval_seconds: u64,
    /// Bound on each metrics call made by the workers.
    #[serde(default = "default_external_timeout")]
    pub external_timeout_seconds: u64,
    /// Bounded wait for in-flight workers on shutdown.
    #[serde(default = "default_shutdown_join")]
    pub shutdown_join_seconds: u64,
}

fn default_evaluation_interval() -> u64 {
    300
}

fn default_monitor_interval() -> u64 {
    15
}

fn default_dispatch_interval() -> u64 {
    30
}

fn default_pattern_sweep_interval() -> u64 {
    60
}

fn default_external_timeout() -> u64 {
    10
}

fn default_shutdown_join() -> u64 {
    5
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            evaluation_interval_seconds: default_evaluation_interval(),
            trigger_monitor_interval_seconds: default_monitor_interval(),
            dispatch_interval_seconds: default_dispatch_interval(),
            pattern_sweep_interval_seconds: default_pattern_sweep_interval(),
            external_timeout_seconds: default_external_timeout(),
            shutdown_join_seconds: default_shutdown_join(),
        }
    }
}

/// Owns the background workers and the shutdown channel.
pub struct Runtime {
    config: RuntimeConfig,
    controller: Arc<RolloutController>,
    engine: Arc<TriggerEngine>,
    scheduler: Arc<IntelligentScheduler>,
    metrics: Arc<dyn MetricsSource>,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Runtime {
    pub fn new(
        config: RuntimeConfig,
        controller: Arc<RolloutController>,
        engine: Arc<TriggerEngine>,
        scheduler: Arc<IntelligentScheduler>,
        metrics: Arc<dyn MetricsSource>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            controller,
            engine,
            scheduler,
            metrics,
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the workers. Idempotent only in the sense that calling it
    /// twice spawns a second set; call once.
    pub fn start(&self) {
        info!(
            evaluation_interval = self.config.evaluation_interval_seconds,
            monitor_interval = self.config.trigger_monitor_interval_seconds,
            dispatch_interval = self.config.dispatch_interval_seconds,
            "Starting workers"
        );
        let mut handles = self.handles.lock();

        handles.push(tokio::spawn(evaluation_worker(
            self.controller.clone(),
            self.config.evaluation_interval_seconds,
            self.shutdown_tx.subscribe(),
        )));
        handles.push(tokio::spawn(monitor_worker(
            self.engine.clone(),
            self.scheduler.clone(),
            self.metrics.clone(),
            self.config.trigger_monitor_interval_seconds,
            self.config.external_timeout_seconds,
            self.shutdown_tx.subscribe(),
        )));
        handles.push(tokio::spawn(dispatch_worker(
            self.engine.clone(),
            self.scheduler.clone(),
            self.metrics.clone(),
            self.config.dispatch_interval_seconds,
            self.config.external_timeout_seconds,
            self.shutdown_tx.subscribe(),
        )));
        handles.push(tokio::spawn(sweep_worker(
            self.scheduler.clone(),
            self.config.pattern_sweep_interval_seconds,
            self.shutdown_tx.subscribe(),
        )));
    }

    /// Signal shutdown and wait (bounded) for the workers to stop.
    pub async fn shutdown(&self) {
        info!("Shutting down workers");
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        let join_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(
            Duration::from_secs(self.config.shutdown_join_seconds),
            join_all,
        )
        .await
        .is_err()
        {
            warn!(
                join_seconds = self.config.shutdown_join_seconds,
                "Workers did not stop within the join bound, dropping them"
            );
        }
    }
}

fn interval_skipping(seconds: u64) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(Duration::from_secs(seconds.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval
}

async fn evaluation_worker(
    controller: Arc<RolloutController>,
    interval_seconds: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = interval_skipping(interval_seconds);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                controller.evaluate_all().await;
            }
            _ = shutdown.changed() => {
                debug!("Evaluation worker stopping");
                break;
            }
        }
    }
}

async fn monitor_worker(
    engine: Arc<TriggerEngine>,
    scheduler: Arc<IntelligentScheduler>,
    metrics: Arc<dyn MetricsSource>,
    interval_seconds: u64,
    timeout_seconds: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = interval_skipping(interval_seconds);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                monitor_cycle(&engine, &scheduler, metrics.as_ref(), timeout_seconds).await;
            }
            _ = shutdown.changed() => {
                debug!("Trigger monitor stopping");
                break;
            }
        }
    }
}

/// Fetch the live snapshot within the external-call bound. `None`
/// means the pass should be skipped and retried next tick.
async fn bounded_snapshot(
    metrics: &dyn MetricsSource,
    timeout_seconds: u64,
) -> Option<MetricSnapshot> {
    let bound = Duration::from_secs(timeout_seconds);
    match tokio::time::timeout(bound, metrics.metric_snapshot()).await {
        Ok(Ok(snapshot)) => Some(snapshot),
        Ok(Err(error)) => {
            warn!(error = %error, "Metric snapshot unavailable, skipping pass");
            None
        }
        Err(_) => {
            let error = IntegrationError::Timeout(timeout_seconds);
            warn!(error = %error, "Metric snapshot timed out, skipping pass");
            None
        }
    }
}

/// One monitor pass: refresh the metric snapshot, then queue a schedule
/// for every trigger whose gate passes and that is not already queued.
async fn monitor_cycle(
    engine: &TriggerEngine,
    scheduler: &IntelligentScheduler,
    metrics: &dyn MetricsSource,
    timeout_seconds: u64,
) {
    let Some(snapshot) = bounded_snapshot(metrics, timeout_seconds).await else {
        return;
    };
    engine.record_metrics(snapshot.clone());
    let ctx = ExecutionContext::automatic(snapshot);

    for trigger in engine.triggers() {
        if scheduler.has_schedule(&trigger.trigger_id) {
            continue;
        }
        match engine.should_execute(&trigger.trigger_id, &ctx) {
            Ok(true) => {
                let decision = scheduler.schedule_trigger(&trigger);
                debug!(
                    trigger_id = %trigger.trigger_id,
                    scheduled_time = %decision.scheduled_time,
                    "Trigger queued"
                );
            }
            Ok(false) => {}
            Err(error) => {
                warn!(trigger_id = %trigger.trigger_id, error = %error, "Gate evaluation failed");
            }
        }
    }
}

async fn dispatch_worker(
    engine: Arc<TriggerEngine>,
    scheduler: Arc<IntelligentScheduler>,
    metrics: Arc<dyn MetricsSource>,
    interval_seconds: u64,
    timeout_seconds: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = interval_skipping(interval_seconds);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                dispatch_cycle(&engine, &scheduler, metrics.as_ref(), timeout_seconds).await;
            }
            _ = shutdown.changed() => {
                debug!("Dispatcher stopping");
                break;
            }
        }
    }
}

/// One dispatcher pass: execute every due schedule and feed the outcome
/// back into pattern learning. One trigger's failure never blocks the
/// rest of the batch.
async fn dispatch_cycle(
    engine: &TriggerEngine,
    scheduler: &IntelligentScheduler,
    metrics: &dyn MetricsSource,
    timeout_seconds: u64,
) {
    if scheduler.active_schedules().is_empty() {
        return;
    }

    // Fetch before taking anything due, so a slow or failing metrics
    // source leaves the schedules queued for the next pass.
    let Some(snapshot) = bounded_snapshot(metrics, timeout_seconds).await else {
        return;
    };
    let resource_usage = snapshot.get("cpu_usage").copied().unwrap_or(50.0);
    let ctx = ExecutionContext::automatic(snapshot);

    let due = scheduler.take_due(Utc::now());

    for decision in due {
        match engine.execute_trigger(&decision.trigger_id, &ctx).await {
            Ok(Some(execution)) => {
                scheduler.record_execution(ExecutionSample {
                    started_at: execution.started_at,
                    duration_ms: execution.duration_ms().unwrap_or(0.0),
                    success: execution.status == ExecutionStatus::Succeeded,
                    resource_usage,
                });
            }
            Ok(None) => {
                debug!(trigger_id = %decision.trigger_id, "Gate rejected at dispatch time");
            }
            Err(error) => {
                warn!(trigger_id = %decision.trigger_id, error = %error, "Dispatch failed");
            }
        }
    }
}

async fn sweep_worker(
    scheduler: Arc<IntelligentScheduler>,
    interval_seconds: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = interval_skipping(interval_seconds);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                scheduler.prune_patterns(Utc::now());
            }
            _ = shutdown.changed() => {
                debug!("Pattern sweep stopping");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryFlagStore, InMemoryMetrics, RecordingExecutor};
    use crate::domain::{
        ComparisonOp, Implementation, RolloutAction, TriggerCondition, TriggerConfig,
        TriggerPriority, TriggerType,
    };
    use crate::service::anomaly::{AnomalyConfig, AnomalyDetector};
    use crate::service::patterns::{PatternConfig, PatternLearner};
    use crate::service::scheduler::{Day, HourRange, SchedulerConfig};
    use crate::service::{RolloutConfig, SubscriberRegistry, TriggerEngineConfig};

    fn always_open_windows() -> Vec<HourRange> {
        vec![HourRange {
            days: vec![
                Day::Mon,
                Day::Tue,
                Day::Wed,
                Day::Thu,
                Day::Fri,
                Day::Sat,
                Day::Sun,
            ],
            start_hour: 0,
            end_hour: 24,
        }]
    }

    fn cpu_trigger() -> TriggerConfig {
        TriggerConfig {
            trigger_id: "cpu-guard".to_string(),
            name: "CPU guard".to_string(),
            trigger_type: TriggerType::ThresholdBased,
            priority: TriggerPriority::Critical,
            enabled: true,
            conditions: vec![TriggerCondition {
                metric: "cpu_usage".to_string(),
                operator: ComparisonOp::Gt,
                threshold: 90.0,
                duration_seconds: None,
            }],
            schedule: None,
            target_components: vec!["parser".to_string()],
            action: RolloutAction {
                implementation: Implementation::Baseline,
                percentage: 0.0,
            },
            cooldown_seconds: 3600,
            max_executions_per_hour: 4,
            execution_count: 0,
            success_count: 0,
            failure_count: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_and_dispatch_fire_a_due_trigger() {
        let metrics = Arc::new(InMemoryMetrics::new());
        metrics.set_metric("cpu_usage", 95.0);
        let executor = Arc::new(RecordingExecutor::new());
        let events = Arc::new(SubscriberRegistry::new());

        let engine = Arc::new(TriggerEngine::new(
            TriggerEngineConfig::default(),
            executor.clone(),
            events.clone(),
        ));
        engine.add_trigger(cpu_trigger()).unwrap();

        let mut scheduler_config = SchedulerConfig::default();
        scheduler_config.peak_periods = vec![];
        scheduler_config.scheduling_windows = always_open_windows();
        let scheduler = Arc::new(IntelligentScheduler::new(
            scheduler_config,
            Arc::new(PatternLearner::new(PatternConfig::default())),
            events.clone(),
        ));

        let controller = Arc::new(RolloutController::new(
            RolloutConfig::default(),
            metrics.clone(),
            Arc::new(InMemoryFlagStore::new()),
            Arc::new(AnomalyDetector::new(AnomalyConfig::default())),
            events,
        ));

        let runtime = Runtime::new(
            RuntimeConfig {
                evaluation_interval_seconds: 1,
                trigger_monitor_interval_seconds: 1,
                dispatch_interval_seconds: 1,
                pattern_sweep_interval_seconds: 1,
                external_timeout_seconds: 10,
                shutdown_join_seconds: 5,
            },
            controller,
            engine.clone(),
            scheduler,
            metrics,
        );

        runtime.start();
        // Paused time auto-advances while every task is idle.
        tokio::time::sleep(Duration::from_secs(30)).await;
        runtime.shutdown().await;

        assert!(!executor.calls().is_empty());
        assert_eq!(engine.trigger("cpu-guard").unwrap().execution_count, 1);
    }

    /// Metrics source whose calls never resolve.
    struct StalledMetrics;

    #[async_trait::async_trait]
    impl MetricsSource for StalledMetrics {
        async fn performance_summary(
            &self,
            _component: &str,
        ) -> crate::error::Result<Option<crate::domain::PerformanceSummary>> {
            std::future::pending().await
        }

        async fn metric_snapshot(&self) -> crate::error::Result<MetricSnapshot> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_metrics_source_does_not_wedge_shutdown() {
        let metrics: Arc<dyn MetricsSource> = Arc::new(StalledMetrics);
        let events = Arc::new(SubscriberRegistry::new());
        let engine = Arc::new(TriggerEngine::new(
            TriggerEngineConfig::default(),
            Arc::new(RecordingExecutor::new()),
            events.clone(),
        ));
        let scheduler = Arc::new(IntelligentScheduler::new(
            SchedulerConfig::default(),
            Arc::new(PatternLearner::new(PatternConfig::default())),
            events.clone(),
        ));
        let controller = Arc::new(RolloutController::new(
            RolloutConfig::default(),
            Arc::new(InMemoryMetrics::new()),
            Arc::new(InMemoryFlagStore::new()),
            Arc::new(AnomalyDetector::new(AnomalyConfig::default())),
            events,
        ));
        let runtime = Runtime::new(
            RuntimeConfig {
                evaluation_interval_seconds: 1,
                trigger_monitor_interval_seconds: 1,
                dispatch_interval_seconds: 1,
                pattern_sweep_interval_seconds: 1,
                external_timeout_seconds: 1,
                shutdown_join_seconds: 5,
            },
            controller,
            engine,
            scheduler,
            metrics,
        );

        runtime.start();
        tokio::time::sleep(Duration::from_secs(3)).await;

        // A monitor pass may be mid-call; the timeout bound lets it
        // escape, so the join finishes well inside the join window.
        let started = tokio::time::Instant::now();
        runtime.shutdown().await;
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn shutdown_without_start_is_a_no_op() {
        let metrics = Arc::new(InMemoryMetrics::new());
        let events = Arc::new(SubscriberRegistry::new());
        let engine = Arc::new(TriggerEngine::new(
            TriggerEngineConfig::default(),
            Arc::new(RecordingExecutor::new()),
            events.clone(),
        ));
        let scheduler = Arc::new(IntelligentScheduler::new(
            SchedulerConfig::default(),
            Arc::new(PatternLearner::new(PatternConfig::default())),
            events.clone(),
        ));
        let controller = Arc::new(RolloutController::new(
            RolloutConfig::default(),
            metrics.clone(),
            Arc::new(InMemoryFlagStore::new()),
            Arc::new(AnomalyDetector::new(AnomalyConfig::default())),
            events,
        ));
        let runtime = Runtime::new(
            RuntimeConfig::default(),
            controller,
            engine,
            scheduler,
            metrics,
        );
        runtime.shutdown().await;
    }
}
