//! Load pattern learning from execution history.
//!
//! Executions are bucketed by (hour-of-day, day-of-week) of their start
//! time. Once a bucket has enough samples inside the retention window
//! its averages become a `PerformancePattern` usable for prediction.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{PatternKey, PerformancePattern};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternConfig {
    /// Samples required before a bucket is used for prediction.
    #[serde(default = "default_min_samples")]
    pub min_samples: u32,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

fn default_min_samples() -> u32 {
    10
}

fn default_retention_days() -> i64 {
    30
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            min_samples: default_min_samples(),
            retention_days: default_retention_days(),
        }
    }
}

/// One observed execution, as fed back by the dispatcher.
#[derive(Debug, Clone)]
pub struct ExecutionSample {
    pub started_at: DateTime<Utc>,
    pub duration_ms: f64,
    pub success: bool,
    /// Resource usage observed around the execution, 0-100.
    pub resource_usage: f64,
}

/// Derives `PerformancePattern`s from execution history.
pub struct PatternLearner {
    config: PatternConfig,
    samples: Mutex<HashMap<PatternKey, VecDeque<ExecutionSample>>>,
    patterns: RwLock<HashMap<PatternKey, PerformancePattern>>,
}

impl PatternLearner {
    pub fn new(config: PatternConfig) -> Self {
        Self {
            config,
            samples: Mutex::new(HashMap::new()),
            patterns: RwLock::new(HashMap::new()),
        }
    }

    /// Record an execution and recompute its bucket if it has enough
    /// samples.
    pub fn observe(&self, sample: ExecutionSample) {
        let key = PatternKey::from_datetime(sample.started_at);
        let bucket: Vec<ExecutionSample> = {
            let mut samples = self.samples.lock();
            let bucket = samples.entry(key).or_default();
            bucket.push_back(sample);
            // Cap per-bucket history; retention pruning handles age.
            while bucket.len() > 1000 {
                bucket.pop_front();
            }
            bucket.iter().cloned().collect()
        };

        if (bucket.len() as u32) < self.config.min_samples {
            return;
        }
        let pattern = self.compute(key, &bucket);
        debug!(
            hour = key.hour,
            weekday = key.weekday,
            samples = pattern.sample_count,
            confidence = pattern.confidence,
            "Pattern updated"
        );
        self.patterns.write().insert(key, pattern);
    }

    /// Pattern for a bucket, if it has reached `min_samples`.
    pub fn pattern_for(&self, key: PatternKey) -> Option<PerformancePattern> {
        self.patterns.read().get(&key).cloned()
    }

    pub fn patterns(&self) -> Vec<PerformancePattern> {
        self.patterns.read().values().cloned().collect()
    }

    /// Drop samples older than the retention window and recompute or
    /// retire the affected buckets.
    pub fn prune(&self, now: DateTime<Utc>) {
        let cutoff = now - Duration::days(self.config.retention_days);
        let mut recompute: Vec<(PatternKey, Vec<ExecutionSample>)> = Vec::new();
        {
            let mut samples = self.samples.lock();
            samples.retain(|key, bucket| {
                let before = bucket.len();
                bucket.retain(|s| s.started_at >= cutoff);
                if bucket.len() != before {
                    recompute.push((*key, bucket.iter().cloned().collect()));
                }
                !bucket.is_empty()
            });
        }

        let mut patterns = self.patterns.write();
        for (key, bucket) in recompute {
            if (bucket.len() as u32) < self.config.min_samples {
                patterns.remove(&key);
            } else {
                patterns.insert(key, self.compute(key, &bucket));
            }
        }
    }

    fn compute(&self, key: PatternKey, bucket: &[ExecutionSample]) -> PerformancePattern {
        let n = bucket.len() as f64;
        let successes = bucket.iter().filter(|s| s.success).count() as f64;
        let confidence =
            (bucket.len() as f64 / (2.0 * self.config.min_samples as f64)).min(1.0);
        PerformancePattern {
            key,
            avg_execution_time_ms: bucket.iter().map(|s| s.duration_ms).sum::<f64>() / n,
            avg_success_rate: successes / n,
            avg_resource_usage: bucket.iter().map(|s| s.resource_usage).sum::<f64>() / n,
            sample_count: bucket.len() as u32,
            confidence,
            last_updated: Utc::now(),
        }
    }
}
