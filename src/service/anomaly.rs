//! Statistical anomaly detection over rolling metric windows.
//!
//! Three detectors run per recorded point: a z-score check against the
//! window mean, an error-rate spike check, and a latency degradation
//! check. Flags feed the rollout controller's rollback decision and the
//! scheduler's load prediction.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Detector tunables, all exposed in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_z_threshold")]
    pub z_threshold: f64,
    /// Z-score above which severity escalates to high.
    #[serde(default = "default_high_z_threshold")]
    pub high_z_threshold: f64,
    /// Recent error mean must exceed this multiple of the prior mean.
    #[serde(default = "default_error_spike_ratio")]
    pub error_spike_ratio: f64,
    /// Relative latency increase treated as degradation (0.2 = 20%).
    #[serde(default = "default_degradation_threshold")]
    pub performance_degradation_threshold: f64,
}

fn default_window_size() -> usize {
    20
}

fn default_z_threshold() -> f64 {
    2.5
}

fn default_high_z_threshold() -> f64 {
    3.5
}

fn default_error_spike_ratio() -> f64 {
    3.0
}

fn default_degradation_threshold() -> f64 {
    0.2
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            z_threshold: default_z_threshold(),
            high_z_threshold: default_high_z_threshold(),
            error_spike_ratio: default_error_spike_ratio(),
            performance_degradation_threshold: default_degradation_threshold(),
        }
    }
}

/// How a metric is interpreted by the type-specific detectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Latency,
    ErrorRate,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AnomalySeverity {
    Medium,
    High,
}

#[derive(Debug, Clone)]
pub enum AnomalyKind {
    /// Latest point deviates from the window mean.
    ZScore { z: f64 },
    /// Recent error mean exceeds the prior mean by the spike ratio.
    ErrorSpike { recent_mean: f64, prior_mean: f64 },
    /// Trailing latency mean exceeds the leading mean.
    LatencyDegradation { recent_mean: f64, prior_mean: f64 },
}

#[derive(Debug, Clone)]
pub struct Anomaly {
    pub metric: String,
    pub kind: AnomalyKind,
    pub severity: AnomalySeverity,
    pub latest: f64,
    pub detected_at: DateTime<Utc>,
}

/// Z-score and trend-based detector over rolling windows, one window
/// per metric name.
pub struct AnomalyDetector {
    config: AnomalyConfig,
    windows: RwLock<HashMap<String, VecDeque<f64>>>,
    /// When the most recent high-severity anomaly was detected.
    last_high: RwLock<Option<DateTime<Utc>>>,
}

// Minimum points before the statistical checks are meaningful.
const MIN_POINTS_Z: usize = 5;
const MIN_POINTS_TREND: usize = 10;
const SPIKE_RECENT_POINTS: usize = 5;

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        Self {
            config,
            windows: RwLock::new(HashMap::new()),
            last_high: RwLock::new(None),
        }
    }

    /// Record a point and return any anomalies it surfaces.
    pub fn record(&self, metric: &str, kind: MetricKind, value: f64) -> Vec<Anomaly> {
        let window = {
            let mut windows = self.windows.write();
            let window = windows.entry(metric.to_string()).or_default();
            window.push_back(value);
            while window.len() > self.config.window_size {
                window.pop_front();
            }
            window.iter().copied().collect::<Vec<f64>>()
        };

        let mut anomalies = Vec::new();
        let now = Utc::now();

        if let Some(z) = self.z_score(&window) {
            if z.abs() > self.config.z_threshold {
                let severity = if z.abs() > self.config.high_z_threshold {
                    AnomalySeverity::High
                } else {
                    AnomalySeverity::Medium
                };
                debug!(metric, z, "Z-score anomaly");
                anomalies.push(Anomaly {
                    metric: metric.to_string(),
                    kind: AnomalyKind::ZScore { z },
                    severity,
                    latest: value,
                    detected_at: now,
                });
            }
        }

        match kind {
            MetricKind::ErrorRate => {
                if let Some((recent_mean, prior_mean)) = self.split_means(&window, SPIKE_RECENT_POINTS)
                {
                    if prior_mean > 0.0 && recent_mean > self.config.error_spike_ratio * prior_mean {
                        anomalies.push(Anomaly {
                            metric: metric.to_string(),
                            kind: AnomalyKind::ErrorSpike {
                                recent_mean,
                                prior_mean,
                            },
                            severity: AnomalySeverity::High,
                            latest: value,
                            detected_at: now,
                        });
                    }
                }
            }
            MetricKind::Latency => {
                if window.len() >= MIN_POINTS_TREND {
                    let half = window.len() / 2;
                    let leading = mean(&window[..half]);
                    let trailing = mean(&window[half..]);
                    if leading > 0.0
                        && trailing
                            > leading * (1.0 + self.config.performance_degradation_threshold)
                    {
                        anomalies.push(Anomaly {
                            metric: metric.to_string(),
                            kind: AnomalyKind::LatencyDegradation {
                                recent_mean: trailing,
                                prior_mean: leading,
                            },
                            severity: AnomalySeverity::Medium,
                            latest: value,
                            detected_at: now,
                        });
                    }
                }
            }
            MetricKind::Other => {}
        }

        if anomalies.iter().any(|a| a.severity == AnomalySeverity::High) {
            *self.last_high.write() = Some(now);
        }

        anomalies
    }

    /// Detection time of the most recent high-severity anomaly, if any.
    pub fn last_high_severity(&self) -> Option<DateTime<Utc>> {
        *self.last_high.read()
    }

    /// Drop the window for a metric (administrative reset).
    pub fn reset_metric(&self, metric: &str) {
        self.windows.write().remove(metric);
    }

    fn z_score(&self, window: &[f64]) -> Option<f64> {
        if window.len() < MIN_POINTS_Z {
            return None;
        }
        let latest = *window.last()?;
        let m = mean(window);
        let variance = window.iter().map(|v| (v - m).powi(2)).sum::<f64>() / window.len() as f64;
        let stdev = variance.sqrt();
        if stdev == 0.0 {
            return None;
        }
        Some((latest - m) / stdev)
    }

    /// Mean of the last `recent` points and of the points before them.
    fn split_means(&self, window: &[f64], recent: usize) -> Option<(f64, f64)> {
        if window.len() < MIN_POINTS_TREND {
            return None;
        }
        let split = window.len() - recent;
        Some((mean(&window[split..]), mean(&window[..split])))
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> AnomalyDetector {
        AnomalyDetector::new(AnomalyConfig::default())
    }

    #[test]
    fn flat_series_is_quiet() {
        let d = detector();
        for _ in 0..19 {
            assert!(d.record("latency", MetricKind::Latency, 10.0).is_empty());
        }
    }

    #[test]
    fn outlier_after_flat_series_flags_z_anomaly() {
        let d = detector();
        for _ in 0..9 {
            d.record("latency", MetricKind::Other, 10.0);
        }
        // Series [10 x9, 50]: mean 14, population stdev 12, z = 3.0.
        let anomalies = d.record("latency", MetricKind::Other, 50.0);
        let z = anomalies
            .iter()
            .find_map(|a| match a.kind {
                AnomalyKind::ZScore { z } => Some(z),
                _ => None,
            })
            .expect("expected z-score anomaly");
        assert!((z - 3.0).abs() < 1e-9);
        assert_eq!(anomalies[0].severity, AnomalySeverity::Medium);
    }

    #[test]
    fn error_rate_spike_is_flagged_high() {
        let d = detector();
        for _ in 0..10 {
            d.record("error_rate", MetricKind::ErrorRate, 0.01);
        }
        let mut spike = Vec::new();
        for _ in 0..5 {
            spike = d.record("error_rate", MetricKind::ErrorRate, 0.2);
        }
        assert!(spike
            .iter()
            .any(|a| matches!(a.kind, AnomalyKind::ErrorSpike { .. })));
        assert!(spike
            .iter()
            .any(|a| a.severity == AnomalySeverity::High));
    }

    #[test]
    fn high_severity_detection_time_is_remembered() {
        let d = detector();
        assert!(d.last_high_severity().is_none());
        for _ in 0..10 {
            d.record("error_rate", MetricKind::ErrorRate, 0.01);
        }
        for _ in 0..5 {
            d.record("error_rate", MetricKind::ErrorRate, 0.2);
        }
        let flagged_at = d.last_high_severity().expect("spike should be remembered");
        assert!(Utc::now() - flagged_at < chrono::Duration::seconds(5));
    }

    #[test]
    fn latency_degradation_is_flagged() {
        let d = detector();
        for _ in 0..10 {
            d.record("latency", MetricKind::Latency, 100.0);
        }
        let mut last = Vec::new();
        for _ in 0..10 {
            last = d.record("latency", MetricKind::Latency, 160.0);
        }
        assert!(last
            .iter()
            .any(|a| matches!(a.kind, AnomalyKind::LatencyDegradation { .. })));
    }

    #[test]
    fn reset_clears_the_window() {
        let d = detector();
        for _ in 0..9 {
            d.record("latency", MetricKind::Other, 10.0);
        }
        d.reset_metric("latency");
        // Too few points after reset for any statistics.
        assert!(d.record("latency", MetricKind::Other, 50.0).is_empty());
    }
}
