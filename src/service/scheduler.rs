//! Intelligent scheduling of queued trigger actions.
//!
//! Picks the best execution time for a fireable trigger: avoids
//! configured peak periods (except for critical-priority work), prefers
//! scheduling windows, and otherwise scores candidate slots over the
//! next hours using learned load patterns.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    LoadLevel, PatternKey, SchedulingDecision, TriggerConfig, TriggerPriority,
};

use super::anomaly::AnomalyDetector;
use super::events::{Event, SubscriberRegistry};
use super::patterns::{ExecutionSample, PatternLearner};

/// Day of week for peak/window configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Day {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl Day {
    /// Days from Monday, matching `chrono::Weekday::num_days_from_monday`.
    pub fn number(self) -> u32 {
        match self {
            Self::Mon => 0,
            Self::Tue => 1,
            Self::Wed => 2,
            Self::Thu => 3,
            Self::Fri => 4,
            Self::Sat => 5,
            Self::Sun => 6,
        }
    }
}

/// A recurring day-of-week + hour range. Hours are `[start, end)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HourRange {
    pub days: Vec<Day>,
    pub start_hour: u32,
    pub end_hour: u32,
}

impl HourRange {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        let weekday = t.weekday().num_days_from_monday();
        let hour = t.hour();
        self.days.iter().any(|d| d.number() == weekday)
            && hour >= self.start_hour
            && hour < self.end_hour
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Assumed high-load ranges, avoided for non-critical work.
    #[serde(default = "default_peak_periods")]
    pub peak_periods: Vec<HourRange>,
    /// Preferred execution ranges; inside one, execute immediately.
    #[serde(default)]
    pub scheduling_windows: Vec<HourRange>,
    #[serde(default = "default_slot_search_hours")]
    pub slot_search_hours: i64,
    #[serde(default = "default_slot_step_minutes")]
    pub slot_step_minutes: i64,
    /// Delay for critical triggers arriving inside a peak period.
    #[serde(default = "default_critical_peak_delay")]
    pub critical_peak_delay_seconds: i64,
    /// Forward search bound when deferring out of a peak period.
    #[serde(default = "default_peak_defer_hours")]
    pub peak_defer_search_hours: i64,
    /// Patterns below this confidence fall back to the static heuristic.
    #[serde(default = "default_confidence_threshold")]
    pub pattern_confidence_threshold: f64,
    /// Resource-usage classification thresholds, 0-100.
    #[serde(default = "default_usage_low")]
    pub usage_low_below: f64,
    #[serde(default = "default_usage_medium")]
    pub usage_medium_below: f64,
    #[serde(default = "default_usage_high")]
    pub usage_high_below: f64,
    /// Static heuristic: business hours predict medium load.
    #[serde(default = "default_business_start")]
    pub business_start_hour: u32,
    #[serde(default = "default_business_end")]
    pub business_end_hour: u32,
    /// Slot score weights.
    #[serde(default = "default_priority_factor")]
    pub priority_weight_factor: f64,
    #[serde(default = "default_hours_ahead_penalty")]
    pub hours_ahead_penalty: f64,
    /// Duration estimate when no pattern is available, in seconds.
    #[serde(default = "default_estimated_duration")]
    pub default_duration_seconds: u64,
    /// How long a high-severity anomaly keeps near-term load escalated.
    #[serde(default = "default_anomaly_hold")]
    pub anomaly_load_hold_seconds: i64,
}

fn default_peak_periods() -> Vec<HourRange> {
    vec![HourRange {
        days: vec![Day::Mon, Day::Tue, Day::Wed, Day::Thu, Day::Fri],
        start_hour: 9,
        end_hour: 17,
    }]
}

fn default_slot_search_hours() -> i64 {
    12
}

fn default_slot_step_minutes() -> i64 {
    15
}

fn default_critical_peak_delay() -> i64 {
    60
}

fn default_peak_defer_hours() -> i64 {
    24
}

fn default_confidence_threshold() -> f64 {
    0.7
}

fn default_usage_low() -> f64 {
    30.0
}

fn default_usage_medium() -> f64 {
    60.0
}

fn default_usage_high() -> f64 {
    85.0
}

fn default_business_start() -> u32 {
    8
}

fn default_business_end() -> u32 {
    18
}

fn default_priority_factor() -> f64 {
    0.1
}

fn default_hours_ahead_penalty() -> f64 {
    0.05
}

fn default_estimated_duration() -> u64 {
    300
}

fn default_anomaly_hold() -> i64 {
    600
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            peak_periods: default_peak_periods(),
            scheduling_windows: Vec::new(),
            slot_search_hours: default_slot_search_hours(),
            slot_step_minutes: default_slot_step_minutes(),
            critical_peak_delay_seconds: default_critical_peak_delay(),
            peak_defer_search_hours: default_peak_defer_hours(),
            pattern_confidence_threshold: default_confidence_threshold(),
            usage_low_below: default_usage_low(),
            usage_medium_below: default_usage_medium(),
            usage_high_below: default_usage_high(),
            business_start_hour: default_business_start(),
            business_end_hour: default_business_end(),
            priority_weight_factor: default_priority_factor(),
            hours_ahead_penalty: default_hours_ahead_penalty(),
            default_duration_seconds: default_estimated_duration(),
            anomaly_load_hold_seconds: default_anomaly_hold(),
        }
    }
}

/// Decides when pending trigger actions should execute.
///
/// Owns the active schedules and, through the pattern learner, the
/// performance patterns; trigger and component state are only read.
pub struct IntelligentScheduler {
    config: SchedulerConfig,
    patterns: Arc<PatternLearner>,
    anomalies: Option<Arc<AnomalyDetector>>,
    schedules: RwLock<HashMap<String, SchedulingDecision>>,
    events: Arc<SubscriberRegistry>,
}

impl IntelligentScheduler {
    pub fn new(
        config: SchedulerConfig,
        patterns: Arc<PatternLearner>,
        events: Arc<SubscriberRegistry>,
    ) -> Self {
        Self {
            config,
            patterns,
            anomalies: None,
            schedules: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Let load prediction see anomaly detections: near-term slots are
    /// escalated while a recent high-severity anomaly is active.
    pub fn with_anomaly_feed(mut self, detector: Arc<AnomalyDetector>) -> Self {
        self.anomalies = Some(detector);
        self
    }

    /// Compute the best execution time for a fireable trigger and
    /// register the schedule.
    pub fn schedule_trigger(&self, trigger: &TriggerConfig) -> SchedulingDecision {
        self.schedule_trigger_at(trigger, Utc::now())
    }

    pub fn schedule_trigger_at(
        &self,
        trigger: &TriggerConfig,
        now: DateTime<Utc>,
    ) -> SchedulingDecision {
        let decision = self.decide(trigger, now);
        self.schedules
            .write()
            .insert(trigger.trigger_id.clone(), decision.clone());
        self.events.publish_all(Event::ScheduleCreated {
            trigger_id: decision.trigger_id.clone(),
            scheduled_time: decision.scheduled_time,
            predicted_load: decision.predicted_load,
        });
        decision
    }

    fn decide(&self, trigger: &TriggerConfig, now: DateTime<Utc>) -> SchedulingDecision {
        let mut reasoning = vec![format!("priority: {}", trigger.priority.as_str())];

        let (scheduled_time, priority_score) = if self.in_peak(now) {
            if trigger.priority == TriggerPriority::Critical {
                let t = now + Duration::seconds(self.config.critical_peak_delay_seconds);
                reasoning.push(format!(
                    "inside peak period: critical priority executes in {}s",
                    self.config.critical_peak_delay_seconds
                ));
                (t, self.immediate_score(t, trigger.priority))
            } else {
                let t = self.next_non_peak(now);
                reasoning
                    .push("inside peak period: deferred to next non-peak time (peak avoidance applied)".to_string());
                (t, self.immediate_score(t, trigger.priority))
            }
        } else if self.in_window(now) {
            reasoning.push("inside scheduling window: executing immediately".to_string());
            (now, self.immediate_score(now, trigger.priority))
        } else {
            let (t, score) = self.best_slot(now, trigger.priority);
            reasoning.push(format!(
                "best slot in next {}h search",
                self.config.slot_search_hours
            ));
            (t, score)
        };

        let (predicted_load, from_pattern) = self.predict_load(scheduled_time);
        reasoning.push(format!(
            "scheduled for {} (predicted load: {}{})",
            scheduled_time.format("%Y-%m-%d %H:%M UTC"),
            predicted_load.as_str(),
            if from_pattern {
                ", from learned pattern"
            } else {
                ", heuristic"
            }
        ));

        let estimated_duration_ms = self
            .patterns
            .pattern_for(PatternKey::from_datetime(scheduled_time))
            .map(|p| p.avg_execution_time_ms)
            .unwrap_or(self.config.default_duration_seconds as f64 * 1000.0);

        SchedulingDecision {
            id: Uuid::new_v4(),
            trigger_id: trigger.trigger_id.clone(),
            scheduled_time,
            estimated_duration_ms,
            priority_score,
            predicted_load,
            reasoning,
            alternatives: self.alternatives(now),
        }
    }

    /// Predict load for a future timestamp.
    ///
    /// Returns the level and whether it came from a learned pattern.
    pub fn predict_load(&self, t: DateTime<Utc>) -> (LoadLevel, bool) {
        if let Some(pattern) = self.patterns.pattern_for(PatternKey::from_datetime(t)) {
            if pattern.confidence > self.config.pattern_confidence_threshold {
                let level = self.classify_usage(pattern.avg_resource_usage);
                return (self.escalate_for_anomaly(t, level), true);
            }
        }
        // Static time-of-day fallback.
        let level = if self.in_peak(t) {
            LoadLevel::High
        } else if t.hour() >= self.config.business_start_hour
            && t.hour() < self.config.business_end_hour
        {
            LoadLevel::Medium
        } else {
            LoadLevel::Low
        };
        (self.escalate_for_anomaly(t, level), false)
    }

    /// Bump Low/Medium predictions to High for slots inside the hold
    /// window after a high-severity anomaly detection.
    fn escalate_for_anomaly(&self, t: DateTime<Utc>, level: LoadLevel) -> LoadLevel {
        let Some(detector) = &self.anomalies else {
            return level;
        };
        let Some(flagged_at) = detector.last_high_severity() else {
            return level;
        };
        let hold_until = flagged_at + Duration::seconds(self.config.anomaly_load_hold_seconds);
        if t >= flagged_at
            && t <= hold_until
            && matches!(level, LoadLevel::Low | LoadLevel::Medium)
        {
            return LoadLevel::High;
        }
        level
    }

    pub fn in_peak(&self, t: DateTime<Utc>) -> bool {
        self.config.peak_periods.iter().any(|p| p.contains(t))
    }

    fn in_window(&self, t: DateTime<Utc>) -> bool {
        self.config.scheduling_windows.iter().any(|w| w.contains(t))
    }

    fn classify_usage(&self, usage: f64) -> LoadLevel {
        if usage < self.config.usage_low_below {
            LoadLevel::Low
        } else if usage < self.config.usage_medium_below {
            LoadLevel::Medium
        } else if usage < self.config.usage_high_below {
            LoadLevel::High
        } else {
            LoadLevel::Critical
        }
    }

    /// Linear forward search at hour granularity for the next time
    /// outside every peak period.
    fn next_non_peak(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        for hours in 1..=self.config.peak_defer_search_hours {
            let candidate = now + Duration::hours(hours);
            if !self.in_peak(candidate) {
                return candidate;
            }
        }
        now + Duration::hours(self.config.peak_defer_search_hours)
    }

    /// Score candidate slots over the search horizon and pick the best.
    ///
    /// Peak slots are excluded outright for non-critical priorities;
    /// ties break toward the earliest slot.
    fn best_slot(&self, now: DateTime<Utc>, priority: TriggerPriority) -> (DateTime<Utc>, f64) {
        let steps = self.config.slot_search_hours * 60 / self.config.slot_step_minutes;
        let mut best: Option<(DateTime<Utc>, f64)> = None;

        for step in 0..=steps {
            let candidate = now + Duration::minutes(step * self.config.slot_step_minutes);
            if priority != TriggerPriority::Critical && self.in_peak(candidate) {
                continue;
            }
            let (load, _) = self.predict_load(candidate);
            let hours_ahead = (candidate - now).num_minutes() as f64 / 60.0;
            let score = load.slot_score() + priority.weight() * self.config.priority_weight_factor
                - hours_ahead * self.config.hours_ahead_penalty;
            if best.map_or(true, |(_, b)| score > b) {
                best = Some((candidate, score));
            }
        }

        best.unwrap_or_else(|| {
            // Every slot in the horizon was peak; defer past it.
            let t = self.next_non_peak(now + Duration::hours(self.config.slot_search_hours));
            (t, self.immediate_score(t, priority))
        })
    }

    fn immediate_score(&self, t: DateTime<Utc>, priority: TriggerPriority) -> f64 {
        let (load, _) = self.predict_load(t);
        load.slot_score() + priority.weight() * self.config.priority_weight_factor
    }

    /// Alternative execution times for observability: next hour, the
    /// coming night, and the weekend.
    fn alternatives(&self, now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let next_hour = now + Duration::hours(1);

        let tonight = (now + Duration::days(1))
            .with_hour(2)
            .and_then(|t| t.with_minute(0))
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(now + Duration::days(1));

        let mut weekend = now;
        while weekend.weekday().num_days_from_monday() < 5 {
            weekend += Duration::days(1);
        }
        let weekend = weekend
            .with_hour(2)
            .and_then(|t| t.with_minute(0))
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(weekend);

        vec![next_hour, tonight, weekend]
    }

    /// Whether a trigger already has a pending schedule.
    pub fn has_schedule(&self, trigger_id: &str) -> bool {
        self.schedules.read().contains_key(trigger_id)
    }

    pub fn active_schedules(&self) -> Vec<SchedulingDecision> {
        self.schedules.read().values().cloned().collect()
    }

    /// Remove and return every schedule whose time has arrived.
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<SchedulingDecision> {
        let mut schedules = self.schedules.write();
        let due_ids: Vec<String> = schedules
            .iter()
            .filter(|(_, d)| d.scheduled_time <= now)
            .map(|(id, _)| id.clone())
            .collect();
        due_ids
            .into_iter()
            .filter_map(|id| schedules.remove(&id))
            .collect()
    }

    pub fn discard(&self, trigger_id: &str) {
        self.schedules.write().remove(trigger_id);
    }

    /// Feed an execution outcome back into pattern learning.
    pub fn record_execution(&self, sample: ExecutionSample) {
        self.patterns.observe(sample);
    }

    /// Periodic retention sweep over learned patterns.
    pub fn prune_patterns(&self, now: DateTime<Utc>) {
        self.patterns.prune(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Implementation, RolloutAction, TriggerType};
    use crate::service::patterns::PatternConfig;
    use chrono::TimeZone;

    fn scheduler() -> IntelligentScheduler {
        IntelligentScheduler::new(
            SchedulerConfig::default(),
            Arc::new(PatternLearner::new(PatternConfig::default())),
            Arc::new(SubscriberRegistry::new()),
        )
    }

    fn trigger(priority: TriggerPriority) -> TriggerConfig {
        TriggerConfig {
            trigger_id: "t1".to_string(),
            name: "test".to_string(),
            trigger_type: TriggerType::ThresholdBased,
            priority,
            enabled: true,
            conditions: vec![],
            schedule: None,
            target_components: vec!["parser".to_string()],
            action: RolloutAction {
                implementation: Implementation::NewImpl,
                percentage: 50.0,
            },
            cooldown_seconds: 0,
            max_executions_per_hour: 100,
            execution_count: 0,
            success_count: 0,
            failure_count: 0,
        }
    }

    fn monday_peak() -> DateTime<Utc> {
        // 2026-08-17 is a Monday; 10:00 is inside the default 9-17 peak.
        Utc.with_ymd_and_hms(2026, 8, 17, 10, 0, 0).unwrap()
    }

    fn saturday_night() -> DateTime<Utc> {
        // 2026-08-22 is a Saturday; never peak with defaults.
        Utc.with_ymd_and_hms(2026, 8, 22, 1, 0, 0).unwrap()
    }

    #[test]
    fn critical_in_peak_runs_within_a_minute() {
        let s = scheduler();
        let now = monday_peak();
        let decision = s.schedule_trigger_at(&trigger(TriggerPriority::Critical), now);
        assert!(decision.scheduled_time <= now + Duration::seconds(60));
    }

    #[test]
    fn non_critical_in_peak_is_deferred_out_of_peak() {
        let s = scheduler();
        let now = monday_peak();
        let decision = s.schedule_trigger_at(&trigger(TriggerPriority::Medium), now);
        assert!(decision.scheduled_time > now);
        assert!(!s.in_peak(decision.scheduled_time));
        assert!(decision
            .reasoning
            .iter()
            .any(|r| r.contains("peak avoidance applied")));
    }

    #[test]
    fn slot_search_never_lands_in_peak_for_non_critical() {
        let s = scheduler();
        // Monday 05:00: not peak, but the 12h horizon crosses 9-17 peak.
        let now = Utc.with_ymd_and_hms(2026, 8, 17, 5, 0, 0).unwrap();
        let decision = s.schedule_trigger_at(&trigger(TriggerPriority::High), now);
        assert!(!s.in_peak(decision.scheduled_time));
    }

    #[test]
    fn quiet_time_schedules_promptly() {
        let s = scheduler();
        let now = saturday_night();
        let decision = s.schedule_trigger_at(&trigger(TriggerPriority::Low), now);
        // Low load everywhere: the earliest slot wins on the
        // hours-ahead penalty.
        assert_eq!(decision.scheduled_time, now);
    }

    #[test]
    fn scheduling_window_executes_immediately() {
        let mut config = SchedulerConfig::default();
        config.scheduling_windows = vec![HourRange {
            days: vec![Day::Sat],
            start_hour: 0,
            end_hour: 4,
        }];
        let s = IntelligentScheduler::new(
            config,
            Arc::new(PatternLearner::new(PatternConfig::default())),
            Arc::new(SubscriberRegistry::new()),
        );
        let now = saturday_night();
        let decision = s.schedule_trigger_at(&trigger(TriggerPriority::Medium), now);
        assert_eq!(decision.scheduled_time, now);
        assert!(decision
            .reasoning
            .iter()
            .any(|r| r.contains("scheduling window")));
    }

    #[test]
    fn pattern_with_confidence_drives_prediction() {
        let patterns = Arc::new(PatternLearner::new(PatternConfig::default()));
        let t = saturday_night();
        // 20 samples -> confidence 1.0; usage 90 classifies Critical.
        for _ in 0..20 {
            patterns.observe(ExecutionSample {
                started_at: t,
                duration_ms: 100.0,
                success: true,
                resource_usage: 90.0,
            });
        }
        let s = IntelligentScheduler::new(
            SchedulerConfig::default(),
            patterns,
            Arc::new(SubscriberRegistry::new()),
        );
        let (load, from_pattern) = s.predict_load(t);
        assert!(from_pattern);
        assert_eq!(load, LoadLevel::Critical);
    }

    #[test]
    fn low_confidence_pattern_falls_back_to_heuristic() {
        let patterns = Arc::new(PatternLearner::new(PatternConfig::default()));
        let t = saturday_night();
        // Exactly min_samples -> confidence 0.5, below the 0.7 gate.
        for _ in 0..10 {
            patterns.observe(ExecutionSample {
                started_at: t,
                duration_ms: 100.0,
                success: true,
                resource_usage: 90.0,
            });
        }
        let s = IntelligentScheduler::new(
            SchedulerConfig::default(),
            patterns,
            Arc::new(SubscriberRegistry::new()),
        );
        let (load, from_pattern) = s.predict_load(t);
        assert!(!from_pattern);
        // Saturday 01:00 is neither peak nor business hours.
        assert_eq!(load, LoadLevel::Low);
    }

    #[test]
    fn recent_high_anomaly_escalates_near_term_prediction() {
        use crate::service::anomaly::{AnomalyConfig, MetricKind};

        let detector = Arc::new(AnomalyDetector::new(AnomalyConfig::default()));
        for _ in 0..10 {
            detector.record("error_rate", MetricKind::ErrorRate, 0.01);
        }
        for _ in 0..5 {
            detector.record("error_rate", MetricKind::ErrorRate, 0.2);
        }
        let flagged_at = detector.last_high_severity().unwrap();

        // Quiet baseline everywhere, so the heuristic alone says Low.
        let mut config = SchedulerConfig::default();
        config.peak_periods = vec![];
        config.business_start_hour = 0;
        config.business_end_hour = 0;

        let plain = IntelligentScheduler::new(
            config.clone(),
            Arc::new(PatternLearner::new(PatternConfig::default())),
            Arc::new(SubscriberRegistry::new()),
        );
        let fed = IntelligentScheduler::new(
            config,
            Arc::new(PatternLearner::new(PatternConfig::default())),
            Arc::new(SubscriberRegistry::new()),
        )
        .with_anomaly_feed(detector);

        let (level, _) = plain.predict_load(flagged_at);
        assert_eq!(level, LoadLevel::Low);
        let (level, _) = fed.predict_load(flagged_at);
        assert_eq!(level, LoadLevel::High);

        // Slots past the hold window are unaffected.
        let later = flagged_at + Duration::hours(2);
        let (level, _) = fed.predict_load(later);
        assert_eq!(level, LoadLevel::Low);
    }

    #[test]
    fn decision_reports_load_and_alternatives() {
        let s = scheduler();
        let decision = s.schedule_trigger_at(&trigger(TriggerPriority::Medium), saturday_night());
        assert!(!decision.alternatives.is_empty());
        assert!(decision.reasoning.iter().any(|r| r.contains("priority")));
        assert!(decision
            .reasoning
            .iter()
            .any(|r| r.contains("predicted load")));
    }

    #[test]
    fn due_schedules_are_taken_once() {
        let s = scheduler();
        let now = saturday_night();
        s.schedule_trigger_at(&trigger(TriggerPriority::Low), now);
        assert!(s.has_schedule("t1"));

        let due = s.take_due(now + Duration::hours(1));
        assert_eq!(due.len(), 1);
        assert!(!s.has_schedule("t1"));
        assert!(s.take_due(now + Duration::hours(2)).is_empty());
    }
}
