//! Event bus for decisions and outcomes.
//!
//! The `Subscriber` trait defines the interface for event handlers.
//! Components publish through a shared `SubscriberRegistry` instead of
//! intercepting each other's calls.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::domain::{LoadLevel, OptimizationDecision};

use super::anomaly::Anomaly;

/// Events published by the control loops.
#[derive(Debug, Clone)]
pub enum Event {
    /// The rollout controller recorded a decision.
    DecisionPublished(OptimizationDecision),
    /// A trigger execution finished.
    TriggerCompleted {
        trigger_id: String,
        success: bool,
        details: String,
    },
    /// The scheduler queued a trigger for a future time.
    ScheduleCreated {
        trigger_id: String,
        scheduled_time: DateTime<Utc>,
        predicted_load: LoadLevel,
    },
    /// The anomaly detector flagged a metric.
    AnomalyDetected(Anomaly),
}

/// Trait for event handlers. Handling is fire-and-forget.
pub trait Subscriber: Send + Sync {
    fn on_event(&self, event: Event);
}

/// Registry of subscribers.
pub struct SubscriberRegistry {
    subscribers: Vec<Box<dyn Subscriber>>,
}

impl SubscriberRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: vec![],
        }
    }

    pub fn register(&mut self, subscriber: Box<dyn Subscriber>) {
        self.subscribers.push(subscriber);
    }

    pub fn publish_all(&self, event: Event) {
        for subscriber in &self.subscribers {
            subscriber.on_event(event.clone());
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscriber that logs every event through `tracing`.
pub struct LogSubscriber;

impl Subscriber for LogSubscriber {
    fn on_event(&self, event: Event) {
        match event {
            Event::DecisionPublished(decision) => {
                info!(
                    component = %decision.component_name,
                    implementation = %decision.implementation,
                    percentage = decision.rollout_percentage,
                    confidence = decision.confidence,
                    reason = %decision.reason,
                    "Decision published"
                );
            }
            Event::TriggerCompleted {
                trigger_id,
                success,
                details,
            } => {
                info!(trigger_id = %trigger_id, success, details = %details, "Trigger completed");
            }
            Event::ScheduleCreated {
                trigger_id,
                scheduled_time,
                predicted_load,
            } => {
                info!(
                    trigger_id = %trigger_id,
                    scheduled_time = %scheduled_time,
                    load = predicted_load.as_str(),
                    "Schedule created"
                );
            }
            Event::AnomalyDetected(anomaly) => {
                info!(
                    metric = %anomaly.metric,
                    severity = ?anomaly.severity,
                    latest = anomaly.latest,
                    "Anomaly detected"
                );
            }
        }
    }
}

/// A no-op subscriber for tests or when events are disabled.
pub struct NullSubscriber;

impl Subscriber for NullSubscriber {
    fn on_event(&self, _event: Event) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Capture(Arc<Mutex<Vec<Event>>>);

    impl Subscriber for Capture {
        fn on_event(&self, event: Event) {
            self.0.lock().push(event);
        }
    }

    #[test]
    fn publish_reaches_all_subscribers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = SubscriberRegistry::new();
        registry.register(Box::new(Capture(seen.clone())));
        registry.register(Box::new(NullSubscriber));
        assert_eq!(registry.len(), 2);

        registry.publish_all(Event::TriggerCompleted {
            trigger_id: "t1".to_string(),
            success: true,
            details: "done".to_string(),
        });

        assert_eq!(seen.lock().len(), 1);
    }
}
