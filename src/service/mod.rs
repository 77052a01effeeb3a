//! Control-loop services: rollout state machine, trigger engine,
//! scheduler, and the supporting statistical detectors.

pub mod anomaly;
pub mod events;
pub mod patterns;
pub mod rollout;
pub mod scheduler;
pub mod triggers;

pub use anomaly::{Anomaly, AnomalyConfig, AnomalyDetector, AnomalyKind, AnomalySeverity, MetricKind};
pub use events::{Event, LogSubscriber, NullSubscriber, Subscriber, SubscriberRegistry};
pub use patterns::{ExecutionSample, PatternConfig, PatternLearner};
pub use rollout::{RolloutConfig, RolloutController};
pub use scheduler::{IntelligentScheduler, SchedulerConfig};
pub use triggers::{ExecutionContext, TriggerEngine, TriggerEngineConfig};
