//! Application configuration loading and validation.
//!
//! Provides the main [`Config`] struct that aggregates every tunable of
//! the control loops. Configuration is loaded from a TOML file; every
//! field has a default, so an empty file is a valid configuration.
//!
//! # Example
//!
//! ```no_run
//! use rollwatch::config::Config;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.toml")?;
//!     config.init_logging();
//!     Ok(())
//! }
//! ```

use std::path::Path;

use serde::Deserialize;
use tracing_subscriber::{fmt, EnvFilter};

use crate::domain::RolloutStrategy;
use crate::error::{ConfigError, Result};
use crate::runtime::RuntimeConfig;
use crate::service::anomaly::AnomalyConfig;
use crate::service::patterns::PatternConfig;
use crate::service::rollout::RolloutConfig;
use crate::service::scheduler::SchedulerConfig;
use crate::service::triggers::TriggerEngineConfig;

/// Logging configuration.
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl LoggingConfig {
    /// Initialize the tracing subscriber with this logging configuration.
    pub fn init(&self) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        match self.format.as_str() {
            "json" => {
                fmt().json().with_env_filter(filter).init();
            }
            _ => {
                fmt().with_env_filter(filter).init();
            }
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

/// One component to manage, declared as a `[[components]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ComponentConfig {
    pub name: String,
    #[serde(default)]
    pub strategy: RolloutStrategy,
}

/// Main application configuration.
///
/// Aggregates all control-loop settings. Load from a TOML file using
/// [`Config::load`] or parse directly with [`Config::parse_toml`].
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Components placed under rollout management at startup.
    #[serde(default)]
    pub components: Vec<ComponentConfig>,

    /// Rollout state machine tunables.
    #[serde(default)]
    pub rollout: RolloutConfig,

    /// Trigger engine tunables.
    #[serde(default)]
    pub triggers: TriggerEngineConfig,

    /// Peak periods, scheduling windows, and slot scoring weights.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Pattern learning sample and retention settings.
    #[serde(default)]
    pub patterns: PatternConfig,

    /// Anomaly detection thresholds.
    #[serde(default)]
    pub anomaly: AnomalyConfig,

    /// Worker intervals and shutdown behavior.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Logging and tracing configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Optional trigger document loaded into the engine at startup.
    #[serde(default)]
    pub triggers_file: Option<String>,
}

impl Config {
    /// Parse configuration from TOML content.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or validation fails.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, the TOML is
    /// malformed, or validation fails.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse_toml(&content)
    }

    /// Initialize logging from the `[logging]` section.
    pub fn init_logging(&self) {
        self.logging.init();
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for component in &self.components {
            if component.name.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "components.name",
                    reason: "must not be empty".to_string(),
                }
                .into());
            }
            if !seen.insert(component.name.clone()) {
                return Err(ConfigError::InvalidValue {
                    field: "components.name",
                    reason: format!("duplicate component '{}'", component.name),
                }
                .into());
            }
        }

        if self.rollout.rollout_increment <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "rollout.rollout_increment",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        if self.rollout.max_percentage <= 0.0 || self.rollout.max_percentage > 100.0 {
            return Err(ConfigError::InvalidValue {
                field: "rollout.max_percentage",
                reason: "must be in (0, 100]".to_string(),
            }
            .into());
        }
        if self.rollout.rollback_score_floor >= self.rollout.advance_score {
            return Err(ConfigError::InvalidValue {
                field: "rollout.rollback_score_floor",
                reason: "must be below rollout.advance_score".to_string(),
            }
            .into());
        }
        if !(0.0..=1.0).contains(&self.rollout.rollback_score_floor)
            || !(0.0..=1.0).contains(&self.rollout.advance_score)
        {
            return Err(ConfigError::InvalidValue {
                field: "rollout.advance_score",
                reason: "score bounds must be in [0, 1]".to_string(),
            }
            .into());
        }

        if self.scheduler.slot_step_minutes <= 0 || self.scheduler.slot_search_hours <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "scheduler.slot_step_minutes",
                reason: "slot search settings must be positive".to_string(),
            }
            .into());
        }
        if self.scheduler.usage_low_below >= self.scheduler.usage_medium_below
            || self.scheduler.usage_medium_below >= self.scheduler.usage_high_below
        {
            return Err(ConfigError::InvalidValue {
                field: "scheduler.usage_low_below",
                reason: "usage thresholds must be strictly increasing".to_string(),
            }
            .into());
        }
        for range in self
            .scheduler
            .peak_periods
            .iter()
            .chain(self.scheduler.scheduling_windows.iter())
        {
            if range.start_hour >= range.end_hour || range.end_hour > 24 {
                return Err(ConfigError::InvalidValue {
                    field: "scheduler.peak_periods",
                    reason: format!(
                        "hour range {}-{} is not a valid [start, end) range",
                        range.start_hour, range.end_hour
                    ),
                }
                .into());
            }
        }

        if self.anomaly.window_size < 5 {
            return Err(ConfigError::InvalidValue {
                field: "anomaly.window_size",
                reason: "must be at least 5".to_string(),
            }
            .into());
        }
        if self.anomaly.z_threshold <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "anomaly.z_threshold",
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }

        if self.patterns.min_samples == 0 {
            return Err(ConfigError::InvalidValue {
                field: "patterns.min_samples",
                reason: "must be at least 1".to_string(),
            }
            .into());
        }

        if self.triggers.action_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "triggers.action_timeout_seconds",
                reason: "must be at least 1".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = Config::parse_toml("").unwrap();
        assert!(config.components.is_empty());
        assert_eq!(config.rollout.error_threshold, 5);
        assert_eq!(config.rollout.rollout_increment, 10.0);
        assert_eq!(config.scheduler.slot_search_hours, 12);
        assert_eq!(config.patterns.min_samples, 10);
        assert_eq!(config.anomaly.z_threshold, 2.5);
        assert_eq!(config.runtime.evaluation_interval_seconds, 300);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn components_and_overrides_parse() {
        let toml = r#"
            [[components]]
            name = "parser"
            strategy = "aggressive"

            [[components]]
            name = "renderer"

            [rollout]
            error_threshold = 3
            rollout_increment = 20.0

            [logging]
            level = "debug"
            format = "json"
        "#;
        let config = Config::parse_toml(toml).unwrap();
        assert_eq!(config.components.len(), 2);
        assert_eq!(config.components[0].strategy, RolloutStrategy::Aggressive);
        assert_eq!(config.components[1].strategy, RolloutStrategy::Balanced);
        assert_eq!(config.rollout.error_threshold, 3);
        assert_eq!(config.rollout.rollout_increment, 20.0);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn duplicate_component_is_rejected() {
        let toml = r#"
            [[components]]
            name = "parser"

            [[components]]
            name = "parser"
        "#;
        assert!(Config::parse_toml(toml).is_err());
    }

    #[test]
    fn zero_increment_is_rejected() {
        let toml = r#"
            [rollout]
            rollout_increment = 0.0
        "#;
        assert!(Config::parse_toml(toml).is_err());
    }

    #[test]
    fn inverted_hour_range_is_rejected() {
        let toml = r#"
            [[scheduler.peak_periods]]
            days = ["mon"]
            start_hour = 17
            end_hour = 9
        "#;
        assert!(Config::parse_toml(toml).is_err());
    }

    #[test]
    fn inverted_score_bounds_are_rejected() {
        let toml = r#"
            [rollout]
            rollback_score_floor = 0.8
            advance_score = 0.6
        "#;
        assert!(Config::parse_toml(toml).is_err());
    }
}
