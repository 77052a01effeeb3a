use thiserror::Error;

/// Configuration-related errors with structured variants.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
}

/// Rejection of a malformed trigger or trigger document.
///
/// Raised before any engine state is mutated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("trigger id cannot be empty")]
    EmptyTriggerId,

    #[error("trigger '{0}' already exists")]
    DuplicateTrigger(String),

    #[error("trigger '{0}' not found")]
    UnknownTrigger(String),

    #[error("trigger '{trigger_id}' has no target components")]
    NoTargetComponents { trigger_id: String },

    #[error("trigger '{trigger_id}' of type {trigger_type} requires at least one condition")]
    MissingConditions {
        trigger_id: String,
        trigger_type: String,
    },

    #[error("trigger '{trigger_id}' of type {trigger_type} requires a schedule")]
    MissingSchedule {
        trigger_id: String,
        trigger_type: String,
    },

    #[error("invalid value for {field} on trigger '{trigger_id}': {reason}")]
    InvalidField {
        trigger_id: String,
        field: &'static str,
        reason: String,
    },
}

/// Failure of a triggered action while it was running.
///
/// Recorded on the `TriggerExecution`; never propagates out of the
/// scheduling loop.
#[derive(Error, Debug, Clone)]
pub enum ExecutionError {
    #[error("action failed for trigger '{trigger_id}' on component '{component}'")]
    ActionFailed {
        trigger_id: String,
        component: String,
    },

    #[error("action for trigger '{trigger_id}' timed out after {timeout_secs}s")]
    Timeout {
        trigger_id: String,
        timeout_secs: u64,
    },
}

/// Failure of an external collaborator (metrics source, flag store).
///
/// Logged, the cycle is skipped with state unchanged, and the call is
/// retried on the next cycle.
#[derive(Error, Debug)]
pub enum IntegrationError {
    #[error("metrics source unavailable: {0}")]
    Metrics(String),

    #[error("feature flag store write failed: {0}")]
    FlagStore(String),

    #[error("external call timed out after {0}s")]
    Timeout(u64),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Integration(#[from] IntegrationError),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
