use thiserror::Error;

use crate::validate::ValidationError;

#[derive(Debug, Error)]
pub enum MenderError {
    #[error("not initialized: run 'mender init'")]
    NotInitialized,

    #[error("plan not found: {0}")]
    PlanNotFound(String),

    #[error("invalid plan id: {0:?}")]
    InvalidPlanId(String),

    #[error("no pending plans")]
    NoPendingPlans,

    #[error("plan '{selector}' not found among pending plans (available: {available})")]
    NoMatchingPlan { selector: String, available: String },

    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("plan already archived: {0}")]
    AlreadyArchived(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("collector '{source_name}' failed: {message}")]
    Collector {
        source_name: String,
        message: String,
    },

    #[error("analysis failed: {0}")]
    Analysis(String),

    #[error("analysis engine unavailable: {0}")]
    AnalyzerUnavailable(String),

    #[error("invalid plan: {0}")]
    Validation(#[from] ValidationError),

    #[error("notification failed: {0}")]
    Notification(String),

    #[error("command channel error: {0}")]
    Channel(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MenderError>;
