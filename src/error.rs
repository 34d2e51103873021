use thiserror::Error;

/// Errors that abort a scorecard run. Row-level data-quality problems are
/// never reported through this type; they are counted and logged instead.
#[derive(Debug, Error)]
pub enum HacError {
    #[error("nothing to reconcile: both the history and the incoming extract are empty")]
    NothingToReconcile,
    #[error("performance period type not recognized: '{0}' (expected CY, FY or ROLL)")]
    UnknownPeriodMode(String),
    #[error("invalid date: '{0}'")]
    InvalidDate(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, HacError>;
