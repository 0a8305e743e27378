//! Error handling for the tuning engine.

use thiserror::Error;

/// Main error type for the tuning engine
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed tuning request (bad category, empty selection, unknown parameter)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// A job is already in flight for the category
    #[error("A tuning job is already in flight for category '{category}' (job {job_id})")]
    ConflictError { category: String, job_id: i64 },

    /// No sales history at all for the category
    #[error("No sales data available for the selected category")]
    NoHistory,

    /// History exists but is too short to backtest
    #[error("Insufficient data for parameter tuning: need at least {required} monthly periods, got {actual}")]
    InsufficientHistory { required: usize, actual: usize },

    /// Every grid combination failed evaluation
    #[error("No valid parameter combinations found during testing")]
    NoViableCombination,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Data-related errors (malformed series, aggregation problems)
    #[error("Data error: {0}")]
    DataError(String),

    /// Errors surfaced by the forecasting backend during fit or predict
    #[error("Model error: {0}")]
    ModelError(String),

    /// Job store / tuned-parameter store failures
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A job exceeded its wall-clock budget
    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    /// Job id not present in the store
    #[error("Job {0} not found")]
    JobNotFound(i64),

    /// I/O errors
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// Other errors
    #[error("Error: {0}")]
    Other(String),
}

/// Result type for the tuning engine
pub type Result<T> = std::result::Result<T, Error>;

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::PersistenceError(err.to_string())
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Error::Other(err.to_string())
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Error::Other(err)
    }
}

// Allow automatic conversion from anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}
