use crate::executor::BatchExecutorError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Driver error: {0}")]
    Driver(String),

    /// Raised by a driver when one row of a batch fails. `update_counts` holds
    /// the counts of the rows that completed before the failure.
    #[error("Batch update failed: {message}")]
    BatchUpdate {
        message: String,
        update_counts: Vec<i64>,
    },

    #[error(transparent)]
    BatchExecution(Box<BatchExecutorError>),

    #[error("Cache timeout: {0}")]
    CacheTimeout(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Too many results: {0}")]
    TooManyResults(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Illegal state: {0}")]
    State(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl DbError {
    /// True for errors that mean the caller handed over a broken setup rather than
    /// the database failing at runtime.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    pub fn is_cache_timeout(&self) -> bool {
        matches!(self, Self::CacheTimeout(_))
    }

    /// Batch failure payload, if this error came out of a batch flush.
    pub fn batch_failure(&self) -> Option<&BatchExecutorError> {
        match self {
            Self::BatchExecution(inner) => Some(inner),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<std::io::Error> for DbError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
