//! Query errors.

use qualisentinel_aggregate::AggregateError;
use qualisentinel_core::SeriesKey;

/// Error type for query operations.
pub type Result<T> = std::result::Result<T, QueryError>;

/// Errors returned to presentation layers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    /// No series exists for the key
    #[error("Series not found: {0}")]
    NotFound(SeriesKey),

    /// No series exists for the source
    #[error("Source not found: {0}")]
    SourceNotFound(String),

    /// The series has too few visible records
    #[error("Insufficient data for {kind}: need {required} record(s), have {available}")]
    InsufficientData {
        /// Requested summary kind
        kind: &'static str,
        /// Records the kind needs
        required: usize,
        /// Records available
        available: usize,
    },

    /// The request itself is unusable
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<AggregateError> for QueryError {
    fn from(err: AggregateError) -> Self {
        match err {
            AggregateError::InsufficientData {
                kind,
                required,
                available,
            } => QueryError::InsufficientData {
                kind,
                required,
                available,
            },
            AggregateError::InvalidRequest(reason) => QueryError::InvalidRequest(reason),
        }
    }
}
