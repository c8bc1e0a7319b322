//! Aggregation errors.

/// Error type for aggregation operations.
pub type Result<T> = std::result::Result<T, AggregateError>;

/// Errors from computing a summary.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AggregateError {
    /// Not enough visible records for the requested kind
    #[error("Insufficient data for {kind}: need {required} record(s), have {available}")]
    InsufficientData {
        /// Requested summary kind
        kind: &'static str,
        /// Records the kind needs
        required: usize,
        /// Records available in the window
        available: usize,
    },

    /// The request itself is unusable
    #[error("Invalid summary request: {0}")]
    InvalidRequest(String),
}
