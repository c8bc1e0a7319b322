//! Ingestion errors.

/// Error type for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestError>;

/// Errors that abort an ingestion.
///
/// Individual bad lines never produce these; they become warnings on the
/// [`IngestReport`](crate::IngestReport).
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The input as a whole does not have the expected shape
    #[error("Malformed input '{input}': {reason}")]
    MalformedInput {
        /// Input name
        input: String,
        /// What is wrong with it
        reason: String,
    },

    /// Format could not be determined or is unknown
    #[error("Unsupported input format: {0}")]
    UnsupportedFormat(String),

    /// Pattern compilation error
    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Endpoint answered with an unexpected status
    #[error("Unexpected response from {url}: {status}")]
    UnexpectedStatus {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },
}

impl IngestError {
    pub(crate) fn malformed(input: impl Into<String>, reason: impl Into<String>) -> Self {
        IngestError::MalformedInput {
            input: input.into(),
            reason: reason.into(),
        }
    }
}
