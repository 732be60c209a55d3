//! Error types for trellis-core

use thiserror::Error;

/// Result type alias for trellis operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type returned by application handlers
///
/// Handlers may fail with anything; the server loop is the only place that
/// inspects it.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error types for the trellis HTTP server
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid HTTP method
    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    /// Request line or header block could not be parsed
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// Header terminator not found within the configured ceiling
    #[error("Header block exceeds limit of {limit} bytes")]
    HeadersTooLarge { limit: usize },

    /// Declared body exceeds the configured ceiling
    #[error("Body too large: {size} bytes exceeds limit of {limit} bytes")]
    BodyTooLarge { size: usize, limit: usize },

    /// Content-Length header is not a valid length
    #[error("Invalid Content-Length: {0}")]
    InvalidContentLength(String),

    /// Unknown server mode name
    #[error("Unknown server mode: {0} (expected \"pool\" or \"event\")")]
    InvalidMode(String),

    /// Multipart body does not follow the expected framing
    #[error("Multipart error: {0}")]
    Multipart(String),

    /// Uploaded part exceeds its size ceiling
    #[error("File too large: exceeds limit of {limit} bytes")]
    FileTooLarge { limit: u64 },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
