//! Common error types for landmarker backends

use thiserror::Error;

/// Common result type for landmarker operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the backend client and navigator
///
/// Variants carry rendered messages rather than source errors so that a single
/// in-flight result can be cloned out to every caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Missing or rejected access token
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Remote path does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Transport-level failure (connection, DNS, TLS, body read)
    #[error("Network error: {0}")]
    Network(String),

    /// Backend answered with a non-success status
    #[error("API error {0}: {1}")]
    Api(u16, String),

    /// Unsupported extension or malformed request
    #[error("Validation error: {0}")]
    Validation(String),

    /// Operation not valid for the current navigation state
    #[error("Invalid state: {0}")]
    State(String),

    /// Payload could not be decoded
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Local file I/O error
    #[error("IO error: {0}")]
    Io(String),

    /// Download aborted through its handle
    #[error("Aborted: {0}")]
    Aborted(String),
}

impl Error {
    /// True for failures the caller may reasonably retry by re-invoking the operation
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::Network(_) | Error::Api(..))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Parse(err.to_string())
    }
}
