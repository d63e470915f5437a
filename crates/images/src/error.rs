use std::time::Duration;

use thiserror::Error;

/// LoadError represents every way an image load can end without pixels.
///
/// Errors never escape the manager's public methods; they are delivered
/// through the request's completion future and the event stream.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    /// Transport-level failures (connection refused, reset, DNS)
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered with a non-success status
    #[error("HTTP status {0}")]
    HttpStatus(u16),

    /// The response was not an image
    #[error("Not an image: content type {0}")]
    NotAnImage(String),

    /// The load did not finish in time
    #[error("Image load timed out after {0:?}")]
    Timeout(Duration),

    /// URL parsing errors
    #[error("URL parsing error: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The body arrived but could not be decoded
    #[error("Image decode error: {0}")]
    Decode(String),

    /// The image has no source URL to load
    #[error("Image has no sources")]
    NoSources,

    /// The request was unregistered before it finished
    #[error("Image request cancelled")]
    Cancelled,
}

impl LoadError {
    /// Returns true if the failure is likely temporary and a fresh attempt could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            LoadError::Network(_) | LoadError::Timeout(_) => true,
            LoadError::HttpStatus(status) => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for LoadError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            // reqwest does not expose the configured limit on the error
            LoadError::Timeout(Duration::ZERO)
        } else if let Some(status) = error.status() {
            LoadError::HttpStatus(status.as_u16())
        } else if error.is_decode() || error.is_body() {
            LoadError::Decode(error.to_string())
        } else {
            LoadError::Network(error.to_string())
        }
    }
}
