//! Error types for mediafetch core

use thiserror::Error;

/// Errors that can occur in mediafetch core
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    #[error("Transfer ended early: {written} of {expected} bytes")]
    Truncated { expected: u64, written: u64 },

    #[error("Invalid resume token: {0}")]
    InvalidResumeToken(String),

    #[error("Failed to move downloaded file into place: {0}")]
    Move(std::io::Error),

    #[error("Download was cancelled")]
    Cancelled,

    #[error("Gave up after {attempts} attempts")]
    GaveUp { attempts: u32 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl FetchError {
    /// Check if this error looks like a passing network condition
    ///
    /// The engine retries every transport failure regardless; this only
    /// decides how loudly a failure is logged.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::Truncated { .. } => true,
            FetchError::ServerError { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(error: serde_json::Error) -> Self {
        FetchError::Serialization(error.to_string())
    }
}
