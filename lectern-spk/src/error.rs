//! Error types for lectern-spk

use lectern_core::Error as CoreError;
use thiserror::Error;

/// Speech generation errors.
///
/// `Clone` so one failed generation can be handed to every request that
/// joined it while it was pending.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpeechError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Generation cancelled")]
    Cancelled,
}

impl SpeechError {
    /// Client errors from the service are not worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            SpeechError::Network(_) | SpeechError::Engine(_) => true,
            SpeechError::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<SpeechError> for CoreError {
    fn from(err: SpeechError) -> Self {
        match err {
            SpeechError::Config(msg) => CoreError::Configuration(msg),
            other => CoreError::Generation(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for SpeechError {
    fn from(err: reqwest::Error) -> Self {
        SpeechError::Network(err.to_string())
    }
}
