use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Speech generation failed (network, service or input). Retryable.
    #[error("Generation error: {0}")]
    Generation(String),

    /// A queue operation that could not apply, e.g. removing an unknown id.
    #[error("Invalid queue operation: {0}")]
    InvalidQueueOperation(String),

    /// The platform audio primitive failed.
    #[error("Playback resource error: {0}")]
    PlaybackResource(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether retrying the same request can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Generation(_) | Error::PlaybackResource(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
