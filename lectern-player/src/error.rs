use thiserror::Error;

/// Failures of the platform audio primitive
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybackError {
    #[error("Unsupported audio: {0}")]
    Unsupported(String),

    #[error("Failed to decode audio: {0}")]
    Decode(String),

    #[error("Audio device error: {0}")]
    Device(String),
}

impl From<PlaybackError> for lectern_core::Error {
    fn from(err: PlaybackError) -> Self {
        lectern_core::Error::PlaybackResource(err.to_string())
    }
}
