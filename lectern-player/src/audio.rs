//! Platform audio primitive
//!
//! An [`AudioOutput`] opens one [`AudioSink`] per playback session. Sinks take
//! fire-and-forget commands and report progress asynchronously as
//! [`AudioEvent`]s tagged with the session they belong to, so events from a
//! sink that has already been torn down can be recognised and dropped.

use crate::error::PlaybackError;
use lectern_spk::AudioHandle;
use tokio::sync::mpsc;

pub type SessionId = u64;

/// Notifications from the audio primitive
#[derive(Debug, Clone, PartialEq)]
pub enum AudioEvent {
    /// Metadata is available and the clip can start
    Loaded { duration: f64 },
    /// Current position in clip seconds
    TimeUpdate(f64),
    /// Natural end of the clip
    Ended,
    Error(PlaybackError),
}

/// An event together with the session that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSignal {
    pub session: SessionId,
    pub event: AudioEvent,
}

/// Event channel handed to a sink when it is opened
#[derive(Debug, Clone)]
pub struct AudioEventSender {
    session: SessionId,
    tx: mpsc::UnboundedSender<AudioSignal>,
}

impl AudioEventSender {
    pub(crate) fn new(session: SessionId, tx: mpsc::UnboundedSender<AudioSignal>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Returns false once the controller has gone away
    pub fn send(&self, event: AudioEvent) -> bool {
        self.tx
            .send(AudioSignal {
                session: self.session,
                event,
            })
            .is_ok()
    }
}

/// Factory for audio sinks
pub trait AudioOutput: Send + Sync {
    /// Start loading `audio`. `Loaded` is reported through `events` once the
    /// duration is known.
    fn open(
        &self,
        audio: &AudioHandle,
        events: AudioEventSender,
    ) -> Result<Box<dyn AudioSink>, PlaybackError>;
}

/// One loaded clip. Dropping the sink releases the audio resource.
pub trait AudioSink: Send {
    fn play(&mut self) -> Result<(), PlaybackError>;
    fn pause(&mut self);
    fn seek(&mut self, time: f64);
    fn set_rate(&mut self, rate: f64);
}
