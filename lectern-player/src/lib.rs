//! lectern-player: Synchronized playback and queue orchestration
//!
//! Provides:
//! - A playback controller state machine over one audio session
//! - Playback time to highlighted word tracking with rate-aware lookahead
//! - An audio output abstraction plus a clock-driven simulated output
//! - A queue with shuffle, repeat and auto-advance driven by a queue manager

pub mod audio;
pub mod config;
pub mod controller;
pub mod error;
pub mod manager;
pub mod queue;
pub mod simulated;
pub mod tracker;

pub use audio::{AudioEvent, AudioEventSender, AudioOutput, AudioSignal, AudioSink, SessionId};
pub use config::{PlaybackConfig, QueueConfig};
pub use controller::{
    PlaybackController, PlaybackEvent, PlaybackNotice, PlaybackSession, PlaybackState, TimingSource,
};
pub use error::PlaybackError;
pub use manager::{QueueCommand, QueueHandle, QueueManager, QueueSnapshot};
pub use queue::{Advance, Queue, RepeatMode, Removal};
pub use simulated::SimulatedAudioOutput;
pub use tracker::{find_word_index, WordIndexTracker};
