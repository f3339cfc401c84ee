//! lectern-spk: Speech generation for narrated reading
//!
//! Provides:
//! - A content-addressed speech cache with pending-request de-duplication
//! - A speech generator in front of pluggable TTS engines
//! - An API engine, an offline engine and a closure-backed custom engine
//! - Approximate per-word timing when the engine gives no alignment

pub mod cache;
pub mod config;
pub mod engines;
pub mod error;
pub mod generator;
pub mod timing;

pub use cache::{CacheEntry, CacheKey, CacheOrigin, CacheStats, SpeechCache};
pub use config::{ApiTtsConfig, AudioFormat, RetryConfig, SpeechConfig, SpeechOptions, TtsEngine, VoiceConfig};
pub use engines::{AudioHandle, SpeechOutput, TtsEngine as TtsEngineTrait};
pub use error::SpeechError;
pub use generator::{GeneratedSpeech, SpeechGenerator};
pub use timing::{estimate_duration, synthesize_timings, TimingModel};
