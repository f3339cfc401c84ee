//! TTS engine implementations

pub mod api;
pub mod custom;
pub mod offline;

use crate::config::{SpeechConfig, SpeechOptions, VoiceConfig};
use crate::error::SpeechError;
use async_trait::async_trait;
use bytes::Bytes;
use lectern_core::WordTiming;
use std::sync::Arc;

/// Opaque, cheaply cloneable handle to generated audio.
///
/// The bytes are released when the last clone is dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioHandle {
    data: Bytes,
    mime_type: String,
    duration_hint: Option<f64>,
}

impl AudioHandle {
    pub fn new(data: Bytes, mime_type: impl Into<String>) -> Self {
        Self {
            data,
            mime_type: mime_type.into(),
            duration_hint: None,
        }
    }

    /// Attach a duration reported by the engine (seconds)
    pub fn with_duration(mut self, duration: f64) -> Self {
        if duration.is_finite() && duration > 0.0 {
            self.duration_hint = Some(duration);
        }
        self
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn duration_hint(&self) -> Option<f64> {
        self.duration_hint
    }

    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }
}

/// What an engine returns for one request
#[derive(Debug, Clone)]
pub struct SpeechOutput {
    pub audio: AudioHandle,
    /// True per-word alignment; empty when the engine has none
    pub word_timings: Vec<WordTiming>,
}

impl SpeechOutput {
    pub fn audio_only(audio: AudioHandle) -> Self {
        Self {
            audio,
            word_timings: Vec::new(),
        }
    }
}

/// Trait for TTS engines
#[async_trait]
pub trait TtsEngine: Send + Sync {
    /// Generate speech for `text`
    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceConfig,
        options: &SpeechOptions,
    ) -> Result<SpeechOutput, SpeechError>;

    /// Get available voices
    async fn list_voices(&self) -> Result<Vec<String>, SpeechError>;

    /// Check if engine is available
    fn is_available(&self) -> bool;

    /// Get engine name
    fn name(&self) -> &str;
}

/// Build the engine selected by `config`
pub fn build_engine(config: &SpeechConfig) -> Result<Arc<dyn TtsEngine>, SpeechError> {
    let engine: Arc<dyn TtsEngine> = match config.engine {
        crate::config::TtsEngine::Offline => Arc::new(offline::OfflineTtsEngine::new()),
        crate::config::TtsEngine::Api => {
            let api_config = config
                .api_config
                .as_ref()
                .ok_or_else(|| SpeechError::Config("API config required for API TTS".to_string()))?;
            Arc::new(api::ApiTtsEngine::new_api(api_config.clone())?)
        }
        crate::config::TtsEngine::OpenAi => {
            let api_config = config
                .api_config
                .as_ref()
                .ok_or_else(|| SpeechError::Config("API config required for OpenAI TTS".to_string()))?;
            Arc::new(api::ApiTtsEngine::new_openai(api_config.clone())?)
        }
    };

    if !engine.is_available() {
        return Err(SpeechError::Config(format!(
            "TTS engine '{}' not available (check API key)",
            engine.name()
        )));
    }

    Ok(engine)
}
