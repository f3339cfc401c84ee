//! Custom TTS engine implementation
//! Lets embedders plug their own speech backend in with closures

use crate::config::{SpeechOptions, VoiceConfig};
use crate::engines::{SpeechOutput, TtsEngine};
use crate::error::SpeechError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;

type SynthesizeFn = Arc<
    dyn Fn(String, VoiceConfig, SpeechOptions) -> BoxFuture<'static, Result<SpeechOutput, SpeechError>>
        + Send
        + Sync,
>;

/// Custom TTS engine wrapper
pub struct CustomTtsEngine {
    name: String,
    synthesize_fn: SynthesizeFn,
    voices: Vec<String>,
    is_available_fn: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl CustomTtsEngine {
    /// Create an engine from a synchronous function
    pub fn new<F>(name: impl Into<String>, synthesize_fn: F) -> Self
    where
        F: Fn(&str, &VoiceConfig, &SpeechOptions) -> Result<SpeechOutput, SpeechError>
            + Send
            + Sync
            + 'static,
    {
        let synthesize_fn = Arc::new(synthesize_fn);
        Self::from_async(name, move |text, voice, options| {
            let result = synthesize_fn(&text, &voice, &options);
            async move { result }.boxed()
        })
    }

    /// Create an engine from a function returning a future
    pub fn from_async<F>(name: impl Into<String>, synthesize_fn: F) -> Self
    where
        F: Fn(String, VoiceConfig, SpeechOptions) -> BoxFuture<'static, Result<SpeechOutput, SpeechError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            synthesize_fn: Arc::new(synthesize_fn),
            voices: Vec::new(),
            is_available_fn: Arc::new(|| true),
        }
    }

    pub fn with_voices(mut self, voices: Vec<String>) -> Self {
        self.voices = voices;
        self
    }

    pub fn with_availability<F>(mut self, is_available_fn: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.is_available_fn = Arc::new(is_available_fn);
        self
    }
}

#[async_trait]
impl TtsEngine for CustomTtsEngine {
    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceConfig,
        options: &SpeechOptions,
    ) -> Result<SpeechOutput, SpeechError> {
        if text.trim().is_empty() {
            return Err(SpeechError::InvalidInput("Text cannot be empty".to_string()));
        }

        (self.synthesize_fn)(text.to_string(), voice.clone(), options.clone()).await
    }

    async fn list_voices(&self) -> Result<Vec<String>, SpeechError> {
        Ok(self.voices.clone())
    }

    fn is_available(&self) -> bool {
        (self.is_available_fn)()
    }

    fn name(&self) -> &str {
        &self.name
    }
}
