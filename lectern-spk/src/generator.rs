//! Speech generator: validation, caching and concurrency limits in front of a TTS engine

use crate::cache::{CacheKey, CacheOrigin, CacheStats, SpeechCache};
use crate::config::{SpeechConfig, SpeechOptions, VoiceConfig};
use crate::engines::{build_engine, AudioHandle, TtsEngine};
use crate::error::SpeechError;
use lectern_core::WordTiming;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};

/// Result of one generation request
#[derive(Debug, Clone)]
pub struct GeneratedSpeech {
    pub key: CacheKey,
    pub audio: AudioHandle,
    /// Service alignment. Empty means the caller must synthesize timings
    /// once the clip duration is known.
    pub word_timings: Vec<WordTiming>,
    pub origin: CacheOrigin,
}

impl GeneratedSpeech {
    pub fn has_alignment(&self) -> bool {
        !self.word_timings.is_empty()
    }
}

/// Speech generator with caching and request limiting
pub struct SpeechGenerator {
    config: Arc<SpeechConfig>,
    engine: Arc<dyn TtsEngine>,
    cache: SpeechCache,
    request_semaphore: Arc<Semaphore>,
}

impl SpeechGenerator {
    /// Create a generator using the engine named in `config`
    pub fn new(config: SpeechConfig) -> Result<Self, SpeechError> {
        config.validate().map_err(SpeechError::Config)?;
        let engine = build_engine(&config)?;
        Self::with_engine(config, engine)
    }

    /// Create a generator around an existing engine
    pub fn with_engine(config: SpeechConfig, engine: Arc<dyn TtsEngine>) -> Result<Self, SpeechError> {
        config.validate().map_err(SpeechError::Config)?;

        let cache = SpeechCache::with_policy(
            config.max_cache_bytes(),
            config.max_cache_age_secs,
            config.enable_cache,
        );
        let request_semaphore = Arc::new(Semaphore::new(config.max_concurrent_requests));

        info!("Speech generator ready (engine: {})", engine.name());

        Ok(Self {
            config: Arc::new(config),
            engine,
            cache,
            request_semaphore,
        })
    }

    pub fn config(&self) -> &SpeechConfig {
        &self.config
    }

    pub fn cache(&self) -> &SpeechCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    pub async fn list_voices(&self) -> Result<Vec<String>, SpeechError> {
        self.engine.list_voices().await
    }

    /// Generate with the configured voice and options
    pub async fn generate(&self, text: &str) -> Result<GeneratedSpeech, SpeechError> {
        self.generate_with(text, &self.config.voice, &self.config.options).await
    }

    /// Generate speech for `text`.
    ///
    /// Served from the cache when possible; concurrent requests for the same
    /// content share one engine call.
    pub async fn generate_with(
        &self,
        text: &str,
        voice: &VoiceConfig,
        options: &SpeechOptions,
    ) -> Result<GeneratedSpeech, SpeechError> {
        self.validate_request(text, voice, options)?;

        let key = CacheKey::new(text, voice, options);
        let engine = Arc::clone(&self.engine);
        let semaphore = Arc::clone(&self.request_semaphore);
        let request_text = text.to_string();
        let request_voice = voice.clone();
        let request_options = options.clone();

        let (entry, origin) = self
            .cache
            .get_or_generate(key.clone(), move || async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| SpeechError::Cancelled)?;
                debug!("Calling {} for {} chars", engine.name(), request_text.len());
                engine
                    .synthesize(&request_text, &request_voice, &request_options)
                    .await
            })
            .await?;

        Ok(GeneratedSpeech {
            key,
            audio: entry.audio,
            word_timings: entry.word_timings,
            origin,
        })
    }

    fn validate_request(
        &self,
        text: &str,
        voice: &VoiceConfig,
        options: &SpeechOptions,
    ) -> Result<(), SpeechError> {
        if text.trim().is_empty() {
            return Err(SpeechError::InvalidInput("Text cannot be empty".to_string()));
        }

        if text.contains('\0') {
            return Err(SpeechError::InvalidInput("Text contains null bytes".to_string()));
        }

        if text.len() > self.config.max_text_length {
            return Err(SpeechError::InvalidInput(format!(
                "Text too long ({} bytes, max {} bytes)",
                text.len(),
                self.config.max_text_length
            )));
        }

        voice.validate().map_err(SpeechError::InvalidInput)?;
        options.validate().map_err(SpeechError::InvalidInput)?;
        Ok(())
    }

    /// Engine calls currently running or waiting for a slot
    pub fn requests_in_use(&self) -> usize {
        self.config
            .max_concurrent_requests
            .saturating_sub(self.request_semaphore.available_permits())
    }
}
