//! Configuration for speech generation

use serde::{Deserialize, Serialize};
use url::Url;

/// Speech generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Which TTS engine to use
    pub engine: TtsEngine,

    /// Default voice
    pub voice: VoiceConfig,

    /// Default generation options
    pub options: SpeechOptions,

    /// API configuration (required for API-based engines)
    pub api_config: Option<ApiTtsConfig>,

    /// Enable the in-memory speech cache
    pub enable_cache: bool,

    /// Cache budget in MB; least recently used entries are evicted above it
    pub max_cache_size_mb: u64,

    /// Evict entries not used for this long (seconds). `None` disables age eviction.
    pub max_cache_age_secs: Option<u64>,

    /// Longest text accepted for one generation, in bytes
    pub max_text_length: usize,

    /// Concurrent engine calls allowed at once
    pub max_concurrent_requests: usize,
}

/// TTS engine type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum TtsEngine {
    /// Silent WAV of the estimated speaking length. No network.
    Offline,
    /// JSON speech service returning audio plus optional word alignment
    Api,
    /// OpenAI-compatible `/v1/audio/speech` endpoint (audio only)
    OpenAi,
}

/// Voice selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VoiceConfig {
    /// Voice identifier understood by the engine
    pub id: String,

    /// Language code (e.g., "en-US", "es-ES")
    pub language: String,
}

/// Options that change the generated audio. Part of the cache key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpeechOptions {
    /// Speaking speed requested from the engine (0.25-4.0)
    pub speed: f32,

    /// Requested audio container
    pub format: AudioFormat,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Wav,
}

impl AudioFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::Wav => "audio/wav",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
        }
    }
}

/// API TTS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiTtsConfig {
    /// API endpoint URL
    pub endpoint: String,

    /// API key (optional, can be set via environment)
    pub api_key: Option<String>,

    /// Model identifier
    pub model: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Retry configuration
    #[serde(default)]
    pub retry_config: RetryConfig,
}

/// Retry configuration for API calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum retry attempts
    pub max_retries: u32,

    /// Initial retry delay in milliseconds
    pub initial_delay_ms: u64,

    /// Maximum retry delay in milliseconds
    pub max_delay_ms: u64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            engine: TtsEngine::Offline,
            voice: VoiceConfig::default(),
            options: SpeechOptions::default(),
            api_config: None,
            enable_cache: true,
            max_cache_size_mb: 100,
            max_cache_age_secs: None,
            max_text_length: 100_000,
            max_concurrent_requests: 4,
        }
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            language: "en-US".to_string(),
        }
    }
}

impl Default for SpeechOptions {
    fn default() -> Self {
        Self {
            speed: 1.0,
            format: AudioFormat::Mp3,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
        }
    }
}

impl VoiceConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Validate voice configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("Voice id cannot be empty".to_string());
        }

        if self.id.len() > 256 {
            return Err("Voice id too long (max 256 chars)".to_string());
        }

        if self.id.chars().any(|c| c == '\0' || c.is_control()) {
            return Err("Voice id contains invalid characters".to_string());
        }

        if self.language.is_empty() {
            return Err("Language code cannot be empty".to_string());
        }

        if self.language.len() > 32 {
            return Err("Language code too long (max 32 chars)".to_string());
        }

        if !self.language.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(
                "Language code contains invalid characters (only alphanumeric and '-' allowed)"
                    .to_string(),
            );
        }

        Ok(())
    }
}

impl SpeechOptions {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.25..=4.0).contains(&self.speed) {
            return Err("Speed must be between 0.25 and 4.0".to_string());
        }
        Ok(())
    }
}

impl RetryConfig {
    /// Validate retry configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_retries > 100 {
            return Err("Max retries too large (max 100)".to_string());
        }

        if self.initial_delay_ms > 60_000 {
            return Err("Initial delay too large (max 60000 ms)".to_string());
        }

        if self.max_delay_ms > 300_000 {
            return Err("Max delay too large (max 300000 ms)".to_string());
        }

        if self.initial_delay_ms > self.max_delay_ms {
            return Err("Initial delay cannot be greater than max delay".to_string());
        }

        Ok(())
    }
}

impl ApiTtsConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            model: None,
            timeout_secs: 30,
            retry_config: RetryConfig::default(),
        }
    }

    /// HTTPS is required except for loopback hosts (local speech servers)
    pub fn validate(&self) -> Result<(), String> {
        if self.endpoint.is_empty() {
            return Err("API endpoint cannot be empty".to_string());
        }

        if self.endpoint.len() > 2048 {
            return Err("API endpoint URL too long (max 2048 chars)".to_string());
        }

        let url = Url::parse(&self.endpoint).map_err(|e| format!("Invalid API endpoint: {}", e))?;
        let loopback = matches!(url.host_str(), Some("localhost") | Some("127.0.0.1") | Some("[::1]"));
        match url.scheme() {
            "https" => {}
            "http" if loopback => {}
            _ => return Err("API endpoint must use HTTPS".to_string()),
        }

        if let Some(ref model) = self.model {
            if model.len() > 256 {
                return Err("API model name too long (max 256 chars)".to_string());
            }
            if model.chars().any(|c| c == '\0' || c.is_control()) {
                return Err("API model name contains invalid characters".to_string());
            }
        }

        if self.timeout_secs == 0 {
            return Err("API timeout must be greater than 0".to_string());
        }

        if self.timeout_secs > 300 {
            return Err("API timeout too large (max 300 seconds)".to_string());
        }

        self.retry_config.validate()
    }
}

impl SpeechConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        self.voice.validate()?;
        self.options.validate()?;

        if self.max_concurrent_requests == 0 {
            return Err("max_concurrent_requests must be greater than 0".to_string());
        }

        if self.max_concurrent_requests > 64 {
            return Err("max_concurrent_requests too large (max 64)".to_string());
        }

        if self.max_text_length == 0 {
            return Err("max_text_length must be greater than 0".to_string());
        }

        const MAX_CACHE_SIZE_MB: u64 = 10_000;
        if self.max_cache_size_mb > MAX_CACHE_SIZE_MB {
            return Err(format!("Cache size too large (max {} MB)", MAX_CACHE_SIZE_MB));
        }

        match (&self.engine, &self.api_config) {
            (TtsEngine::Api, None) | (TtsEngine::OpenAi, None) => {
                return Err("API engines require api_config".to_string());
            }
            (_, Some(api_config)) => api_config.validate()?,
            _ => {}
        }

        Ok(())
    }

    /// Cache budget in bytes, saturating on overflow
    pub fn max_cache_bytes(&self) -> usize {
        self.max_cache_size_mb
            .checked_mul(1024 * 1024)
            .and_then(|b| usize::try_from(b).ok())
            .unwrap_or(usize::MAX)
    }
}
