//! API-based TTS engines
//! Supports a JSON speech service with word alignment and OpenAI-compatible endpoints

use crate::config::{ApiTtsConfig, RetryConfig, SpeechOptions, VoiceConfig};
use crate::engines::{AudioHandle, SpeechOutput, TtsEngine};
use crate::error::SpeechError;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use lectern_core::{validate_timings, WordTiming};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

const MAX_RESPONSE_SIZE: usize = 25 * 1024 * 1024;

/// API TTS engine
pub struct ApiTtsEngine {
    engine_type: ApiEngineType,
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: Option<String>,
    retry_config: RetryConfig,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ApiEngineType {
    Api,
    OpenAi,
}

/// Response body of the JSON speech service
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiSpeechResponse {
    audio: String,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    word_timings: Option<Vec<WordTiming>>,
}

impl ApiTtsEngine {
    /// JSON speech service: `POST {endpoint}/v1/speech`
    pub fn new_api(config: ApiTtsConfig) -> Result<Self, SpeechError> {
        Self::with_type(ApiEngineType::Api, config)
    }

    /// OpenAI-compatible service: `POST {endpoint}/v1/audio/speech`
    pub fn new_openai(mut config: ApiTtsConfig) -> Result<Self, SpeechError> {
        if config.model.is_none() {
            config.model = Some("tts-1".to_string());
        }
        Self::with_type(ApiEngineType::OpenAi, config)
    }

    fn with_type(engine_type: ApiEngineType, config: ApiTtsConfig) -> Result<Self, SpeechError> {
        config.validate().map_err(SpeechError::Config)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SpeechError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            engine_type,
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key,
            model: config.model,
            retry_config: config.retry_config,
        })
    }

    fn api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| match self.engine_type {
            ApiEngineType::Api => std::env::var("LECTERN_TTS_API_KEY").ok(),
            ApiEngineType::OpenAi => std::env::var("OPENAI_API_KEY").ok(),
        })
    }

    /// Synthesize using the JSON speech service
    async fn synthesize_api(
        &self,
        text: &str,
        voice: &VoiceConfig,
        options: &SpeechOptions,
    ) -> Result<SpeechOutput, SpeechError> {
        let mut request_body = json!({
            "text": text,
            "voiceId": voice.id,
            "language": voice.language,
            "options": options,
        });
        if let Some(ref model) = self.model {
            request_body["model"] = json!(model);
        }

        let url = format!("{}/v1/speech", self.endpoint);
        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");
        if let Some(key) = self.api_key() {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.json(&request_body).send().await?;
        let body = Self::read_success(response).await?;

        let parsed: ApiSpeechResponse = serde_json::from_slice(&body)
            .map_err(|e| SpeechError::Engine(format!("Failed to parse speech response: {}", e)))?;

        let audio_bytes = general_purpose::STANDARD
            .decode(parsed.audio.as_bytes())
            .map_err(|e| SpeechError::Engine(format!("Failed to decode base64 audio: {}", e)))?;
        if audio_bytes.is_empty() {
            return Err(SpeechError::Engine("Speech service returned no audio".to_string()));
        }

        let mime_type = parsed
            .content_type
            .unwrap_or_else(|| options.format.mime_type().to_string());
        let mut audio = AudioHandle::new(Bytes::from(audio_bytes), mime_type);
        if let Some(duration) = parsed.duration {
            audio = audio.with_duration(duration);
        }

        let word_timings = match parsed.word_timings {
            Some(timings) => match validate_timings(&timings) {
                Ok(()) => timings,
                Err(e) => {
                    warn!("Discarding invalid word timings from speech service: {}", e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        Ok(SpeechOutput {
            audio,
            word_timings,
        })
    }

    /// Synthesize using an OpenAI-compatible endpoint. No alignment is returned.
    async fn synthesize_openai(
        &self,
        text: &str,
        voice: &VoiceConfig,
        options: &SpeechOptions,
    ) -> Result<SpeechOutput, SpeechError> {
        let api_key = self
            .api_key()
            .ok_or_else(|| SpeechError::Config("OpenAI API key not provided".to_string()))?;

        let voice_id = if voice.id == "default" { "alloy" } else { voice.id.as_str() };
        let request_body = json!({
            "model": self.model.as_deref().unwrap_or("tts-1"),
            "input": text,
            "voice": voice_id,
            "response_format": options.format.extension(),
            "speed": options.speed,
        });

        let url = format!("{}/v1/audio/speech", self.endpoint);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await?;

        let audio_bytes = Self::read_success(response).await?;
        if audio_bytes.is_empty() {
            return Err(SpeechError::Engine("Speech service returned no audio".to_string()));
        }

        Ok(SpeechOutput::audio_only(AudioHandle::new(
            audio_bytes,
            options.format.mime_type(),
        )))
    }

    /// Turn a non-2xx status into `SpeechError::Api` and bound the body size
    async fn read_success(response: reqwest::Response) -> Result<Bytes, SpeechError> {
        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .map(|s| {
                    if s.len() > 1000 {
                        let truncated: String = s.chars().take(1000).collect();
                        format!("{}...", truncated)
                    } else {
                        s
                    }
                })
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SpeechError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }

        if let Some(content_length) = response.content_length() {
            if content_length > MAX_RESPONSE_SIZE as u64 {
                return Err(SpeechError::Engine(format!(
                    "Response too large ({} bytes, max {} bytes)",
                    content_length, MAX_RESPONSE_SIZE
                )));
            }
        }

        let body = response.bytes().await?;
        if body.len() > MAX_RESPONSE_SIZE {
            return Err(SpeechError::Engine(format!(
                "Response too large ({} bytes, max {} bytes)",
                body.len(),
                MAX_RESPONSE_SIZE
            )));
        }
        Ok(body)
    }

    /// Retry wrapper for API calls. Only retryable errors are retried.
    async fn retry_request<F, Fut>(&self, f: F) -> Result<SpeechOutput, SpeechError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<SpeechOutput, SpeechError>>,
    {
        let mut delay = self.retry_config.initial_delay_ms;
        let mut attempt = 0;

        loop {
            match f().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.retry_config.max_retries => {
                    attempt += 1;
                    debug!(
                        "TTS API request failed ({}), retrying in {}ms (attempt {}/{})",
                        e, delay, attempt, self.retry_config.max_retries
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    delay = delay
                        .checked_mul(2)
                        .map(|d| d.min(self.retry_config.max_delay_ms))
                        .unwrap_or(self.retry_config.max_delay_ms);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn list_voices_api(&self) -> Result<Vec<String>, SpeechError> {
        let url = format!("{}/v1/voices", self.endpoint);
        let mut request = self.client.get(&url);
        if let Some(key) = self.api_key() {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let body = Self::read_success(request.send().await?).await?;
        let response_json: serde_json::Value = serde_json::from_slice(&body)
            .map_err(|e| SpeechError::Engine(format!("Failed to parse voices response: {}", e)))?;

        let voices = response_json
            .get("voices")
            .and_then(|v| v.as_array())
            .map(|voices| {
                voices
                    .iter()
                    .filter_map(|voice| {
                        voice
                            .as_str()
                            .or_else(|| voice.get("id").and_then(|id| id.as_str()))
                            .map(|id| id.to_string())
                    })
                    .filter(|id| id.len() <= 256)
                    .take(1000)
                    .collect()
            })
            .unwrap_or_default();

        Ok(voices)
    }
}

#[async_trait]
impl TtsEngine for ApiTtsEngine {
    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceConfig,
        options: &SpeechOptions,
    ) -> Result<SpeechOutput, SpeechError> {
        if text.trim().is_empty() {
            return Err(SpeechError::InvalidInput("Text cannot be empty".to_string()));
        }

        self.retry_request(|| async {
            match self.engine_type {
                ApiEngineType::Api => self.synthesize_api(text, voice, options).await,
                ApiEngineType::OpenAi => self.synthesize_openai(text, voice, options).await,
            }
        })
        .await
    }

    async fn list_voices(&self) -> Result<Vec<String>, SpeechError> {
        match self.engine_type {
            ApiEngineType::Api => self.list_voices_api().await,
            ApiEngineType::OpenAi => Ok(["alloy", "echo", "fable", "onyx", "nova", "shimmer"]
                .iter()
                .map(|v| v.to_string())
                .collect()),
        }
    }

    fn is_available(&self) -> bool {
        match self.engine_type {
            ApiEngineType::Api => !self.endpoint.is_empty(),
            ApiEngineType::OpenAi => self.api_key().is_some(),
        }
    }

    fn name(&self) -> &str {
        match self.engine_type {
            ApiEngineType::Api => "Speech API",
            ApiEngineType::OpenAi => "OpenAI TTS",
        }
    }
}
