//! Combined configuration for the lectern binary

use anyhow::{anyhow, Context};
use lectern_player::{PlaybackConfig, QueueConfig};
use lectern_spk::{ApiTtsConfig, SpeechConfig, TtsEngine};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LecternConfig {
    pub speech: SpeechConfig,
    pub playback: PlaybackConfig,
    pub queue: QueueConfig,
}

impl LecternConfig {
    /// Read from a JSON, TOML or YAML file, or start from defaults
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => lectern_core::config::load_from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display())),
            None => Ok(Self::default()),
        }
    }

    /// Apply `LECTERN_*` environment overrides
    pub fn apply_env(&mut self) {
        self.apply_overrides(lectern_core::config::env_var);
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(voice) = lookup("LECTERN_VOICE") {
            debug!("Voice from environment: {}", voice);
            self.speech.voice.id = voice;
        }

        if let Some(rate) = lookup("LECTERN_RATE") {
            match rate.trim().parse::<f64>() {
                Ok(rate) => self.playback.default_rate = rate,
                Err(_) => warn!("Ignoring LECTERN_RATE={:?}: not a number", rate),
            }
        }

        if let Some(endpoint) = lookup("LECTERN_TTS_ENDPOINT") {
            match self.speech.api_config.as_mut() {
                Some(api) => api.endpoint = endpoint,
                None => self.speech.api_config = Some(ApiTtsConfig::new(endpoint)),
            }
            if self.speech.engine == TtsEngine::Offline {
                self.speech.engine = TtsEngine::Api;
            }
        }

        if let Some(key) = lookup("LECTERN_TTS_API_KEY") {
            match self.speech.api_config.as_mut() {
                Some(api) => api.api_key = Some(key),
                None => warn!("LECTERN_TTS_API_KEY set without an endpoint; ignoring"),
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.speech
            .validate()
            .map_err(|e| anyhow!("Invalid speech config: {}", e))?;
        self.playback
            .validate()
            .map_err(|e| anyhow!("Invalid playback config: {}", e))?;
        self.queue
            .validate()
            .map_err(|e| anyhow!("Invalid queue config: {}", e))?;
        Ok(())
    }
}
