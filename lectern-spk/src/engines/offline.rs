//! Offline engine: silent WAV clips of the estimated speaking length
//!
//! Useful without a speech service: the playback and highlighting pipeline
//! runs exactly as it would with real audio, driven by synthesized timings.

use crate::config::{SpeechOptions, VoiceConfig};
use crate::engines::{AudioHandle, SpeechOutput, TtsEngine};
use crate::error::SpeechError;
use crate::timing::estimate_duration;
use async_trait::async_trait;
use bytes::Bytes;
use std::io::Cursor;

const SAMPLE_RATE: u32 = 8_000;

pub struct OfflineTtsEngine {
    sample_rate: u32,
}

impl OfflineTtsEngine {
    pub fn new() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
        }
    }

    fn render_silence(&self, duration: f64) -> Result<Bytes, SpeechError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let samples = (duration * self.sample_rate as f64).ceil() as u64;
        let mut cursor = Cursor::new(Vec::with_capacity(44 + samples as usize * 2));
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)
                .map_err(|e| SpeechError::Engine(format!("Failed to start WAV: {}", e)))?;
            for _ in 0..samples {
                writer
                    .write_sample(0i16)
                    .map_err(|e| SpeechError::Engine(format!("Failed to write WAV: {}", e)))?;
            }
            writer
                .finalize()
                .map_err(|e| SpeechError::Engine(format!("Failed to finish WAV: {}", e)))?;
        }

        Ok(Bytes::from(cursor.into_inner()))
    }
}

impl Default for OfflineTtsEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TtsEngine for OfflineTtsEngine {
    async fn synthesize(
        &self,
        text: &str,
        _voice: &VoiceConfig,
        options: &SpeechOptions,
    ) -> Result<SpeechOutput, SpeechError> {
        if text.trim().is_empty() {
            return Err(SpeechError::InvalidInput("Text cannot be empty".to_string()));
        }

        let duration = estimate_duration(text, options.speed as f64);
        let data = self.render_silence(duration)?;
        Ok(SpeechOutput::audio_only(AudioHandle::new(data, "audio/wav")))
    }

    async fn list_voices(&self) -> Result<Vec<String>, SpeechError> {
        Ok(vec!["default".to_string()])
    }

    fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "Offline"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offline_clip_matches_estimate() {
        let engine = OfflineTtsEngine::new();
        let text = "Hello world. This is a short test.";
        let output = engine
            .synthesize(text, &VoiceConfig::default(), &SpeechOptions::default())
            .await
            .unwrap();

        assert!(output.word_timings.is_empty());
        assert_eq!(output.audio.mime_type(), "audio/wav");

        let reader = hound::WavReader::new(Cursor::new(output.audio.data().to_vec())).unwrap();
        let seconds = reader.duration() as f64 / reader.spec().sample_rate as f64;
        let expected = estimate_duration(text, 1.0);
        assert!((seconds - expected).abs() < 0.01, "{} vs {}", seconds, expected);
    }
}
