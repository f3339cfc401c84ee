//! Clock-driven audio output
//!
//! Plays nothing. Advances a position on a tokio interval at the current rate
//! and reports it the way a real audio element would. Used by the CLI and in
//! tests, where `tokio::time::pause` makes it deterministic.

use crate::audio::{AudioEvent, AudioEventSender, AudioOutput, AudioSink};
use crate::config::PlaybackConfig;
use crate::error::PlaybackError;
use lectern_spk::AudioHandle;
use parking_lot::Mutex;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::debug;

pub struct SimulatedAudioOutput {
    tick: Duration,
}

impl SimulatedAudioOutput {
    pub fn new(tick: Duration) -> Self {
        Self { tick }
    }

    pub fn from_config(config: &PlaybackConfig) -> Self {
        Self::new(Duration::from_millis(config.tick_interval_ms.max(1)))
    }
}

impl Default for SimulatedAudioOutput {
    fn default() -> Self {
        Self::from_config(&PlaybackConfig::default())
    }
}

/// Clip length from the engine's hint, or from the WAV header
pub fn clip_duration(audio: &AudioHandle) -> Result<f64, PlaybackError> {
    if let Some(duration) = audio.duration_hint() {
        return Ok(duration);
    }

    let is_wav = audio.mime_type().contains("wav") || audio.data().starts_with(b"RIFF");
    if !is_wav {
        return Err(PlaybackError::Unsupported(format!(
            "cannot determine duration of {} without a hint",
            audio.mime_type()
        )));
    }

    let reader = hound::WavReader::new(Cursor::new(audio.data().clone()))
        .map_err(|e| PlaybackError::Decode(e.to_string()))?;
    let sample_rate = reader.spec().sample_rate;
    if sample_rate == 0 {
        return Err(PlaybackError::Decode("WAV header has a zero sample rate".to_string()));
    }

    let duration = f64::from(reader.duration()) / f64::from(sample_rate);
    if duration <= 0.0 {
        return Err(PlaybackError::Decode("clip is empty".to_string()));
    }
    Ok(duration)
}

#[derive(Debug)]
struct Clock {
    position: f64,
    playing: bool,
    rate: f64,
}

struct SimulatedSink {
    clock: Arc<Mutex<Clock>>,
    duration: f64,
    task: JoinHandle<()>,
}

impl AudioOutput for SimulatedAudioOutput {
    fn open(
        &self,
        audio: &AudioHandle,
        events: AudioEventSender,
    ) -> Result<Box<dyn AudioSink>, PlaybackError> {
        let duration = clip_duration(audio)?;
        let clock = Arc::new(Mutex::new(Clock {
            position: 0.0,
            playing: false,
            rate: 1.0,
        }));

        debug!("Simulated sink for session {} ({:.2}s)", events.session(), duration);
        let task = tokio::spawn(drive(Arc::clone(&clock), duration, self.tick, events));

        Ok(Box::new(SimulatedSink {
            clock,
            duration,
            task,
        }))
    }
}

async fn drive(clock: Arc<Mutex<Clock>>, duration: f64, tick: Duration, events: AudioEventSender) {
    if !events.send(AudioEvent::Loaded { duration }) {
        return;
    }

    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last = Instant::now();

    loop {
        ticker.tick().await;
        let now = Instant::now();
        let elapsed = now.duration_since(last).as_secs_f64();
        last = now;

        let (position, ended) = {
            let mut clock = clock.lock();
            if !clock.playing {
                continue;
            }
            clock.position = (clock.position + elapsed * clock.rate).min(duration);
            let ended = clock.position >= duration;
            if ended {
                clock.playing = false;
            }
            (clock.position, ended)
        };

        if !events.send(AudioEvent::TimeUpdate(position)) {
            break;
        }
        if ended && !events.send(AudioEvent::Ended) {
            break;
        }
    }
}

impl AudioSink for SimulatedSink {
    fn play(&mut self) -> Result<(), PlaybackError> {
        let mut clock = self.clock.lock();
        if clock.position >= self.duration {
            clock.position = 0.0;
        }
        clock.playing = true;
        Ok(())
    }

    fn pause(&mut self) {
        self.clock.lock().playing = false;
    }

    fn seek(&mut self, time: f64) {
        self.clock.lock().position = time.clamp(0.0, self.duration);
    }

    fn set_rate(&mut self, rate: f64) {
        self.clock.lock().rate = rate;
    }
}

impl Drop for SimulatedSink {
    fn drop(&mut self) {
        self.task.abort();
    }
}
