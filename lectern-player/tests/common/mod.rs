//! Shared test doubles: an audio output driven by the test and a speech
//! generator backed by a closure engine

#![allow(dead_code)]

use bytes::Bytes;
use lectern_core::{ContentKind, QueueItem};
use lectern_player::{
    AudioEvent, AudioEventSender, AudioOutput, AudioSink, PlaybackConfig, PlaybackController,
    PlaybackError, QueueConfig, QueueHandle, QueueManager,
};
use lectern_spk::engines::custom::CustomTtsEngine;
use lectern_spk::{AudioHandle, SpeechConfig, SpeechError, SpeechGenerator, SpeechOutput};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// What a sink was told to do, by session
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Opened(u64),
    Play(u64),
    Pause(u64),
    Seek(u64, f64),
    Rate(u64, f64),
    Released(u64),
}

#[derive(Default)]
struct ScriptState {
    senders: Vec<AudioEventSender>,
    calls: Vec<SinkCall>,
    fail_open: bool,
}

/// Audio output whose events are pushed by the test
#[derive(Clone, Default)]
pub struct ScriptedOutput {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `open` fail
    pub fn fail_next_open(&self) {
        self.state.lock().fail_open = true;
    }

    /// Send an event from the most recently opened sink
    pub fn emit(&self, event: AudioEvent) {
        let state = self.state.lock();
        let sender = state.senders.last().expect("no sink opened");
        sender.send(event);
    }

    /// Send an event as if from an earlier session
    pub fn emit_from(&self, session: u64, event: AudioEvent) {
        let state = self.state.lock();
        let sender = state
            .senders
            .iter()
            .find(|s| s.session() == session)
            .expect("unknown session");
        sender.send(event);
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.state.lock().calls.clone()
    }

    pub fn opened(&self) -> usize {
        self.state.lock().senders.len()
    }

    pub fn last_session(&self) -> Option<u64> {
        self.state.lock().senders.last().map(|s| s.session())
    }
}

struct ScriptedSink {
    session: u64,
    state: Arc<Mutex<ScriptState>>,
}

impl AudioOutput for ScriptedOutput {
    fn open(
        &self,
        _audio: &AudioHandle,
        events: AudioEventSender,
    ) -> Result<Box<dyn AudioSink>, PlaybackError> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.fail_open) {
            return Err(PlaybackError::Device("no output device".to_string()));
        }
        let session = events.session();
        state.calls.push(SinkCall::Opened(session));
        state.senders.push(events);
        Ok(Box::new(ScriptedSink {
            session,
            state: Arc::clone(&self.state),
        }))
    }
}

impl AudioSink for ScriptedSink {
    fn play(&mut self) -> Result<(), PlaybackError> {
        self.state.lock().calls.push(SinkCall::Play(self.session));
        Ok(())
    }

    fn pause(&mut self) {
        self.state.lock().calls.push(SinkCall::Pause(self.session));
    }

    fn seek(&mut self, time: f64) {
        self.state.lock().calls.push(SinkCall::Seek(self.session, time));
    }

    fn set_rate(&mut self, rate: f64) {
        self.state.lock().calls.push(SinkCall::Rate(self.session, rate));
    }
}

impl Drop for ScriptedSink {
    fn drop(&mut self) {
        self.state.lock().calls.push(SinkCall::Released(self.session));
    }
}

/// Generator whose engine returns a 1s-per-10-chars clip with no alignment.
/// Texts containing "FAIL" fail with a network error.
pub fn counting_generator(calls: Arc<AtomicUsize>) -> Arc<SpeechGenerator> {
    let engine = CustomTtsEngine::new("scripted", move |text, _voice, _options| {
        calls.fetch_add(1, Ordering::SeqCst);
        if text.contains("FAIL") {
            return Err(SpeechError::Network("service unreachable".to_string()));
        }
        let duration = (text.chars().count() as f64 / 10.0).max(0.5);
        Ok(SpeechOutput::audio_only(
            AudioHandle::new(Bytes::from(text.as_bytes().to_vec()), "audio/mpeg")
                .with_duration(duration),
        ))
    });
    Arc::new(SpeechGenerator::with_engine(SpeechConfig::default(), Arc::new(engine)).unwrap())
}

pub fn item(id: &str, title: &str, content: &str) -> QueueItem {
    QueueItem::new(id, title, content, ContentKind::Section).unwrap()
}

pub struct Harness {
    pub manager: QueueManager,
    pub handle: QueueHandle,
    pub output: ScriptedOutput,
    pub generator: Arc<SpeechGenerator>,
    pub engine_calls: Arc<AtomicUsize>,
}

pub fn harness(queue_config: QueueConfig) -> Harness {
    let engine_calls = Arc::new(AtomicUsize::new(0));
    let generator = counting_generator(Arc::clone(&engine_calls));
    harness_with_generator(queue_config, generator, engine_calls)
}

pub fn harness_with_generator(
    queue_config: QueueConfig,
    generator: Arc<SpeechGenerator>,
    engine_calls: Arc<AtomicUsize>,
) -> Harness {
    let output = ScriptedOutput::new();
    let controller =
        PlaybackController::new(PlaybackConfig::default(), Arc::new(output.clone())).unwrap();
    let (manager, handle) =
        QueueManager::new(queue_config, Arc::clone(&generator), controller).unwrap();
    Harness {
        manager,
        handle,
        output,
        generator,
        engine_calls,
    }
}

/// Generator whose clips are `clip_bytes` long, with a cache budget of `cache_mb`
pub fn bulky_generator(clip_bytes: usize, cache_mb: u64, calls: Arc<AtomicUsize>) -> Arc<SpeechGenerator> {
    let engine = CustomTtsEngine::new("bulky", move |_text, _voice, _options| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(SpeechOutput::audio_only(
            AudioHandle::new(Bytes::from(vec![0u8; clip_bytes]), "audio/mpeg").with_duration(2.0),
        ))
    });
    let config = SpeechConfig {
        max_cache_size_mb: cache_mb,
        ..SpeechConfig::default()
    };
    Arc::new(SpeechGenerator::with_engine(config, Arc::new(engine)).unwrap())
}

/// Queue config without background prefetch, so engine calls are predictable
pub fn quiet_config() -> QueueConfig {
    QueueConfig {
        prefetch_next: false,
        ..QueueConfig::default()
    }
}
