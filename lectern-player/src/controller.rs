//! Playback controller
//!
//! Owns the single live [`PlaybackSession`] and is its only writer. State
//! machine: `Idle -> Loading -> Ready -> Playing <-> Paused -> Ended`, with
//! `Idle` reachable from anywhere through [`stop`](PlaybackController::stop).
//!
//! Observers subscribe to [`PlaybackEvent`]s. The owner (normally the queue
//! manager) pumps audio signals through [`handle_audio`](PlaybackController::handle_audio)
//! and reacts to the returned [`PlaybackNotice`].

use crate::audio::{AudioEvent, AudioEventSender, AudioOutput, AudioSignal, AudioSink, SessionId};
use crate::config::PlaybackConfig;
use crate::error::PlaybackError;
use crate::tracker::WordIndexTracker;
use lectern_core::{Error, Result, WordTiming};
use lectern_spk::{AudioHandle, TimingModel};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

const EVENT_BUFFER_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Loading,
    Ready,
    Playing,
    Paused,
    Ended,
}

/// What observers see
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    StateChanged(PlaybackState),
    /// The session's timing table was built or rebuilt
    TimingsChanged(Vec<WordTiming>),
    TimeUpdate { time: f64, duration: f64 },
    WordChanged(Option<usize>),
    /// Natural end of the clip. Once per end, never on `stop`.
    Ended,
    Error(String),
}

/// What the owner must act on
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackNotice {
    Ended,
    Failed(PlaybackError),
}

/// Where the session's timing table came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingSource {
    /// Alignment returned by the speech service
    Service,
    /// Synthesized from an estimated duration until the clip reports its length
    Provisional,
    /// Synthesized from the clip's real duration
    Measured,
}

/// The clip currently loaded
pub struct PlaybackSession {
    id: SessionId,
    source_text: String,
    audio: AudioHandle,
    duration: f64,
    current_time: f64,
    playing: bool,
    rate: f64,
    word_timings: Vec<WordTiming>,
    timing_source: TimingSource,
    current_word_index: Option<usize>,
    sink: Box<dyn AudioSink>,
}

impl PlaybackSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn source_text(&self) -> &str {
        &self.source_text
    }

    pub fn audio(&self) -> &AudioHandle {
        &self.audio
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn word_timings(&self) -> &[WordTiming] {
        &self.word_timings
    }

    pub fn timing_source(&self) -> TimingSource {
        self.timing_source
    }

    pub fn current_word_index(&self) -> Option<usize> {
        self.current_word_index
    }
}

impl std::fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("id", &self.id)
            .field("duration", &self.duration)
            .field("current_time", &self.current_time)
            .field("playing", &self.playing)
            .field("rate", &self.rate)
            .field("words", &self.word_timings.len())
            .field("timing_source", &self.timing_source)
            .field("current_word_index", &self.current_word_index)
            .finish()
    }
}

pub struct PlaybackController {
    config: PlaybackConfig,
    output: Arc<dyn AudioOutput>,
    timing_model: TimingModel,
    state: PlaybackState,
    session: Option<PlaybackSession>,
    rate: f64,
    tracker: WordIndexTracker,
    /// `play` was requested while the clip was still loading
    play_pending: bool,
    next_session_id: SessionId,
    audio_tx: mpsc::UnboundedSender<AudioSignal>,
    audio_rx: mpsc::UnboundedReceiver<AudioSignal>,
    events: broadcast::Sender<PlaybackEvent>,
}

impl PlaybackController {
    pub fn new(config: PlaybackConfig, output: Arc<dyn AudioOutput>) -> Result<Self> {
        config.validate().map_err(Error::Configuration)?;

        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_BUFFER_SIZE);

        Ok(Self {
            rate: config.default_rate,
            tracker: WordIndexTracker::from_config(&config),
            config,
            output,
            timing_model: TimingModel::default(),
            state: PlaybackState::Idle,
            session: None,
            play_pending: false,
            next_session_id: 1,
            audio_tx,
            audio_rx,
            events,
        })
    }

    /// Replace the heuristic used when the service gives no alignment
    pub fn with_timing_model(mut self, model: TimingModel) -> Self {
        self.timing_model = model;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    /// Sender side of the event stream, for handing out more subscriptions
    pub fn event_sender(&self) -> broadcast::Sender<PlaybackEvent> {
        self.events.clone()
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn session(&self) -> Option<&PlaybackSession> {
        self.session.as_ref()
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    pub fn current_time(&self) -> f64 {
        self.session.as_ref().map_or(0.0, |s| s.current_time)
    }

    pub fn duration(&self) -> Option<f64> {
        self.session.as_ref().map(|s| s.duration)
    }

    pub fn word_timings(&self) -> &[WordTiming] {
        self.session
            .as_ref()
            .map(|s| s.word_timings.as_slice())
            .unwrap_or(&[])
    }

    pub fn current_word_index(&self) -> Option<usize> {
        self.session.as_ref().and_then(|s| s.current_word_index)
    }

    /// Tear down any current session and start loading `audio`.
    ///
    /// `word_timings` is the service alignment; pass an empty table to have
    /// one synthesized, first from an estimated length and again once the
    /// clip reports its real duration.
    pub fn load(
        &mut self,
        audio: AudioHandle,
        source_text: impl Into<String>,
        word_timings: Vec<WordTiming>,
    ) -> Result<()> {
        self.teardown();

        let source_text = source_text.into();
        let id = self.next_session_id;
        self.next_session_id += 1;

        let events = AudioEventSender::new(id, self.audio_tx.clone());
        let mut sink = match self.output.open(&audio, events) {
            Ok(sink) => sink,
            Err(e) => {
                error!("Failed to open audio for session {}: {}", id, e);
                self.emit(PlaybackEvent::Error(e.to_string()));
                self.set_state(PlaybackState::Idle);
                return Err(e.into());
            }
        };
        sink.set_rate(self.rate);

        let (duration, word_timings, timing_source) = if word_timings.is_empty() {
            let (duration, source) = match audio.duration_hint() {
                Some(hint) => (hint, TimingSource::Measured),
                None => (
                    self.timing_model.estimate_duration(&source_text, 1.0),
                    TimingSource::Provisional,
                ),
            };
            (duration, self.timing_model.synthesize(&source_text, duration), source)
        } else {
            let duration = audio
                .duration_hint()
                .or_else(|| word_timings.last().map(|w| w.end_offset))
                .unwrap_or(0.0);
            (duration, word_timings, TimingSource::Service)
        };

        debug!(
            "Loading session {} ({} words, {:?} timings)",
            id,
            word_timings.len(),
            timing_source
        );

        self.emit(PlaybackEvent::TimingsChanged(word_timings.clone()));
        self.session = Some(PlaybackSession {
            id,
            source_text,
            audio,
            duration,
            current_time: 0.0,
            playing: false,
            rate: self.rate,
            word_timings,
            timing_source,
            current_word_index: None,
            sink,
        });
        self.set_state(PlaybackState::Loading);
        Ok(())
    }

    /// Start or resume. While loading, playback starts once the clip is ready.
    ///
    /// With nothing loaded this only logs. Fails if the audio primitive
    /// refuses to start, in which case the session is dropped.
    pub fn play(&mut self) -> Result<()> {
        match self.state {
            PlaybackState::Idle => {
                warn!("play() with no audio loaded");
                Ok(())
            }
            PlaybackState::Loading => {
                self.play_pending = true;
                Ok(())
            }
            PlaybackState::Playing => Ok(()),
            PlaybackState::Ended => {
                self.seek(0.0);
                Ok(self.start_sink()?)
            }
            PlaybackState::Ready | PlaybackState::Paused => Ok(self.start_sink()?),
        }
    }

    pub fn pause(&mut self) {
        match self.state {
            PlaybackState::Playing => {
                if let Some(session) = self.session.as_mut() {
                    session.sink.pause();
                    session.playing = false;
                }
                self.set_state(PlaybackState::Paused);
            }
            PlaybackState::Loading => self.play_pending = false,
            _ => {}
        }
    }

    pub fn toggle(&mut self) -> Result<()> {
        if self.is_playing() || (self.state == PlaybackState::Loading && self.play_pending) {
            self.pause();
            Ok(())
        } else {
            self.play()
        }
    }

    /// Jump to `time`, clamped to the clip. The highlighted word is recomputed immediately.
    pub fn seek(&mut self, time: f64) {
        if !time.is_finite() {
            warn!("Ignoring seek to {}", time);
            return;
        }

        let Some(session) = self.session.as_mut() else {
            warn!("seek() with no audio loaded");
            return;
        };

        let target = time.clamp(0.0, session.duration);
        session.sink.seek(target);
        session.current_time = target;

        let index = self.tracker.recompute(
            &session.word_timings,
            target,
            self.rate,
            Some(session.duration),
        );
        let word_changed = session.current_word_index != index;
        session.current_word_index = index;
        let duration = session.duration;

        self.emit(PlaybackEvent::TimeUpdate {
            time: target,
            duration,
        });
        if word_changed {
            self.emit(PlaybackEvent::WordChanged(index));
        }
        if self.state == PlaybackState::Ended && target < duration {
            self.set_state(PlaybackState::Paused);
        }
    }

    /// Set the playback rate, clamped to the configured range. Applies to the
    /// live session without interrupting it and carries over to later ones.
    pub fn set_rate(&mut self, rate: f64) -> f64 {
        let rate = self.config.clamp_rate(rate);
        self.rate = rate;
        if let Some(session) = self.session.as_mut() {
            session.sink.set_rate(rate);
            session.rate = rate;
        }
        debug!("Playback rate set to {}", rate);
        rate
    }

    /// Play the current clip again from the start
    pub fn restart(&mut self) -> Result<()> {
        if self.session.is_none() {
            warn!("restart() with no audio loaded");
            return Ok(());
        }
        self.seek(0.0);
        if self.state == PlaybackState::Loading {
            self.play_pending = true;
            Ok(())
        } else {
            Ok(self.start_sink()?)
        }
    }

    /// Release the audio resource and return to `Idle`. Emits no `Ended`.
    pub fn stop(&mut self) {
        let had_word = self.current_word_index().is_some();
        self.teardown();
        if had_word {
            self.emit(PlaybackEvent::WordChanged(None));
        }
        self.set_state(PlaybackState::Idle);
    }

    /// Next signal from the audio primitive
    pub async fn recv_audio(&mut self) -> Option<AudioSignal> {
        self.audio_rx.recv().await
    }

    /// Wait for one audio signal and apply it
    pub async fn process_next(&mut self) -> Option<PlaybackNotice> {
        let signal = self.recv_audio().await?;
        self.handle_audio(signal)
    }

    /// Apply an audio signal. Signals from torn-down sessions are ignored.
    pub fn handle_audio(&mut self, signal: AudioSignal) -> Option<PlaybackNotice> {
        let current = self.session.as_ref().map(|s| s.id);
        if current != Some(signal.session) {
            debug!("Dropping {:?} from stale session {}", signal.event, signal.session);
            return None;
        }

        match signal.event {
            AudioEvent::Loaded { duration } => self.on_loaded(duration),
            AudioEvent::TimeUpdate(time) => {
                self.on_time_update(time);
                None
            }
            AudioEvent::Ended => self.on_ended(),
            AudioEvent::Error(e) => Some(self.fail(e)),
        }
    }

    fn on_loaded(&mut self, duration: f64) -> Option<PlaybackNotice> {
        if self.state != PlaybackState::Loading {
            debug!("Ignoring duplicate Loaded in state {:?}", self.state);
            return None;
        }
        if !duration.is_finite() || duration <= 0.0 {
            return Some(self.fail(PlaybackError::Decode(format!(
                "invalid clip duration {}",
                duration
            ))));
        }

        let rate = self.rate;
        let session = self.session.as_mut()?;

        let resynthesize = match session.timing_source {
            TimingSource::Service => false,
            TimingSource::Provisional => true,
            TimingSource::Measured => (session.duration - duration).abs() > 1e-6,
        };
        session.duration = duration;
        let rebuilt = if resynthesize {
            session.word_timings = self.timing_model.synthesize(&session.source_text, duration);
            session.timing_source = TimingSource::Measured;
            Some(session.word_timings.clone())
        } else {
            None
        };

        let index = self.tracker.recompute(
            &session.word_timings,
            session.current_time,
            rate,
            Some(duration),
        );
        let word_changed = session.current_word_index != index;
        session.current_word_index = index;

        info!("Session {} ready ({:.2}s)", session.id, duration);
        if let Some(timings) = rebuilt {
            self.emit(PlaybackEvent::TimingsChanged(timings));
        }
        self.set_state(PlaybackState::Ready);
        if word_changed {
            self.emit(PlaybackEvent::WordChanged(index));
        }

        if std::mem::take(&mut self.play_pending) {
            if let Err(e) = self.start_sink() {
                return Some(PlaybackNotice::Failed(e));
            }
        }
        None
    }

    fn on_time_update(&mut self, time: f64) {
        if !matches!(self.state, PlaybackState::Playing | PlaybackState::Paused) || !time.is_finite() {
            return;
        }

        let rate = self.rate;
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let time = time.clamp(0.0, session.duration);
        session.current_time = time;
        let changed = self.tracker.update(
            &session.word_timings,
            time,
            rate,
            Some(session.duration),
        );
        if let Some(index) = changed {
            session.current_word_index = index;
        }
        let duration = session.duration;

        self.emit(PlaybackEvent::TimeUpdate { time, duration });
        if let Some(index) = changed {
            self.emit(PlaybackEvent::WordChanged(index));
        }
    }

    fn on_ended(&mut self) -> Option<PlaybackNotice> {
        if !matches!(self.state, PlaybackState::Playing | PlaybackState::Paused) {
            debug!("Ignoring Ended in state {:?}", self.state);
            return None;
        }

        let rate = self.rate;
        if let Some(session) = self.session.as_mut() {
            session.current_time = session.duration;
            session.playing = false;
            let index = self.tracker.recompute(
                &session.word_timings,
                session.duration,
                rate,
                Some(session.duration),
            );
            if session.current_word_index != index {
                session.current_word_index = index;
                self.emit(PlaybackEvent::WordChanged(index));
            }
        }

        self.set_state(PlaybackState::Ended);
        self.emit(PlaybackEvent::Ended);
        Some(PlaybackNotice::Ended)
    }

    /// Audio primitive failure: drop the session and clear highlight state
    fn fail(&mut self, err: PlaybackError) -> PlaybackNotice {
        error!("Playback failed: {}", err);
        self.stop();
        self.emit(PlaybackEvent::Error(err.to_string()));
        PlaybackNotice::Failed(err)
    }

    fn start_sink(&mut self) -> std::result::Result<(), PlaybackError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        if let Err(e) = session.sink.play() {
            self.fail(e.clone());
            return Err(e);
        }
        session.playing = true;
        self.set_state(PlaybackState::Playing);
        Ok(())
    }

    fn teardown(&mut self) {
        if let Some(session) = self.session.take() {
            debug!("Releasing session {}", session.id);
        }
        self.tracker.reset();
        self.play_pending = false;
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state != state {
            debug!("Playback {:?} -> {:?}", self.state, state);
            self.state = state;
            self.emit(PlaybackEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: PlaybackEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
