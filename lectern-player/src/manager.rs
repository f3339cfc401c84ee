//! Queue manager: plays a queue through the speech generator and the
//! playback controller
//!
//! Single owner of the queue and the controller. Generation runs in spawned
//! tasks that report back tagged with a generation token; any result whose
//! token is no longer current (the user stopped, skipped or removed the item
//! meanwhile) is discarded on arrival. Natural end of a clip is the only
//! trigger for auto-advance.

use crate::config::QueueConfig;
use crate::controller::{PlaybackController, PlaybackEvent, PlaybackNotice, PlaybackState};
use crate::queue::{Advance, Queue, RepeatMode};
use lectern_core::{Error, PlayingRef, QueueItem, Result};
use lectern_spk::{CacheKey, GeneratedSpeech, SpeechError, SpeechGenerator};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

const COMMAND_BUFFER_SIZE: usize = 64;

/// Requests a UI can make
#[derive(Debug, Clone)]
pub enum QueueCommand {
    Add(QueueItem),
    Remove(String),
    Clear,
    PlayFrom(usize),
    Play,
    Pause,
    TogglePlay,
    Stop,
    Seek(f64),
    SetRate(f64),
    Next,
    Previous,
    ToggleShuffle,
    SetRepeat(RepeatMode),
    ToggleRepeat,
    MoveItem { from: usize, to: usize },
    Retry,
    Shutdown,
}

/// Everything a UI needs to render the queue and the now-playing view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueSnapshot {
    pub items: Vec<QueueItem>,
    pub current_index: Option<usize>,
    pub playing: Option<PlayingRef>,
    pub state: PlaybackState,
    pub current_time: f64,
    pub duration: Option<f64>,
    pub rate: f64,
    pub word_index: Option<usize>,
    pub audio_error: Option<String>,
    pub shuffle: bool,
    pub repeat: RepeatMode,
    /// Speech is being generated or the clip is loading
    pub loading: bool,
}

struct GenerationDone {
    token: u64,
    item_id: String,
    result: std::result::Result<GeneratedSpeech, SpeechError>,
}

pub struct QueueManager {
    config: QueueConfig,
    queue: Queue,
    controller: PlaybackController,
    generator: Arc<SpeechGenerator>,
    /// Bumped whenever an in-flight generation must no longer be applied
    generation_token: u64,
    /// Item whose speech is being generated for playback
    generating: Option<String>,
    /// Start playback as soon as the generated clip is loaded
    play_on_load: bool,
    pinned: Option<CacheKey>,
    audio_error: Option<String>,
    generation_tx: mpsc::UnboundedSender<GenerationDone>,
    generation_rx: mpsc::UnboundedReceiver<GenerationDone>,
    commands: mpsc::Receiver<QueueCommand>,
    snapshot_tx: watch::Sender<QueueSnapshot>,
}

impl QueueManager {
    pub fn new(
        config: QueueConfig,
        generator: Arc<SpeechGenerator>,
        controller: PlaybackController,
    ) -> Result<(Self, QueueHandle)> {
        config.validate().map_err(Error::Configuration)?;

        let (generation_tx, generation_rx) = mpsc::unbounded_channel();
        let (command_tx, commands) = mpsc::channel(COMMAND_BUFFER_SIZE);

        let queue = Queue::new();
        let initial = Self::build_snapshot(&queue, &controller, None, None);
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);

        let handle = QueueHandle {
            commands: command_tx,
            snapshot: snapshot_rx,
            playback_events: controller.event_sender(),
        };

        let manager = Self {
            config,
            queue,
            controller,
            generator,
            generation_token: 0,
            generating: None,
            play_on_load: false,
            pinned: None,
            audio_error: None,
            generation_tx,
            generation_rx,
            commands,
            snapshot_tx,
        };
        Ok((manager, handle))
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn controller(&self) -> &PlaybackController {
        &self.controller
    }

    pub fn audio_error(&self) -> Option<&str> {
        self.audio_error.as_deref()
    }

    pub fn is_generating(&self) -> bool {
        self.generating.is_some()
    }

    pub fn subscribe_playback(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.controller.subscribe()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        Self::build_snapshot(
            &self.queue,
            &self.controller,
            self.audio_error.clone(),
            self.generating.as_deref(),
        )
    }

    /// Append an item. Duplicates are ignored with a warning.
    pub fn add(&mut self, item: QueueItem) -> Result<()> {
        let index = match self.queue.add(item) {
            Ok(index) => index,
            Err(e) => {
                warn!("{}", e);
                return Ok(());
            }
        };
        debug!("Queued item at {}", index);

        let idle = self.queue.current_index().is_none()
            && self.generating.is_none()
            && self.controller.state() == PlaybackState::Idle;
        if self.config.autoplay_on_add && idle {
            return self.play_from(index);
        }

        self.publish();
        Ok(())
    }

    pub fn add_all(&mut self, items: impl IntoIterator<Item = QueueItem>) -> Result<()> {
        for item in items {
            self.add(item)?;
        }
        Ok(())
    }

    /// Remove by id. Removing the playing item stops playback without
    /// resuming anything; unknown ids are a logged no-op.
    pub fn remove(&mut self, id: &str) {
        let removal = match self.queue.remove(id) {
            Ok(removal) => removal,
            Err(e) => {
                warn!("{}", e);
                return;
            }
        };

        if removal.was_current || self.queue.is_empty() {
            info!("Removed the current item, stopping playback");
            self.halt();
            self.audio_error = None;
        }
        self.publish();
    }

    /// Stop and empty the queue
    pub fn clear(&mut self) {
        self.halt();
        self.queue.clear();
        self.audio_error = None;
        info!("Queue cleared");
        self.publish();
    }

    /// Generate and play the item at `index`
    pub fn play_from(&mut self, index: usize) -> Result<()> {
        let item = self
            .queue
            .get(index)
            .cloned()
            .ok_or_else(|| {
                Error::InvalidQueueOperation(format!(
                    "Index {} out of range for queue of {}",
                    index,
                    self.queue.len()
                ))
            })?;

        self.halt();
        self.queue.set_current(Some(index))?;
        self.audio_error = None;
        self.play_on_load = true;
        self.generating = Some(item.id().to_string());

        // Pinned before the engine call so the entry is never evictable
        // between landing in the cache and being loaded.
        let config = self.generator.config();
        let key = CacheKey::new(item.content(), &config.voice, &config.options);
        self.generator.cache().pin(&key);
        self.pinned = Some(key);

        let token = self.generation_token;
        info!("Playing '{}' ({}/{})", item.title(), index + 1, self.queue.len());

        let generator = Arc::clone(&self.generator);
        let tx = self.generation_tx.clone();
        tokio::spawn(async move {
            let result = generator.generate(item.content()).await;
            let _ = tx.send(GenerationDone {
                token,
                item_id: item.id().to_string(),
                result,
            });
        });

        self.publish();
        Ok(())
    }

    /// Resume, or start the current (or first) item when nothing is loaded
    pub fn play(&mut self) -> Result<()> {
        if self.controller.session().is_some() {
            let result = self.controller.play();
            self.record_playback_result(result);
            self.publish();
            return Ok(());
        }
        if self.generating.is_some() {
            self.play_on_load = true;
            return Ok(());
        }
        match self.queue.current_index() {
            Some(index) => self.play_from(index),
            None if !self.queue.is_empty() => self.play_from(0),
            None => {
                warn!("play() on an empty queue");
                Ok(())
            }
        }
    }

    pub fn pause(&mut self) {
        self.play_on_load = false;
        self.controller.pause();
        self.publish();
    }

    pub fn toggle_play(&mut self) -> Result<()> {
        let active = self.controller.is_playing() || (self.generating.is_some() && self.play_on_load);
        if active {
            self.pause();
            Ok(())
        } else {
            self.play()
        }
    }

    /// Stop playback, keeping the queue position
    pub fn stop(&mut self) {
        self.halt();
        self.publish();
    }

    pub fn seek(&mut self, time: f64) {
        self.controller.seek(time);
        self.publish();
    }

    pub fn set_rate(&mut self, rate: f64) -> f64 {
        let rate = self.controller.set_rate(rate);
        self.publish();
        rate
    }

    /// Skip to the following item. At the end of the queue this is a no-op
    /// unless repeating the whole queue.
    pub fn next(&mut self) -> Result<()> {
        match self.queue.next_index() {
            Some(index) => self.play_from(index),
            None => {
                debug!("next() at the end of the queue");
                Ok(())
            }
        }
    }

    /// Restart the current item if it is far enough in, else go back one item
    pub fn previous(&mut self) -> Result<()> {
        if self.controller.current_time() > self.config.restart_threshold_secs {
            self.seek(0.0);
            return Ok(());
        }
        match self.queue.previous_index() {
            Some(index) => self.play_from(index),
            None => {
                self.seek(0.0);
                Ok(())
            }
        }
    }

    pub fn toggle_shuffle(&mut self) -> bool {
        let shuffle = self.queue.toggle_shuffle();
        info!("Shuffle {}", if shuffle { "on" } else { "off" });
        self.publish();
        shuffle
    }

    pub fn set_repeat(&mut self, repeat: RepeatMode) {
        self.queue.set_repeat(repeat);
        self.publish();
    }

    pub fn toggle_repeat(&mut self) -> RepeatMode {
        let repeat = self.queue.toggle_repeat();
        self.publish();
        repeat
    }

    pub fn move_item(&mut self, from: usize, to: usize) -> Result<()> {
        self.queue.move_item(from, to)?;
        self.publish();
        Ok(())
    }

    /// Try the current item again, typically after a generation error
    pub fn retry(&mut self) -> Result<()> {
        match self.queue.current_index() {
            Some(index) => self.play_from(index),
            None => Err(Error::InvalidQueueOperation("Nothing to retry".to_string())),
        }
    }

    /// Wait until a generation result or audio signal arrives and apply it.
    /// Both channels stay open for the manager's lifetime since it owns their senders.
    pub async fn step(&mut self) {
        tokio::select! {
            Some(done) = self.generation_rx.recv() => self.on_generation(done),
            Some(signal) = self.controller.recv_audio() => {
                if let Some(notice) = self.controller.handle_audio(signal) {
                    self.on_notice(notice);
                }
                self.publish();
            }
        }
    }

    /// Event loop: user commands, generation results and audio signals.
    /// Ends on `Shutdown` or when every [`QueueHandle`] is dropped.
    pub async fn run(mut self) {
        info!("Queue manager started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(QueueCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(done) = self.generation_rx.recv() => self.on_generation(done),
                Some(signal) = self.controller.recv_audio() => {
                    if let Some(notice) = self.controller.handle_audio(signal) {
                        self.on_notice(notice);
                    }
                    self.publish();
                }
            }
        }
        self.halt();
        self.publish();
        info!("Queue manager stopped");
    }

    pub fn handle_command(&mut self, command: QueueCommand) {
        debug!("Command {:?}", command);
        let result = match command {
            QueueCommand::Add(item) => self.add(item),
            QueueCommand::Remove(id) => {
                self.remove(&id);
                Ok(())
            }
            QueueCommand::Clear => {
                self.clear();
                Ok(())
            }
            QueueCommand::PlayFrom(index) => self.play_from(index),
            QueueCommand::Play => self.play(),
            QueueCommand::Pause => {
                self.pause();
                Ok(())
            }
            QueueCommand::TogglePlay => self.toggle_play(),
            QueueCommand::Stop => {
                self.stop();
                Ok(())
            }
            QueueCommand::Seek(time) => {
                self.seek(time);
                Ok(())
            }
            QueueCommand::SetRate(rate) => {
                self.set_rate(rate);
                Ok(())
            }
            QueueCommand::Next => self.next(),
            QueueCommand::Previous => self.previous(),
            QueueCommand::ToggleShuffle => {
                self.toggle_shuffle();
                Ok(())
            }
            QueueCommand::SetRepeat(repeat) => {
                self.set_repeat(repeat);
                Ok(())
            }
            QueueCommand::ToggleRepeat => {
                self.toggle_repeat();
                Ok(())
            }
            QueueCommand::MoveItem { from, to } => self.move_item(from, to),
            QueueCommand::Retry => self.retry(),
            QueueCommand::Shutdown => Ok(()),
        };

        if let Err(e) = result {
            warn!("Queue command failed: {}", e);
        }
    }

    fn on_generation(&mut self, done: GenerationDone) {
        if done.token != self.generation_token {
            debug!("Discarding stale generation result for '{}'", done.item_id);
            return;
        }
        self.generating = None;

        let Some(item) = self
            .queue
            .position(&done.item_id)
            .and_then(|index| self.queue.get(index))
            .cloned()
        else {
            debug!("Generated item '{}' is no longer queued", done.item_id);
            self.unpin();
            self.publish();
            return;
        };

        match done.result {
            Ok(speech) => self.start_playback(&item, speech),
            Err(e) => {
                self.unpin();
                error!("Speech generation failed for '{}': {}", item.title(), e);
                self.audio_error = Some(Error::from(e).to_string());
            }
        }
        self.publish();
    }

    fn start_playback(&mut self, item: &QueueItem, speech: GeneratedSpeech) {
        debug!(
            "Speech for '{}' ready ({:?}, {} aligned words)",
            item.title(),
            speech.origin,
            speech.word_timings.len()
        );

        if self.pinned.as_ref() != Some(&speech.key) {
            self.unpin();
            self.generator.cache().pin(&speech.key);
            self.pinned = Some(speech.key);
        }

        if let Err(e) = self
            .controller
            .load(speech.audio, item.content(), speech.word_timings)
        {
            self.unpin();
            self.audio_error = Some(e.to_string());
            return;
        }

        if self.play_on_load {
            let result = self.controller.play();
            self.record_playback_result(result);
        }

        if self.config.prefetch_next {
            self.prefetch_upcoming();
        }
    }

    fn on_notice(&mut self, notice: PlaybackNotice) {
        match notice {
            PlaybackNotice::Ended => self.advance(),
            PlaybackNotice::Failed(e) => {
                self.unpin();
                self.audio_error = Some(Error::from(e).to_string());
            }
        }
    }

    /// Natural end of the current item
    fn advance(&mut self) {
        let result = match self.queue.advance_target() {
            Advance::Restart(_) => {
                debug!("Repeating current item");
                self.controller.restart()
            }
            Advance::Play(index) => {
                info!("Auto-advancing to item {}", index + 1);
                self.play_from(index)
            }
            Advance::Stop => {
                info!("Reached the end of the queue");
                self.halt();
                self.queue.set_current(None)
            }
        };
        self.record_playback_result(result);
    }

    fn prefetch_upcoming(&self) {
        let Some(next) = self.queue.upcoming() else {
            return;
        };

        let generator = Arc::clone(&self.generator);
        let title = next.title().to_string();
        let content = next.content().to_string();
        tokio::spawn(async move {
            match generator.generate(&content).await {
                Ok(speech) => debug!("Prefetched '{}' ({:?})", title, speech.origin),
                Err(e) => debug!("Prefetch of '{}' failed: {}", title, e),
            }
        });
    }

    /// Invalidate in-flight generation, stop playback and release the pin
    fn halt(&mut self) {
        self.generation_token += 1;
        self.generating = None;
        self.play_on_load = false;
        self.controller.stop();
        self.unpin();
    }

    fn unpin(&mut self) {
        if let Some(key) = self.pinned.take() {
            self.generator.cache().unpin(&key);
        }
    }

    fn record_playback_result(&mut self, result: Result<()>) {
        if let Err(e) = result {
            self.audio_error = Some(e.to_string());
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    fn build_snapshot(
        queue: &Queue,
        controller: &PlaybackController,
        audio_error: Option<String>,
        generating: Option<&str>,
    ) -> QueueSnapshot {
        QueueSnapshot {
            items: queue.items().to_vec(),
            current_index: queue.current_index(),
            playing: queue.current().map(QueueItem::playing_ref),
            state: controller.state(),
            current_time: controller.current_time(),
            duration: controller.duration(),
            rate: controller.rate(),
            word_index: controller.current_word_index(),
            audio_error,
            shuffle: queue.shuffle(),
            repeat: queue.repeat(),
            loading: generating.is_some() || controller.state() == PlaybackState::Loading,
        }
    }
}

/// Cloneable command surface for a running [`QueueManager`]
#[derive(Clone)]
pub struct QueueHandle {
    commands: mpsc::Sender<QueueCommand>,
    snapshot: watch::Receiver<QueueSnapshot>,
    playback_events: broadcast::Sender<PlaybackEvent>,
}

impl QueueHandle {
    pub async fn send(&self, command: QueueCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::InvalidQueueOperation("Queue manager has stopped".to_string()))
    }

    pub async fn add(&self, item: QueueItem) -> Result<()> {
        self.send(QueueCommand::Add(item)).await
    }

    pub async fn remove(&self, id: impl Into<String>) -> Result<()> {
        self.send(QueueCommand::Remove(id.into())).await
    }

    pub async fn play_from(&self, index: usize) -> Result<()> {
        self.send(QueueCommand::PlayFrom(index)).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(QueueCommand::Shutdown).await
    }

    /// Latest published state
    pub fn snapshot(&self) -> QueueSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that is notified on every change
    pub fn watch(&self) -> watch::Receiver<QueueSnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe_playback(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.playback_events.subscribe()
    }
}
