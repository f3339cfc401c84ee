//! Playback time to highlighted word
//!
//! The audio clock reports the position of the sample being decoded, which
//! runs slightly behind what the listener hears once output latency is added.
//! A small forward lookahead compensates, growing with the playback rate.

use crate::config::PlaybackConfig;
use lectern_core::WordTiming;

/// Rate-scaled lookahead, clamped to `[base, max]`
pub fn lookahead_for_rate(rate: f64, base: f64, max: f64) -> f64 {
    let rate = if rate.is_finite() && rate > 0.0 { rate } else { 1.0 };
    (base * rate).clamp(base, max.max(base))
}

/// Index of the word to highlight at `time`, or `None`.
///
/// In order: the word whose window contains `time + lookahead`; the word
/// whose window contains `time`; a word starting within the lookahead.
/// Whitespace-only entries are never returned.
pub fn find_word_index(timings: &[WordTiming], time: f64, lookahead: f64) -> Option<usize> {
    if !time.is_finite() {
        return None;
    }

    let ahead = time + lookahead;
    let speakable = || {
        timings
            .iter()
            .enumerate()
            .filter(|(_, word)| !word.is_whitespace())
    };

    speakable()
        .find(|(_, word)| word.contains(ahead))
        .or_else(|| speakable().find(|(_, word)| word.contains(time)))
        .or_else(|| {
            speakable().find(|(_, word)| word.start_offset > time && word.start_offset <= ahead)
        })
        .map(|(index, _)| index)
}

/// Last word that is not a separator
pub fn last_word_index(timings: &[WordTiming]) -> Option<usize> {
    timings.iter().rposition(|word| !word.is_whitespace())
}

/// Like [`find_word_index`], but at or past `clip_end` reports the last word
pub fn locate_word(
    timings: &[WordTiming],
    time: f64,
    lookahead: f64,
    clip_end: Option<f64>,
) -> Option<usize> {
    let end = clip_end.or_else(|| timings.last().map(|word| word.end_offset))?;
    if time >= end {
        return last_word_index(timings);
    }
    find_word_index(timings, time, lookahead)
}

/// Stateful tracker for one session.
///
/// Reports a change only when the highlighted word actually changes and
/// never moves backwards until [`reset`](Self::reset) is called for a seek
/// or a new table.
#[derive(Debug, Clone)]
pub struct WordIndexTracker {
    base_lookahead: f64,
    max_lookahead: f64,
    current: Option<usize>,
    /// Furthest word reported since the last reset
    high_water: Option<usize>,
}

impl WordIndexTracker {
    pub fn new(base_lookahead: f64, max_lookahead: f64) -> Self {
        Self {
            base_lookahead,
            max_lookahead,
            current: None,
            high_water: None,
        }
    }

    pub fn from_config(config: &PlaybackConfig) -> Self {
        Self::new(config.base_lookahead_secs, config.max_lookahead_secs)
    }

    pub fn current(&self) -> Option<usize> {
        self.current
    }

    pub fn lookahead(&self, rate: f64) -> f64 {
        lookahead_for_rate(rate, self.base_lookahead, self.max_lookahead)
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.high_water = None;
    }

    /// Feed a new playback time. Returns `Some(index)` when the highlighted
    /// word changed, `None` when it stayed the same.
    pub fn update(
        &mut self,
        timings: &[WordTiming],
        time: f64,
        rate: f64,
        clip_end: Option<f64>,
    ) -> Option<Option<usize>> {
        let lookahead = self.lookahead(rate);
        let found = locate_word(timings, time, lookahead, clip_end);

        let next = match (found, self.high_water) {
            (Some(index), Some(furthest)) if index < furthest => self.current,
            (Some(index), _) => Some(index),
            (None, _) => self.current.filter(|&index| {
                timings
                    .get(index)
                    .is_some_and(|word| time < word.end_offset + lookahead)
            }),
        };

        if let Some(index) = next {
            self.high_water = Some(self.high_water.map_or(index, |furthest| furthest.max(index)));
        }

        if next == self.current {
            None
        } else {
            self.current = next;
            Some(next)
        }
    }

    /// Recompute from scratch, as after a seek. Returns the new index.
    pub fn recompute(
        &mut self,
        timings: &[WordTiming],
        time: f64,
        rate: f64,
        clip_end: Option<f64>,
    ) -> Option<usize> {
        self.reset();
        self.update(timings, time, rate, clip_end);
        self.current
    }
}
