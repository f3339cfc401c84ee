//! Approximate word timing for clips that come without alignment data
//!
//! Words get a share of the clip proportional to their length, nudged by
//! length tiers and by the pause their trailing punctuation implies. The
//! constants are empirical and live in [`TimingModel`] so they can be tuned
//! against real speech.

use lectern_core::WordTiming;

/// Tunable constants of the heuristic duration model
#[derive(Debug, Clone, PartialEq)]
pub struct TimingModel {
    /// Leading silence as a fraction of the clip
    pub start_buffer_ratio: f64,
    /// Trailing silence as a fraction of the clip
    pub end_buffer_ratio: f64,
    /// Words with at most this many letters are scaled by `short_word_factor`
    pub short_word_max: usize,
    pub short_word_factor: f64,
    /// Words with at least this many letters are scaled by `long_word_factor`
    pub long_word_min: usize,
    pub long_word_factor: f64,
    /// Words with at least this many letters are scaled by `very_long_word_factor`
    pub very_long_word_min: usize,
    pub very_long_word_factor: f64,
    /// Pauses after a word, in units of one character's duration
    pub sentence_pause: f64,
    pub clause_pause: f64,
    pub word_pause: f64,
    /// Speaking speed at rate 1.0, used for duration estimates
    pub chars_per_second: f64,
}

impl Default for TimingModel {
    fn default() -> Self {
        Self {
            start_buffer_ratio: 0.04,
            end_buffer_ratio: 0.02,
            short_word_max: 2,
            short_word_factor: 0.8,
            long_word_min: 6,
            long_word_factor: 1.15,
            very_long_word_min: 9,
            very_long_word_factor: 1.3,
            sentence_pause: 6.0,
            clause_pause: 3.0,
            word_pause: 1.0,
            chars_per_second: 14.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum PauseClass {
    Sentence,
    Clause,
    Word,
}

/// Approximate timings for `text` spread over `total_duration` seconds
pub fn synthesize_timings(text: &str, total_duration: f64) -> Vec<WordTiming> {
    TimingModel::default().synthesize(text, total_duration)
}

/// Provisional clip length before the real duration is known
pub fn estimate_duration(text: &str, rate: f64) -> f64 {
    TimingModel::default().estimate_duration(text, rate)
}

impl TimingModel {
    pub fn estimate_duration(&self, text: &str, rate: f64) -> f64 {
        let rate = if rate.is_finite() { rate.max(0.25) } else { 1.0 };
        let chars = text.trim().chars().count() as f64;
        (chars / (self.chars_per_second * rate)).max(0.5)
    }

    /// Build a contiguous timing table covering exactly `[0, total_duration)`.
    ///
    /// Whitespace is folded into the neighbouring words, so joining every
    /// `text` field gives back the input.
    pub fn synthesize(&self, text: &str, total_duration: f64) -> Vec<WordTiming> {
        if !total_duration.is_finite() || total_duration <= 0.0 {
            return Vec::new();
        }

        let words = word_spans(text);
        if words.is_empty() {
            return Vec::new();
        }

        let start_buffer = total_duration * self.start_buffer_ratio;
        let end_buffer = total_duration * self.end_buffer_ratio;
        let speech_span = total_duration - start_buffer - end_buffer;

        let char_counts: Vec<usize> = words
            .iter()
            .map(|&(start, end)| text[start..end].chars().count())
            .collect();
        let total_chars: usize = char_counts.iter().sum();
        let base = speech_span / total_chars as f64;

        let last = words.len() - 1;
        let raw: Vec<f64> = words
            .iter()
            .zip(&char_counts)
            .enumerate()
            .map(|(i, (&(start, end), &chars))| {
                let word = &text[start..end];
                let spoken = chars as f64 * base * self.length_factor(letter_count(word));
                let pause = if i == last {
                    0.0
                } else {
                    base * match pause_class(word) {
                        PauseClass::Sentence => self.sentence_pause,
                        PauseClass::Clause => self.clause_pause,
                        PauseClass::Word => self.word_pause,
                    }
                };
                spoken + pause
            })
            .collect();

        let raw_total: f64 = raw.iter().sum();
        let scale = speech_span / raw_total;

        let mut starts = Vec::with_capacity(words.len());
        let mut clock = start_buffer;
        for duration in &raw {
            starts.push(clock);
            clock += duration * scale;
        }
        starts[0] = 0.0;

        let mut timings = Vec::with_capacity(words.len());
        for i in 0..words.len() {
            let text_start = if i == 0 { 0 } else { words[i].0 };
            let text_end = if i == last { text.len() } else { words[i + 1].0 };
            let end_offset = if i == last { total_duration } else { starts[i + 1] };
            timings.push(WordTiming::new(&text[text_start..text_end], starts[i], end_offset));
        }

        timings
    }

    fn length_factor(&self, letters: usize) -> f64 {
        if letters >= self.very_long_word_min {
            self.very_long_word_factor
        } else if letters >= self.long_word_min {
            self.long_word_factor
        } else if letters <= self.short_word_max {
            self.short_word_factor
        } else {
            1.0
        }
    }
}

/// Byte ranges of maximal non-whitespace runs
fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut current: Option<usize> = None;

    for (i, c) in text.char_indices() {
        match (c.is_whitespace(), current) {
            (false, None) => current = Some(i),
            (true, Some(start)) => {
                spans.push((start, i));
                current = None;
            }
            _ => {}
        }
    }
    if let Some(start) = current {
        spans.push((start, text.len()));
    }

    spans
}

fn letter_count(word: &str) -> usize {
    let letters = word.chars().filter(|c| c.is_alphanumeric()).count();
    if letters == 0 {
        word.chars().count()
    } else {
        letters
    }
}

fn pause_class(word: &str) -> PauseClass {
    let trimmed = word.trim_end_matches(|c: char| {
        matches!(c, '"' | '\'' | ')' | ']' | '}' | '\u{201D}' | '\u{2019}' | '\u{00BB}')
    });
    match trimmed.chars().last() {
        Some('.') | Some('!') | Some('?') | Some('\u{2026}') => PauseClass::Sentence,
        Some(',') | Some(';') | Some(':') | Some('\u{2014}') | Some('\u{2013}') => PauseClass::Clause,
        _ => PauseClass::Word,
    }
}
