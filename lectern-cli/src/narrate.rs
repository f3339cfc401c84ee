//! Terminal rendering of a running queue

use lectern_core::WordTiming;
use lectern_player::{PlaybackEvent, QueueSnapshot};
use std::io::{self, Write};

/// Prints highlighted words as the tracker reaches them, and a header line
/// whenever the queue moves to another item
#[derive(Default)]
pub struct Narrator {
    timings: Vec<WordTiming>,
    printed: Option<usize>,
    current_item: Option<String>,
    started: bool,
    mid_line: bool,
}

impl Narrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_event(&mut self, event: &PlaybackEvent) -> io::Result<()> {
        match event {
            PlaybackEvent::TimingsChanged(timings) => {
                self.timings = timings.clone();
                self.printed = None;
            }
            PlaybackEvent::WordChanged(Some(index)) => self.print_through(*index)?,
            PlaybackEvent::Ended => self.end_line()?,
            PlaybackEvent::Error(message) => {
                self.end_line()?;
                eprintln!("playback error: {}", message);
            }
            _ => {}
        }
        Ok(())
    }

    /// Print a header when the playing item changes. Returns true once the
    /// queue has started and then run out of items.
    pub fn on_snapshot(&mut self, snapshot: &QueueSnapshot) -> io::Result<bool> {
        match snapshot.current_index {
            Some(index) => {
                self.started = true;
                let Some(item) = snapshot.items.get(index) else {
                    return Ok(false);
                };
                if self.current_item.as_deref() != Some(item.id()) {
                    self.end_line()?;
                    println!(
                        "\n>> [{}/{}] {}",
                        index + 1,
                        snapshot.items.len(),
                        item.title()
                    );
                    self.current_item = Some(item.id().to_string());
                    self.printed = None;
                }
                Ok(false)
            }
            None => {
                let finished = self.started && !snapshot.loading;
                if finished {
                    self.end_line()?;
                }
                Ok(finished)
            }
        }
    }

    // Words skipped between two updates (fast rates, coarse ticks) are still printed
    fn print_through(&mut self, index: usize) -> io::Result<()> {
        let from = match self.printed {
            Some(last) if index > last => last + 1,
            Some(last) if index == last => return Ok(()),
            _ => index,
        };
        let Some(words) = self.timings.get(from..=index) else {
            return Ok(());
        };

        let mut out = io::stdout().lock();
        for word in words {
            if word.is_whitespace() {
                continue;
            }
            let text = word.text.trim();
            write!(out, "{} ", text)?;
        }
        out.flush()?;
        self.printed = Some(index);
        self.mid_line = true;
        Ok(())
    }

    fn end_line(&mut self) -> io::Result<()> {
        if std::mem::take(&mut self.mid_line) {
            println!();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timings() -> Vec<WordTiming> {
        vec![
            WordTiming::new("One ", 0.0, 0.2),
            WordTiming::new("two ", 0.2, 0.4),
            WordTiming::new("three.", 0.4, 0.6),
        ]
    }

    #[test]
    fn test_skipped_words_are_caught_up() {
        let mut narrator = Narrator::new();
        narrator
            .on_event(&PlaybackEvent::TimingsChanged(timings()))
            .unwrap();
        narrator.on_event(&PlaybackEvent::WordChanged(Some(0))).unwrap();
        narrator.on_event(&PlaybackEvent::WordChanged(Some(2))).unwrap();
        assert_eq!(narrator.printed, Some(2));
        assert!(narrator.mid_line);

        narrator.on_event(&PlaybackEvent::Ended).unwrap();
        assert!(!narrator.mid_line);
    }

    #[test]
    fn test_out_of_range_index_is_ignored() {
        let mut narrator = Narrator::new();
        narrator
            .on_event(&PlaybackEvent::TimingsChanged(timings()))
            .unwrap();
        narrator.on_event(&PlaybackEvent::WordChanged(Some(9))).unwrap();
        assert_eq!(narrator.printed, None);
    }

    #[test]
    fn test_new_table_resets_progress() {
        let mut narrator = Narrator::new();
        narrator
            .on_event(&PlaybackEvent::TimingsChanged(timings()))
            .unwrap();
        narrator.on_event(&PlaybackEvent::WordChanged(Some(1))).unwrap();
        narrator
            .on_event(&PlaybackEvent::TimingsChanged(timings()))
            .unwrap();
        assert_eq!(narrator.printed, None);
    }
}
