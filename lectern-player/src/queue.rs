//! Ordered playlist of queue items
//!
//! Pure data: position, shuffle and repeat bookkeeping with no playback side
//! effects. The [`QueueManager`](crate::manager::QueueManager) turns the
//! results into playback actions.

use lectern_core::{Error, QueueItem, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    #[default]
    Off,
    /// Replay the current item
    One,
    /// Wrap to the first item after the last
    All,
}

impl fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RepeatMode::Off => "off",
            RepeatMode::One => "one",
            RepeatMode::All => "all",
        };
        f.write_str(name)
    }
}

impl FromStr for RepeatMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(RepeatMode::Off),
            "one" | "single" => Ok(RepeatMode::One),
            "all" | "queue" => Ok(RepeatMode::All),
            other => Err(format!("unknown repeat mode '{}' (off, one, all)", other)),
        }
    }
}

/// What to do when the current item ends naturally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Replay the current item from the start
    Restart(usize),
    /// Play the item at this index
    Play(usize),
    /// End of the queue
    Stop,
}

/// Outcome of removing an item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Removal {
    pub index: usize,
    pub was_current: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Queue {
    items: Vec<QueueItem>,
    current_index: Option<usize>,
    shuffle: bool,
    repeat: RepeatMode,
    /// Item ids in the order to restore when shuffle is turned off
    unshuffled: Vec<String>,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&QueueItem> {
        self.items.get(index)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id() == id)
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    pub fn current(&self) -> Option<&QueueItem> {
        self.current_index.and_then(|i| self.items.get(i))
    }

    pub fn shuffle(&self) -> bool {
        self.shuffle
    }

    pub fn repeat(&self) -> RepeatMode {
        self.repeat
    }

    pub fn set_repeat(&mut self, repeat: RepeatMode) {
        self.repeat = repeat;
    }

    /// Flip between `Off` and `One`; `All` goes back to `Off`
    pub fn toggle_repeat(&mut self) -> RepeatMode {
        self.repeat = match self.repeat {
            RepeatMode::Off => RepeatMode::One,
            RepeatMode::One | RepeatMode::All => RepeatMode::Off,
        };
        self.repeat
    }

    /// Append an item. Duplicate ids are rejected and leave the queue unchanged.
    pub fn add(&mut self, item: QueueItem) -> Result<usize> {
        if self.position(item.id()).is_some() {
            return Err(Error::InvalidQueueOperation(format!(
                "Item '{}' is already queued",
                item.id()
            )));
        }
        self.unshuffled.push(item.id().to_string());
        self.items.push(item);
        Ok(self.items.len() - 1)
    }

    /// Remove by id, keeping `current_index` on a valid item.
    ///
    /// Removing an item before the current one shifts the index down.
    /// Removing the current item leaves the index on the neighbour that took
    /// its place (or the new last item); an empty queue has no current index.
    pub fn remove(&mut self, id: &str) -> Result<Removal> {
        let index = self
            .position(id)
            .ok_or_else(|| Error::InvalidQueueOperation(format!("No queued item '{}'", id)))?;

        self.items.remove(index);
        self.unshuffled.retain(|queued| queued != id);

        let was_current = self.current_index == Some(index);
        self.current_index = match self.current_index {
            _ if self.items.is_empty() => None,
            Some(current) if index < current => Some(current - 1),
            Some(current) if index == current => Some(current.min(self.items.len() - 1)),
            other => other,
        };

        Ok(Removal { index, was_current })
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.unshuffled.clear();
        self.current_index = None;
    }

    pub fn set_current(&mut self, index: Option<usize>) -> Result<()> {
        if let Some(i) = index {
            if i >= self.items.len() {
                return Err(Error::InvalidQueueOperation(format!(
                    "Index {} out of range for queue of {}",
                    i,
                    self.items.len()
                )));
            }
        }
        self.current_index = index;
        Ok(())
    }

    /// Decide what follows a natural end of the current item
    pub fn advance_target(&self) -> Advance {
        let Some(current) = self.current_index else {
            return Advance::Stop;
        };

        match self.repeat {
            RepeatMode::One => Advance::Restart(current),
            _ if current + 1 < self.items.len() => Advance::Play(current + 1),
            RepeatMode::All if !self.items.is_empty() => Advance::Play(0),
            _ => Advance::Stop,
        }
    }

    /// Index a "next" skip goes to. Wraps only under `RepeatMode::All`.
    pub fn next_index(&self) -> Option<usize> {
        match self.current_index {
            None if !self.items.is_empty() => Some(0),
            Some(current) if current + 1 < self.items.len() => Some(current + 1),
            Some(_) if self.repeat == RepeatMode::All => Some(0),
            _ => None,
        }
    }

    /// Index a "previous" skip goes to. Wraps only under `RepeatMode::All`.
    pub fn previous_index(&self) -> Option<usize> {
        match self.current_index {
            Some(current) if current > 0 => Some(current - 1),
            Some(_) if self.repeat == RepeatMode::All => self.items.len().checked_sub(1),
            _ => None,
        }
    }

    /// Item to warm the cache for while the current one plays
    pub fn upcoming(&self) -> Option<&QueueItem> {
        match self.advance_target() {
            Advance::Play(index) if Some(index) != self.current_index => self.items.get(index),
            _ => None,
        }
    }

    /// Reorder an item, keeping the current item tracked
    pub fn move_item(&mut self, from: usize, to: usize) -> Result<()> {
        let len = self.items.len();
        if from >= len || to >= len {
            return Err(Error::InvalidQueueOperation(format!(
                "Cannot move {} to {} in queue of {}",
                from, to, len
            )));
        }
        if from == to {
            return Ok(());
        }

        let current_id = self.current().map(|item| item.id().to_string());
        let item = self.items.remove(from);
        self.items.insert(to, item);
        self.relocate_current(current_id.as_deref());

        if !self.shuffle {
            self.unshuffled = self.ids();
        }
        Ok(())
    }

    /// Turn shuffle on or off using the thread-local RNG
    pub fn toggle_shuffle(&mut self) -> bool {
        self.toggle_shuffle_with(&mut rand::thread_rng())
    }

    /// Turning shuffle on moves the current item to the front and shuffles
    /// the rest (Fisher-Yates). Turning it off restores insertion order.
    /// Either way the current item stays current.
    pub fn toggle_shuffle_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> bool {
        let current_id = self.current().map(|item| item.id().to_string());

        if self.shuffle {
            let order = &self.unshuffled;
            self.items.sort_by_key(|item| {
                order
                    .iter()
                    .position(|id| id == item.id())
                    .unwrap_or(usize::MAX)
            });
            self.shuffle = false;
        } else {
            match self.current_index {
                Some(current) => {
                    let playing = self.items.remove(current);
                    self.items.shuffle(rng);
                    self.items.insert(0, playing);
                }
                None => self.items.shuffle(rng),
            }
            self.shuffle = true;
        }

        self.relocate_current(current_id.as_deref());
        self.shuffle
    }

    fn relocate_current(&mut self, current_id: Option<&str>) {
        self.current_index = current_id.and_then(|id| self.position(id));
    }

    fn ids(&self) -> Vec<String> {
        self.items.iter().map(|item| item.id().to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_core::ContentKind;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn item(id: &str) -> QueueItem {
        QueueItem::new(id, id.to_uppercase(), format!("Text of {}.", id), ContentKind::Custom).unwrap()
    }

    fn queue_of(ids: &[&str]) -> Queue {
        let mut queue = Queue::new();
        for id in ids {
            queue.add(item(id)).unwrap();
        }
        queue
    }

    fn ids(queue: &Queue) -> Vec<&str> {
        queue.items().iter().map(|i| i.id()).collect()
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut queue = queue_of(&["a", "b"]);
        assert!(matches!(queue.add(item("a")), Err(Error::InvalidQueueOperation(_))));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_remove_before_current_shifts_index() {
        let mut queue = queue_of(&["a", "b", "c"]);
        queue.set_current(Some(2)).unwrap();

        let removal = queue.remove("a").unwrap();
        assert_eq!(removal, Removal { index: 0, was_current: false });
        assert_eq!(queue.current_index(), Some(1));
        assert_eq!(queue.current().unwrap().id(), "c");
    }

    #[test]
    fn test_remove_current_keeps_valid_neighbour() {
        let mut queue = queue_of(&["a", "b", "c"]);
        queue.set_current(Some(1)).unwrap();
        assert!(queue.remove("b").unwrap().was_current);
        assert_eq!(queue.current().unwrap().id(), "c");

        queue.set_current(Some(1)).unwrap();
        assert!(queue.remove("c").unwrap().was_current);
        assert_eq!(queue.current_index(), Some(0));

        assert!(queue.remove("a").unwrap().was_current);
        assert_eq!(queue.current_index(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_remove_unknown_is_an_error() {
        let mut queue = queue_of(&["a"]);
        assert!(queue.remove("zzz").is_err());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_advance_rules() {
        let mut queue = queue_of(&["a", "b"]);
        assert_eq!(queue.advance_target(), Advance::Stop);

        queue.set_current(Some(0)).unwrap();
        assert_eq!(queue.advance_target(), Advance::Play(1));

        queue.set_current(Some(1)).unwrap();
        assert_eq!(queue.advance_target(), Advance::Stop);

        queue.set_repeat(RepeatMode::All);
        assert_eq!(queue.advance_target(), Advance::Play(0));

        queue.set_repeat(RepeatMode::One);
        assert_eq!(queue.advance_target(), Advance::Restart(1));
    }

    #[test]
    fn test_skip_indices() {
        let mut queue = queue_of(&["a", "b", "c"]);
        assert_eq!(queue.next_index(), Some(0));
        assert_eq!(queue.previous_index(), None);

        queue.set_current(Some(2)).unwrap();
        assert_eq!(queue.next_index(), None);
        assert_eq!(queue.previous_index(), Some(1));

        queue.set_repeat(RepeatMode::All);
        assert_eq!(queue.next_index(), Some(0));
        queue.set_current(Some(0)).unwrap();
        assert_eq!(queue.previous_index(), Some(2));
    }

    #[test]
    fn test_shuffle_keeps_current_first_and_restores_order() {
        let mut queue = queue_of(&["a", "b", "c", "d", "e", "f"]);
        queue.set_current(Some(3)).unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        assert!(queue.toggle_shuffle_with(&mut rng));
        assert_eq!(queue.current_index(), Some(0));
        assert_eq!(queue.current().unwrap().id(), "d");
        let mut shuffled = ids(&queue);
        shuffled.sort_unstable();
        assert_eq!(shuffled, vec!["a", "b", "c", "d", "e", "f"]);

        queue.add(item("g")).unwrap();
        assert!(!queue.toggle_shuffle_with(&mut rng));
        assert_eq!(ids(&queue), vec!["a", "b", "c", "d", "e", "f", "g"]);
        assert_eq!(queue.current().unwrap().id(), "d");
    }

    #[test]
    fn test_move_item_tracks_current() {
        let mut queue = queue_of(&["a", "b", "c"]);
        queue.set_current(Some(0)).unwrap();

        queue.move_item(0, 2).unwrap();
        assert_eq!(ids(&queue), vec!["b", "c", "a"]);
        assert_eq!(queue.current_index(), Some(2));

        queue.move_item(2, 1).unwrap();
        assert_eq!(ids(&queue), vec!["b", "a", "c"]);
        assert_eq!(queue.current_index(), Some(1));

        assert!(queue.move_item(0, 3).is_err());
    }

    #[test]
    fn test_repeat_mode_parsing() {
        assert_eq!("ALL".parse::<RepeatMode>().unwrap(), RepeatMode::All);
        assert_eq!("one".parse::<RepeatMode>().unwrap(), RepeatMode::One);
        assert!("sometimes".parse::<RepeatMode>().is_err());
        assert_eq!(RepeatMode::One.to_string(), "one");
    }
}
