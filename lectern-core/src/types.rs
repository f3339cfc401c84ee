//! Data model shared by the speech and playback crates

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a queue item's text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// Whole-article summary (clean text)
    Summary,
    /// One section of an article
    Section,
    /// Free text entered by the user
    Custom,
}

/// A single unit of text that can be queued for narration.
///
/// Items are immutable once created; the queue owns them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    id: String,
    title: String,
    content: String,
    kind: ContentKind,
}

impl QueueItem {
    /// Create an item with an explicit id. Content must contain non-whitespace text.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        kind: ContentKind,
    ) -> Result<Self> {
        let id = id.into();
        let content = content.into();

        if id.is_empty() {
            return Err(Error::InvalidQueueOperation("Item id cannot be empty".to_string()));
        }
        if content.trim().is_empty() {
            return Err(Error::InvalidQueueOperation(format!(
                "Item '{}' has no content",
                id
            )));
        }

        Ok(Self {
            id,
            title: title.into(),
            content,
            kind,
        })
    }

    /// Free text with a generated id
    pub fn custom(title: impl Into<String>, content: impl Into<String>) -> Result<Self> {
        Self::new(Uuid::new_v4().to_string(), title, content, ContentKind::Custom)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    /// Reference the UI uses to mark this item as "now playing"
    pub fn playing_ref(&self) -> PlayingRef {
        PlayingRef {
            kind: self.kind,
            item_id: self.id.clone(),
        }
    }
}

/// Tagged reference to the item being narrated
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayingRef {
    pub kind: ContentKind,
    pub item_id: String,
}

/// When one word is spoken within a clip, in seconds from clip start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub text: String,
    #[serde(alias = "start")]
    pub start_offset: f64,
    #[serde(alias = "end")]
    pub end_offset: f64,
}

impl WordTiming {
    pub fn new(text: impl Into<String>, start_offset: f64, end_offset: f64) -> Self {
        Self {
            text: text.into(),
            start_offset,
            end_offset,
        }
    }

    /// Half-open window test: `start <= t < end`
    pub fn contains(&self, time: f64) -> bool {
        time >= self.start_offset && time < self.end_offset
    }

    pub fn duration(&self) -> f64 {
        self.end_offset - self.start_offset
    }

    /// Separator entries carry no speakable text and are never highlighted
    pub fn is_whitespace(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Overlap allowed between neighbouring windows, for rounding in service output
const OVERLAP_TOLERANCE: f64 = 1e-6;

/// Check that a timing table is usable: finite, non-negative, `start <= end`,
/// non-decreasing in start offset, and no word starting before the previous one ends.
pub fn validate_timings(timings: &[WordTiming]) -> Result<()> {
    let mut previous_start = 0.0_f64;
    let mut previous_end = 0.0_f64;
    for (i, timing) in timings.iter().enumerate() {
        if !timing.start_offset.is_finite() || !timing.end_offset.is_finite() {
            return Err(Error::Serialization(format!("Timing {} is not finite", i)));
        }
        if timing.start_offset < 0.0 {
            return Err(Error::Serialization(format!("Timing {} starts before 0", i)));
        }
        if timing.end_offset < timing.start_offset {
            return Err(Error::Serialization(format!("Timing {} ends before it starts", i)));
        }
        if timing.start_offset < previous_start {
            return Err(Error::Serialization(format!("Timing {} is out of order", i)));
        }
        if timing.start_offset + OVERLAP_TOLERANCE < previous_end {
            return Err(Error::Serialization(format!(
                "Timing {} overlaps the previous word",
                i
            )));
        }
        previous_start = timing.start_offset;
        previous_end = timing.end_offset;
    }
    Ok(())
}

/// One titled section of extracted article content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub content: String,
}

/// Article as delivered by the content extraction pipeline
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub title: String,
    pub text: String,
    #[serde(default)]
    pub clean_text: Option<String>,
    #[serde(default)]
    pub sections: Vec<Section>,
}

impl Article {
    /// Summary item (clean text preferred) followed by one item per section.
    /// Empty sections are skipped.
    pub fn queue_items(&self) -> Vec<QueueItem> {
        let mut items = Vec::with_capacity(self.sections.len() + 1);

        let summary = self
            .clean_text
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(&self.text);
        if let Ok(item) = QueueItem::new(
            Uuid::new_v4().to_string(),
            self.title.clone(),
            summary,
            ContentKind::Summary,
        ) {
            items.push(item);
        }

        for section in &self.sections {
            let title = if section.title.is_empty() {
                self.title.clone()
            } else {
                format!("{}: {}", self.title, section.title)
            };
            match QueueItem::new(
                Uuid::new_v4().to_string(),
                title,
                section.content.clone(),
                ContentKind::Section,
            ) {
                Ok(item) => items.push(item),
                Err(_) => tracing::debug!("Skipping empty section '{}'", section.title),
            }
        }

        items
    }
}
