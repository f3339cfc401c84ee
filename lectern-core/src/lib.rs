//! lectern-core: shared types for the lectern narration engine
//!
//! Holds the pieces every other crate agrees on:
//! - the error taxonomy surfaced to the UI layer
//! - queue items, word timings and article content
//! - configuration file loading

pub mod config;
pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{validate_timings, Article, ContentKind, PlayingRef, QueueItem, Section, WordTiming};
