//! Domain types for the mirror pipeline.
//!
//! This module contains the plain data passed between components:
//! - Comment: a chat message from the live stream
//! - Artifact: cache keys, cache entries and playback items

pub mod artifact;
pub mod comment;

// Re-export commonly used types
pub use artifact::{CacheEntry, CacheKey, CacheStats, PlaybackItem, AUDIO_EXTENSION};
pub use comment::{Comment, StreamEvent};
