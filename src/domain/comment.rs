//! Chat comments and the raw events a live stream delivers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single chat comment observed on the live stream.
///
/// Comments are immutable once created and are consumed exactly once by
/// the response pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// What the viewer wrote
    pub text: String,

    /// Display name of the viewer
    pub username: String,

    /// When the listener observed the comment
    pub timestamp: DateTime<Utc>,
}

impl Comment {
    /// Create a comment stamped with the current time
    pub fn new(username: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            username: username.into(),
            timestamp: Utc::now(),
        }
    }
}

/// An event read off a live stream connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A viewer posted a chat comment
    Comment { username: String, text: String },

    /// Anything else the stream emits (gifts, likes, joins)
    #[serde(other)]
    Other,
}
