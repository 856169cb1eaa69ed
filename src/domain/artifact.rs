//! Audio artifacts: cache identities, cache entries and playback items.

use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;

/// File extension used for every synthesized artifact
pub const AUDIO_EXTENSION: &str = "mp3";

/// Identity of a cached artifact: hex digest of the normalized synthesis text.
///
/// Only hex characters are accepted so the key is always a safe file stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap a hex digest, rejecting anything that is not a plain hex string
    pub fn from_hex(hex: impl Into<String>) -> Option<Self> {
        let hex = hex.into();
        if !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(Self(hex.to_ascii_lowercase()))
        } else {
            None
        }
    }

    /// Key for raw digest bytes
    pub fn from_digest(digest: &[u8]) -> Self {
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical file name for this key (`<key>.mp3`)
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.0, AUDIO_EXTENSION)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A file in the content cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CacheKey,

    /// Absolute or cache-relative path of the audio file
    pub path: PathBuf,

    /// Size in bytes at scan time
    pub size_bytes: u64,

    /// Last write time (file mtime); eviction order
    pub written_at: SystemTime,
}

/// Cache totals, computed by scanning the cache directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total_bytes: u64,
    pub file_count: usize,
}

/// An audio file waiting for (or undergoing) playback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackItem {
    pub path: PathBuf,
}

impl PlaybackItem {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}
