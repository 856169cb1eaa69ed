//! Cache-checked speech synthesis.
//!
//! The only place text is hashed and the content cache is consulted:
//! `key = sha256(normalize(text))`, cache hit → reuse the file, miss →
//! synthesize and insert. Work for one key is serialized so two concurrent
//! requests for the same text never race to synthesize and write the same
//! file.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::adapters::{SpeechSynthesizer, SynthesisError};
use crate::domain::CacheKey;

use super::cache::{key_from_path, ContentCache};

/// Why no artifact was produced
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error("Failed to store synthesized audio: {0}")]
    Storage(#[from] io::Error),
}

/// A playable artifact for some text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedAudio {
    pub key: CacheKey,
    pub path: PathBuf,
    /// Served from the cache without calling the synthesizer
    pub cache_hit: bool,
}

/// Collapse runs of whitespace and trim, so cosmetic differences share a key
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cache key for a piece of synthesis input
pub fn cache_key(text: &str) -> CacheKey {
    let digest = Sha256::digest(normalize_text(text).as_bytes());
    CacheKey::from_digest(&digest)
}

/// Synthesizer front-end that goes through the content cache
pub struct CachedSynthesizer {
    cache: Arc<ContentCache>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    /// Fallback location when the cache refuses a write
    spill_dir: PathBuf,
    key_locks: Mutex<HashMap<CacheKey, Weak<AsyncMutex<()>>>>,
}

impl CachedSynthesizer {
    pub fn new(
        cache: Arc<ContentCache>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        spill_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cache,
            synthesizer,
            spill_dir: spill_dir.into(),
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    /// Produce a playable file for `text`
    pub async fn speak(&self, text: &str) -> Result<SynthesizedAudio, ArtifactError> {
        let key = cache_key(text);
        let lock = self.lock_for(&key);
        let _guard = lock.lock().await;

        let observer = self.cache.observer();

        if let Some(entry) = self.cache.lookup(&key).await {
            debug!(key = %key, "Cache hit");
            observer.cache_hit();
            return Ok(SynthesizedAudio {
                key,
                path: entry.path,
                cache_hit: true,
            });
        }

        observer.cache_miss();
        let started = Instant::now();
        let result = match self.synthesizer.synthesize(&normalize_text(text)).await {
            Ok(audio) if audio.is_empty() => Err(SynthesisError::Unknown(
                "synthesizer returned no audio".to_string(),
            )),
            other => other,
        };
        let error = result.as_ref().err().map(ToString::to_string);
        observer.synthesizer_called(started.elapsed(), error.as_deref());
        let audio = result?;

        let path = match self.cache.insert(&key, &audio).await {
            Ok(path) => path,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to cache synthesized audio; writing uncached copy");
                self.spill(&key, &audio).await?
            }
        };

        Ok(SynthesizedAudio {
            key,
            path,
            cache_hit: false,
        })
    }

    /// Delete spilled copies left by an earlier run.
    ///
    /// Spill files are only referenced by the playback queue of the run that
    /// wrote them, so this must be called before anything is enqueued. Files
    /// not named after a cache key are left alone.
    pub async fn purge_spill(&self) -> Result<usize, io::Error> {
        let mut dir = match fs::read_dir(&self.spill_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if key_from_path(&path).is_none() || !entry.file_type().await?.is_file() {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(error = %e, path = %path.display(), "Error removing spilled audio"),
            }
        }

        if removed > 0 {
            info!(removed, dir = %self.spill_dir.display(), "Removed uncached audio from a previous run");
        }
        Ok(removed)
    }

    /// Write audio outside the cache so it can still be played
    async fn spill(&self, key: &CacheKey, audio: &[u8]) -> Result<PathBuf, io::Error> {
        fs::create_dir_all(&self.spill_dir).await?;
        let path = self.spill_dir.join(key.file_name());
        fs::write(&path, audio).await?;
        Ok(path)
    }

    /// Per-key async mutex; entries are dropped once nobody holds them
    fn lock_for(&self, key: &CacheKey) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .key_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(lock) = locks.get(key).and_then(Weak::upgrade) {
            return lock;
        }

        locks.retain(|_, weak| weak.strong_count() > 0);
        let lock = Arc::new(AsyncMutex::new(()));
        locks.insert(key.clone(), Arc::downgrade(&lock));
        lock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  hello \n\t mirror  "), "hello mirror");
        assert_eq!(normalize_text(""), "");
    }

    struct CountingSynthesizer(std::sync::atomic::AtomicUsize);

    #[async_trait::async_trait]
    impl SpeechSynthesizer for CountingSynthesizer {
        fn name(&self) -> &str {
            "counting"
        }

        async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SynthesisError> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            // Yield so a concurrent request for the same key gets a chance to run
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(text.as_bytes().to_vec())
        }
    }

    async fn speech(temp: &tempfile::TempDir) -> (CachedSynthesizer, Arc<CountingSynthesizer>) {
        let cache = ContentCache::open(temp.path().join("cache"), 1024)
            .await
            .unwrap();
        let synthesizer = Arc::new(CountingSynthesizer(Default::default()));
        let speech = CachedSynthesizer::new(
            Arc::new(cache),
            synthesizer.clone(),
            temp.path().join("output"),
        );
        (speech, synthesizer)
    }

    #[tokio::test]
    async fn test_concurrent_requests_for_same_text_synthesize_once() {
        let temp = tempfile::TempDir::new().unwrap();
        let (speech, synthesizer) = speech(&temp).await;

        let (first, second) = tokio::join!(speech.speak("same text"), speech.speak("same  text"));
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_eq!(synthesizer.0.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(first.path, second.path);
        assert_eq!((first.cache_hit, second.cache_hit), (false, true));
    }

    #[tokio::test]
    async fn test_purge_spill_keeps_foreign_files() {
        let temp = tempfile::TempDir::new().unwrap();
        let (speech, _) = speech(&temp).await;
        assert_eq!(speech.purge_spill().await.unwrap(), 0);

        let output = temp.path().join("output");
        std::fs::create_dir_all(&output).unwrap();
        std::fs::write(output.join(cache_key("old").file_name()), b"old").unwrap();
        std::fs::write(output.join("intro.mp3"), b"keep").unwrap();

        assert_eq!(speech.purge_spill().await.unwrap(), 1);
        assert!(output.join("intro.mp3").exists());
    }

    #[test]
    fn test_cache_key_is_stable() {
        let a = cache_key("The mirror sees you.");
        let b = cache_key("The  mirror sees you.\n");
        let c = cache_key("The mirror sees me.");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
    }
}
