//! Size-bounded, content-addressed audio cache on disk.
//!
//! One file per key (`<key>.mp3`) directly under the cache directory. There
//! is no index: the directory listing is the source of truth, and totals are
//! recomputed by scanning.
//!
//! Eviction is FIFO by write time (file mtime), not LRU. Cache hits never
//! touch the file, so a frequently reused artifact can still be evicted once
//! it is among the oldest writes.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::{CacheEntry, CacheKey, CacheStats, AUDIO_EXTENSION};

use super::observer::{NoopObserver, PipelineObserver};

/// Suffix of in-flight writes; never counted as entries
const PARTIAL_SUFFIX: &str = ".part";

/// Errors from cache writes and scans
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Artifact of {size} bytes exceeds cache capacity of {max} bytes")]
    TooLarge { size: u64, max: u64 },

    #[error("Cache still holds {total} bytes after eviction; {needed} more would exceed {max}")]
    Full { total: u64, needed: u64, max: u64 },
}

/// Content-addressed audio cache
pub struct ContentCache {
    dir: PathBuf,
    max_size_bytes: u64,
    /// Serializes eviction + write so the size bound holds across concurrent inserts
    write_lock: Mutex<()>,
    observer: Arc<dyn PipelineObserver>,
}

impl ContentCache {
    /// Open (creating if needed) a cache directory
    pub async fn open(dir: impl Into<PathBuf>, max_size_bytes: u64) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        remove_partial_files(&dir).await?;

        Ok(Self {
            dir,
            max_size_bytes,
            write_lock: Mutex::new(()),
            observer: Arc::new(NoopObserver),
        })
    }

    /// Report hits, misses and evictions to an observer
    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    pub(crate) fn observer(&self) -> &Arc<dyn PipelineObserver> {
        &self.observer
    }

    /// Canonical path for a key
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Existing entry for a key, if any. No content verification.
    pub async fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        let path = self.path_for(key);
        let metadata = fs::metadata(&path).await.ok()?;
        if !metadata.is_file() {
            return None;
        }

        Some(CacheEntry {
            key: key.clone(),
            path,
            size_bytes: metadata.len(),
            written_at: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        })
    }

    /// Store `data` under `key`, evicting the oldest entries first so the
    /// total stays within `max_size_bytes`. Overwrites an existing entry.
    pub async fn insert(&self, key: &CacheKey, data: &[u8]) -> Result<PathBuf, CacheError> {
        let size = data.len() as u64;
        if size > self.max_size_bytes {
            return Err(CacheError::TooLarge {
                size,
                max: self.max_size_bytes,
            });
        }

        let _guard = self.write_lock.lock().await;

        let (total, _) = self.evict_to_fit(size, Some(key)).await?;
        if total + size > self.max_size_bytes {
            return Err(CacheError::Full {
                total,
                needed: size,
                max: self.max_size_bytes,
            });
        }

        // Write-then-rename so readers never see a partial file under the key
        let path = self.path_for(key);
        let tmp_path = self.dir.join(format!("{}{}", key.file_name(), PARTIAL_SUFFIX));
        let written = match fs::write(&tmp_path, data).await {
            Ok(()) => fs::rename(&tmp_path, &path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        debug!(key = %key, size, "Added new file to cache");
        Ok(path)
    }

    /// Evict oldest entries until the cache is within its size bound.
    /// Returns the number of files removed.
    pub async fn cleanup(&self) -> Result<usize, CacheError> {
        let _guard = self.write_lock.lock().await;
        let (_, evicted) = self.evict_to_fit(0, None).await?;
        Ok(evicted)
    }

    /// Total size and file count
    pub async fn stats(&self) -> Result<CacheStats, CacheError> {
        let entries = self.scan().await?;
        Ok(CacheStats {
            total_bytes: entries.iter().map(|e| e.size_bytes).sum(),
            file_count: entries.len(),
        })
    }

    /// All entries, oldest write first
    pub async fn entries(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let mut entries = self.scan().await?;
        sort_oldest_first(&mut entries);
        Ok(entries)
    }

    /// Delete every entry. Individual failures are logged and skipped.
    pub async fn clear(&self) -> usize {
        let _guard = self.write_lock.lock().await;

        let entries = match self.scan().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, dir = %self.dir.display(), "Failed to scan cache for clearing");
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries {
            match fs::remove_file(&entry.path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(error = %e, path = %entry.path.display(), "Error removing cache file"),
            }
        }

        info!(removed, "Cache cleared");
        removed
    }

    /// Delete oldest entries until `total + incoming <= max`. The entry for
    /// `replacing` (about to be overwritten) is neither counted nor evicted.
    /// Each candidate is tried at most once. Returns the remaining total and
    /// the number of files removed.
    async fn evict_to_fit(
        &self,
        incoming: u64,
        replacing: Option<&CacheKey>,
    ) -> Result<(u64, usize), CacheError> {
        let mut entries = self.scan().await?;
        entries.retain(|e| Some(&e.key) != replacing);

        let mut total: u64 = entries.iter().map(|e| e.size_bytes).sum();
        if total + incoming <= self.max_size_bytes {
            return Ok((total, 0));
        }

        sort_oldest_first(&mut entries);

        let mut evicted = 0;
        for entry in entries {
            if total + incoming <= self.max_size_bytes {
                break;
            }

            match fs::remove_file(&entry.path).await {
                Ok(()) => {
                    total = total.saturating_sub(entry.size_bytes);
                    evicted += 1;
                    debug!(key = %entry.key, "Removed cached file");
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    total = total.saturating_sub(entry.size_bytes);
                }
                Err(e) => {
                    warn!(error = %e, path = %entry.path.display(), "Error removing cache file");
                }
            }
        }

        if evicted > 0 {
            info!(evicted, total_bytes = total, "Cache eviction pass finished");
            self.observer.cache_evicted(evicted);
        }

        Ok((total, evicted))
    }

    /// Scan the directory for `<hex key>.mp3` files
    async fn scan(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let mut entries = Vec::new();

        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };

        while let Some(dir_entry) = dir.next_entry().await? {
            let path = dir_entry.path();
            let Some(key) = key_from_path(&path) else {
                continue;
            };

            // File may vanish between listing and stat
            let Ok(metadata) = dir_entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }

            entries.push(CacheEntry {
                key,
                path,
                size_bytes: metadata.len(),
                written_at: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }

        Ok(entries)
    }
}

fn sort_oldest_first(entries: &mut [CacheEntry]) {
    entries.sort_by(|a, b| {
        a.written_at
            .cmp(&b.written_at)
            .then_with(|| a.key.cmp(&b.key))
    });
}

/// Drop `<key>.mp3.part` files left by writes that never finished
async fn remove_partial_files(dir: &Path) -> io::Result<usize> {
    let mut removed = 0;
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(stem) = name.strip_suffix(PARTIAL_SUFFIX) else {
            continue;
        };
        if key_from_path(Path::new(stem)).is_none() {
            continue;
        }

        match fs::remove_file(&path).await {
            Ok(()) => removed += 1,
            Err(e) => warn!(error = %e, path = %path.display(), "Error removing partial cache file"),
        }
    }

    if removed > 0 {
        info!(removed, "Removed unfinished cache writes");
    }
    Ok(removed)
}

pub(crate) fn key_from_path(path: &Path) -> Option<CacheKey> {
    let ext = path.extension()?.to_str()?;
    if !ext.eq_ignore_ascii_case(AUDIO_EXTENSION) {
        return None;
    }
    CacheKey::from_hex(path.file_stem()?.to_str()?)
}
