//! Playback Queue Integration Tests
//!
//! FIFO order, single active playback, clearing and cancelling mid-play,
//! and skipping files that disappeared before their turn.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use mirror::adapters::{PlaybackError, PlaybackExecutor};
use mirror::core::{MetricsCollector, PlaybackQueue};
use mirror::domain::PlaybackItem;

/// Records every file it is asked to play. With a gate, each play waits for a permit.
struct RecordingExecutor {
    played: Mutex<Vec<PathBuf>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl RecordingExecutor {
    fn instant() -> Arc<Self> {
        Self::build(None)
    }

    fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
        Self::build(Some(gate))
    }

    fn build(gate: Option<Arc<Semaphore>>) -> Arc<Self> {
        Arc::new(Self {
            played: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            gate,
        })
    }

    fn played(&self) -> Vec<PathBuf> {
        self.played.lock().unwrap().clone()
    }
}

/// Decrements the active count even when the play future is dropped
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PlaybackExecutor for RecordingExecutor {
    fn name(&self) -> &str {
        "recording"
    }

    async fn play(&self, path: &Path) -> Result<(), PlaybackError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = ActiveGuard(&self.active);
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.played.lock().unwrap().push(path.to_path_buf());

        match &self.gate {
            Some(gate) => {
                let permit = gate.acquire().await.unwrap();
                permit.forget();
            }
            None => tokio::time::sleep(Duration::from_millis(5)).await,
        }
        Ok(())
    }
}

fn audio_files(temp: &TempDir, names: &[&str]) -> Vec<PathBuf> {
    names
        .iter()
        .map(|name| {
            let path = temp.path().join(format!("{}.mp3", name));
            std::fs::write(&path, name.as_bytes()).unwrap();
            path
        })
        .collect()
}

async fn wait_until_playing(queue: &PlaybackQueue, path: &Path) {
    while !queue.is_playing() || queue.current().as_deref() != Some(path) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

#[tokio::test]
async fn test_plays_in_enqueue_order_one_at_a_time() {
    let temp = TempDir::new().unwrap();
    let files = audio_files(&temp, &["a", "b", "c"]);
    let executor = RecordingExecutor::instant();
    let queue = PlaybackQueue::new(executor.clone(), Arc::new(MetricsCollector::new()));

    queue.start();
    for path in &files {
        assert!(queue.enqueue(PlaybackItem::new(path)));
    }
    queue.join().await;

    assert_eq!(executor.played(), files);
    assert_eq!(executor.max_active.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_clear_keeps_current_and_later_items_play() {
    let temp = TempDir::new().unwrap();
    let files = audio_files(&temp, &["a", "b", "c", "d"]);
    let gate = Arc::new(Semaphore::new(0));
    let executor = RecordingExecutor::gated(gate.clone());
    let queue = PlaybackQueue::new(executor.clone(), Arc::new(MetricsCollector::new()));

    queue.start();
    for path in &files[..3] {
        queue.enqueue(PlaybackItem::new(path));
    }
    wait_until_playing(&queue, &files[0]).await;

    assert_eq!(queue.clear(), 2);
    assert!(queue.is_playing());

    queue.enqueue(PlaybackItem::new(&files[3]));
    gate.add_permits(2);
    queue.join().await;

    assert_eq!(executor.played(), vec![files[0].clone(), files[3].clone()]);
}

#[tokio::test]
async fn test_stop_current_moves_on_to_next_item() {
    let temp = TempDir::new().unwrap();
    let files = audio_files(&temp, &["a", "b"]);
    let gate = Arc::new(Semaphore::new(0));
    let executor = RecordingExecutor::gated(gate.clone());
    let metrics = Arc::new(MetricsCollector::new());
    let queue = PlaybackQueue::new(executor.clone(), metrics.clone());

    queue.start();
    queue.enqueue(PlaybackItem::new(&files[0]));
    queue.enqueue(PlaybackItem::new(&files[1]));
    wait_until_playing(&queue, &files[0]).await;

    assert!(queue.stop_current());
    wait_until_playing(&queue, &files[1]).await;
    gate.add_permits(1);
    queue.join().await;

    assert_eq!(executor.played(), files);
    let summary = metrics.summary();
    assert_eq!(summary.cancelled_playbacks, 1);
    assert_eq!(summary.playbacks, 2);
    assert_eq!(executor.active.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_file_is_skipped() {
    let temp = TempDir::new().unwrap();
    let files = audio_files(&temp, &["a", "b"]);
    std::fs::remove_file(&files[0]).unwrap();

    let executor = RecordingExecutor::instant();
    let metrics = Arc::new(MetricsCollector::new());
    let queue = PlaybackQueue::new(executor.clone(), metrics.clone());

    queue.start();
    queue.enqueue(PlaybackItem::new(&files[0]));
    queue.enqueue(PlaybackItem::new(&files[1]));
    queue.join().await;

    assert_eq!(executor.played(), vec![files[1].clone()]);
    assert_eq!(metrics.summary().failed_playbacks, 1);
}

#[tokio::test]
async fn test_items_enqueued_before_start_are_kept() {
    let temp = TempDir::new().unwrap();
    let files = audio_files(&temp, &["a", "b"]);
    let executor = RecordingExecutor::instant();
    let queue = PlaybackQueue::new(executor.clone(), Arc::new(MetricsCollector::new()));

    queue.enqueue(PlaybackItem::new(&files[0]));
    queue.enqueue(PlaybackItem::new(&files[1]));
    assert_eq!(queue.pending_len(), 2);

    queue.start();
    queue.join().await;
    assert_eq!(executor.played(), files);
}
