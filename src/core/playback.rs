//! Serialized audio playback.
//!
//! Producers push onto an unbounded FIFO and return immediately. One worker
//! task pops items in order and plays them through a `PlaybackExecutor`, so
//! at most one playback is in flight at any time. The in-flight playback is
//! raced against a cancellation token; cancelling drops the executor's
//! future, which terminates the player.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::PlaybackExecutor;
use crate::domain::PlaybackItem;

use super::observer::PipelineObserver;

/// What the worker is doing right now
#[derive(Debug, Default)]
struct PlaybackState {
    is_playing: bool,
    current: Option<PathBuf>,
    /// Present only while an item is playing
    active: Option<CancellationToken>,
}

struct Shared {
    pending: Mutex<VecDeque<PlaybackItem>>,
    state: Mutex<PlaybackState>,
    /// Wakes the worker; `notify_one` keeps a permit if the worker is busy
    wakeup: Notify,
    closed: AtomicBool,
    executor: Arc<dyn PlaybackExecutor>,
    observer: Arc<dyn PipelineObserver>,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, VecDeque<PlaybackItem>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> MutexGuard<'_, PlaybackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Next item in FIFO order; `None` once closed and drained.
    ///
    /// The item's cancellation token is installed before the pending lock is
    /// released, so `stop_current` can never miss an item that has already
    /// left the queue.
    async fn next_item(&self) -> Option<(PlaybackItem, CancellationToken)> {
        loop {
            {
                let mut pending = self.pending();
                if let Some(item) = pending.pop_front() {
                    let token = CancellationToken::new();
                    let mut state = self.state();
                    state.current = Some(item.path.clone());
                    state.active = Some(token.clone());
                    return Some((item, token));
                }
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            self.wakeup.notified().await;
        }
    }

    fn reset_state(&self) {
        let mut state = self.state();
        state.is_playing = false;
        state.current = None;
        state.active = None;
    }

    async fn play(&self, item: PlaybackItem, token: CancellationToken) {
        let path = item.path;

        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            self.reset_state();
            warn!(path = %path.display(), "Audio file not found, skipping");
            self.observer.playback_failed();
            return;
        }

        if token.is_cancelled() {
            self.reset_state();
            info!(path = %path.display(), "Playback cancelled before it started");
            self.observer.playback_cancelled();
            return;
        }

        self.state().is_playing = true;

        debug!(path = %path.display(), "Playback started");
        self.observer.playback_started();
        let started = Instant::now();

        let result = tokio::select! {
            result = self.executor.play(&path) => Some(result),
            _ = token.cancelled() => None,
        };

        self.reset_state();

        match result {
            Some(Ok(())) => {
                debug!(path = %path.display(), "Playback finished");
                self.observer.playback_finished(started.elapsed());
            }
            Some(Err(e)) => {
                warn!(path = %path.display(), error = %e, "Error playing audio");
                self.observer.playback_failed();
            }
            None => {
                info!(path = %path.display(), "Playback cancelled");
                self.observer.playback_cancelled();
            }
        }
    }
}

/// FIFO playback queue with a single active slot
pub struct PlaybackQueue {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackQueue {
    /// Create a queue. Call `start` to begin draining it.
    pub fn new(executor: Arc<dyn PlaybackExecutor>, observer: Arc<dyn PipelineObserver>) -> Self {
        Self {
            shared: Arc::new(Shared {
                pending: Mutex::new(VecDeque::new()),
                state: Mutex::new(PlaybackState::default()),
                wakeup: Notify::new(),
                closed: AtomicBool::new(false),
                executor,
                observer,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the playback worker. Idempotent.
    pub fn start(&self) {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.is_some() {
            return;
        }

        let shared = Arc::clone(&self.shared);
        info!(executor = shared.executor.name(), "Starting playback worker");
        *worker = Some(tokio::spawn(async move {
            while let Some((item, token)) = shared.next_item().await {
                shared.play(item, token).await;
            }
            debug!("Playback worker stopped");
        }));
    }

    /// Append an item. Never blocks; returns false once the queue is closed.
    pub fn enqueue(&self, item: PlaybackItem) -> bool {
        if self.shared.closed.load(Ordering::SeqCst) {
            debug!(path = %item.path.display(), "Playback queue closed, dropping item");
            return false;
        }

        self.shared.pending().push_back(item);
        self.shared.wakeup.notify_one();
        true
    }

    /// Cancel the in-flight playback, if any. Returns whether one was cancelled.
    pub fn stop_current(&self) -> bool {
        match self.shared.state().active.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop every item that has not started playing. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut pending = self.shared.pending();
        let removed = pending.len();
        pending.clear();
        removed
    }

    /// Stop accepting new items. The worker exits once the FIFO is empty.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.wakeup.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn is_playing(&self) -> bool {
        self.shared.state().is_playing
    }

    /// Path of the item currently playing
    pub fn current(&self) -> Option<PathBuf> {
        self.shared.state().current.clone()
    }

    pub fn pending_len(&self) -> usize {
        self.shared.pending().len()
    }

    /// Close the queue and wait for the worker to drain and exit
    pub async fn join(&self) {
        self.close();
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Playback worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::PlaybackError;
    use crate::core::observer::NoopObserver;
    use async_trait::async_trait;
    use std::path::Path;
    use tempfile::TempDir;

    /// Never finishes on its own
    struct HangingExecutor;

    #[async_trait]
    impl PlaybackExecutor for HangingExecutor {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn play(&self, _path: &Path) -> Result<(), PlaybackError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_stop_current_cancels_playback() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.mp3");
        tokio::fs::write(&path, b"a").await.unwrap();

        let queue = PlaybackQueue::new(Arc::new(HangingExecutor), Arc::new(NoopObserver));
        queue.start();
        assert!(!queue.stop_current());

        queue.enqueue(PlaybackItem::new(&path));
        while !queue.is_playing() {
            tokio::task::yield_now().await;
        }
        assert_eq!(queue.current(), Some(path));

        assert!(queue.stop_current());
        // Idempotent
        assert!(!queue.stop_current());

        queue.join().await;
        assert!(!queue.is_playing());
    }

    #[tokio::test]
    async fn test_stop_reaches_item_taken_but_not_started() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.mp3");
        tokio::fs::write(&path, b"a").await.unwrap();

        let metrics = Arc::new(crate::core::MetricsCollector::new());
        let queue = PlaybackQueue::new(Arc::new(HangingExecutor), metrics.clone());
        queue.enqueue(PlaybackItem::new(&path));

        // Take the item the way the worker does, without playing it yet
        let (item, token) = queue.shared.next_item().await.unwrap();
        assert_eq!(queue.current(), Some(path));
        assert!(!queue.is_playing());

        assert!(queue.stop_current());
        // Would hang forever if the executor were started
        queue.shared.play(item, token).await;

        assert!(queue.current().is_none());
        let summary = metrics.summary();
        assert_eq!(summary.cancelled_playbacks, 1);
        assert_eq!(summary.playbacks, 0);
    }

    #[tokio::test]
    async fn test_enqueue_after_close_is_rejected() {
        let queue = PlaybackQueue::new(Arc::new(HangingExecutor), Arc::new(NoopObserver));
        queue.close();

        assert!(!queue.enqueue(PlaybackItem::new("/tmp/never.mp3")));
        assert_eq!(queue.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_clear_without_worker() {
        let queue = PlaybackQueue::new(Arc::new(HangingExecutor), Arc::new(NoopObserver));
        queue.enqueue(PlaybackItem::new("/tmp/a.mp3"));
        queue.enqueue(PlaybackItem::new("/tmp/b.mp3"));

        assert_eq!(queue.clear(), 2);
        assert_eq!(queue.clear(), 0);
    }
}
