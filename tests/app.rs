//! Application Integration Tests
//!
//! Full wiring with stub adapters: a chat comment becomes cached audio that
//! is played, and shutdown stops every task.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use mirror::adapters::{
    PlaybackError, PlaybackExecutor, ResponderError, SpeechSynthesizer, StreamConnection,
    StreamError, StreamSource, SynthesisError, TextResponder,
};
use mirror::config::{ResolvedConfig, Settings};
use mirror::domain::StreamEvent;
use mirror::{Collaborators, MirrorApp};

/// Delivers one comment, then stays connected
struct OneCommentSource;

struct OneCommentConnection {
    sent: bool,
}

#[async_trait]
impl StreamSource for OneCommentSource {
    fn name(&self) -> &str {
        "one-comment"
    }

    async fn connect(&self) -> Result<Box<dyn StreamConnection>, StreamError> {
        Ok(Box::new(OneCommentConnection { sent: false }))
    }
}

#[async_trait]
impl StreamConnection for OneCommentConnection {
    async fn next_event(&mut self) -> Result<Option<StreamEvent>, StreamError> {
        if !self.sent {
            self.sent = true;
            return Ok(Some(StreamEvent::Comment {
                username: "ana".to_string(),
                text: "Will it rain?".to_string(),
            }));
        }
        std::future::pending::<()>().await;
        Ok(None)
    }
}

struct Oracle;

#[async_trait]
impl TextResponder for Oracle {
    fn name(&self) -> &str {
        "oracle"
    }

    async fn generate(&self, _prompt: &str) -> Result<String, ResponderError> {
        Ok("The clouds are undecided.".to_string())
    }
}

/// Accepts the request and never answers
#[derive(Default)]
struct SilentResponder {
    asked: AtomicBool,
}

#[async_trait]
impl TextResponder for SilentResponder {
    fn name(&self) -> &str {
        "silent"
    }

    async fn generate(&self, _prompt: &str) -> Result<String, ResponderError> {
        self.asked.store(true, Ordering::SeqCst);
        std::future::pending().await
    }
}

struct BytesSynthesizer;

#[async_trait]
impl SpeechSynthesizer for BytesSynthesizer {
    fn name(&self) -> &str {
        "bytes"
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SynthesisError> {
        Ok(text.as_bytes().to_vec())
    }
}

#[derive(Default)]
struct RecordingExecutor(Mutex<Vec<PathBuf>>);

#[async_trait]
impl PlaybackExecutor for RecordingExecutor {
    fn name(&self) -> &str {
        "recording"
    }

    async fn play(&self, path: &Path) -> Result<(), PlaybackError> {
        self.0.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}

fn config(temp: &TempDir) -> ResolvedConfig {
    let mut settings = Settings::default();
    settings.pipeline.tick_millis = 5;
    settings.reward.prompts.clear();
    ResolvedConfig::new(settings, temp.path().to_path_buf(), None)
}

#[tokio::test]
async fn test_comment_is_spoken_and_shutdown_completes() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp);
    let executor = Arc::new(RecordingExecutor::default());

    let app = MirrorApp::build(
        &config,
        Collaborators {
            source: Arc::new(OneCommentSource),
            responder: Arc::new(Oracle),
            synthesizer: Arc::new(BytesSynthesizer),
            executor: executor.clone(),
        },
    )
    .await
    .unwrap();
    let metrics = app.metrics();

    let shutdown = CancellationToken::new();
    let running = tokio::spawn(app.run(shutdown.clone()));

    tokio::time::timeout(Duration::from_secs(5), async {
        while executor.0.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let played = executor.0.lock().unwrap().clone();
    assert_eq!(played.len(), 1);
    assert!(played[0].starts_with(config.cache_dir()));

    let summary = metrics.summary();
    assert_eq!(summary.comments, 1);
    assert_eq!(summary.responses, 1);
    assert_eq!(summary.playbacks, 1);
}

#[tokio::test]
async fn test_build_creates_cache_directory() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp);

    MirrorApp::build(
        &config,
        Collaborators {
            source: Arc::new(OneCommentSource),
            responder: Arc::new(Oracle),
            synthesizer: Arc::new(BytesSynthesizer),
            executor: Arc::new(RecordingExecutor::default()),
        },
    )
    .await
    .unwrap();

    assert!(config.cache_dir().is_dir());
}

#[tokio::test]
async fn test_shutdown_does_not_wait_for_stuck_responder() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp);
    let responder = Arc::new(SilentResponder::default());

    let app = MirrorApp::build(
        &config,
        Collaborators {
            source: Arc::new(OneCommentSource),
            responder: responder.clone(),
            synthesizer: Arc::new(BytesSynthesizer),
            executor: Arc::new(RecordingExecutor::default()),
        },
    )
    .await
    .unwrap();
    let metrics = app.metrics();

    let shutdown = CancellationToken::new();
    let running = tokio::spawn(app.run(shutdown.clone()));

    tokio::time::timeout(Duration::from_secs(5), async {
        while !responder.asked.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), running)
        .await
        .expect("shutdown waited on the responder")
        .unwrap()
        .unwrap();

    // The abandoned comment never completed
    assert_eq!(metrics.summary().comments, 0);
}

#[tokio::test]
async fn test_build_removes_stale_spill_files() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp);
    let stale = config
        .output_dir()
        .join(mirror::core::cache_key("old reply").file_name());
    std::fs::create_dir_all(config.output_dir()).unwrap();
    std::fs::write(&stale, b"old").unwrap();

    MirrorApp::build(
        &config,
        Collaborators {
            source: Arc::new(OneCommentSource),
            responder: Arc::new(Oracle),
            synthesizer: Arc::new(BytesSynthesizer),
            executor: Arc::new(RecordingExecutor::default()),
        },
    )
    .await
    .unwrap();

    assert!(!stale.exists());
}
