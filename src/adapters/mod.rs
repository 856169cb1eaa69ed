//! Adapter interfaces for external systems.
//!
//! The core pipeline only talks to these traits. Concrete adapters:
//! - `openai`: chat-completion text responder
//! - `elevenlabs`: text-to-speech synthesizer
//! - `relay`: newline-delimited JSON live chat relay over TCP
//! - `player`: per-platform subprocess audio playback

pub mod elevenlabs;
pub mod openai;
pub mod player;
pub mod relay;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::StreamEvent;

// Re-export the concrete adapters
pub use elevenlabs::ElevenLabsSynthesizer;
pub use openai::OpenAiResponder;
pub use player::{platform_executor, PlayerBackend, SubprocessExecutor};
pub use relay::RelaySource;

/// Errors from a text responder
#[derive(Debug, Clone, Error)]
pub enum ResponderError {
    #[error("Rate limited by responder")]
    RateLimited,

    #[error("Responder rejected credentials: {0}")]
    AuthFailure(String),

    #[error("Responder error: {0}")]
    Unknown(String),
}

/// Errors from a speech synthesizer
#[derive(Debug, Clone, Error)]
pub enum SynthesisError {
    #[error("Synthesis network error: {0}")]
    Network(String),

    #[error("Synthesis error: {0}")]
    Unknown(String),
}

/// Errors from a live stream connection
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Connection attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from a playback executor
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("Audio file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to start player: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Player exited with code {0}")]
    Failed(i32),
}

/// Turns a prompt into a reply
#[async_trait]
pub trait TextResponder: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// Generate a reply for a prompt
    async fn generate(&self, prompt: &str) -> Result<String, ResponderError>;
}

/// Turns text into encoded audio bytes
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    fn name(&self) -> &str;

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SynthesisError>;
}

/// Opens connections to a live chat stream
#[async_trait]
pub trait StreamSource: Send + Sync {
    fn name(&self) -> &str;

    /// Connect and complete any handshake
    async fn connect(&self) -> Result<Box<dyn StreamConnection>, StreamError>;
}

/// An open live chat connection
#[async_trait]
pub trait StreamConnection: Send {
    /// Wait for the next event. `Ok(None)` means the peer closed the stream.
    async fn next_event(&mut self) -> Result<Option<StreamEvent>, StreamError>;
}

/// Plays one audio file to completion.
///
/// Cancellation is done by dropping the `play` future: implementations
/// must release the underlying player (e.g. kill the child process) on drop.
#[async_trait]
pub trait PlaybackExecutor: Send + Sync {
    fn name(&self) -> &str;

    async fn play(&self, path: &Path) -> Result<(), PlaybackError>;
}
