//! The driving loop: comment → reply → speech → playback.
//!
//! Each tick handles at most one comment and then checks the idle reward
//! timer, so within a tick a comment response is always enqueued before a
//! reward prompt. Failures only drop the unit of work they affect.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::IndexedRandom;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{ResponderError, TextResponder};
use crate::config::RewardConfig;
use crate::domain::{Comment, PlaybackItem};

use super::listener::StreamListener;
use super::observer::PipelineObserver;
use super::playback::PlaybackQueue;
use super::synthesis::CachedSynthesizer;

/// Reply used when the responder is rate limited
pub const RATE_LIMITED_REPLY: &str =
    "The mirror's energy is temporarily depleted. Please wait a moment...";

/// Reply used when the responder rejects our credentials
pub const CONFIGURATION_ERROR_REPLY: &str =
    "The mirror's connection to the ethereal plane is disrupted. Please check the configuration.";

/// Reply used for any other responder failure
pub const TRANSIENT_ERROR_REPLY: &str = "The mirror's vision is clouded. Try again in a moment.";

/// Placeholder text spoken in place of a failed reply
pub fn placeholder_reply(error: &ResponderError) -> &'static str {
    match error {
        ResponderError::RateLimited => RATE_LIMITED_REPLY,
        ResponderError::AuthFailure(_) => CONFIGURATION_ERROR_REPLY,
        ResponderError::Unknown(_) => TRANSIENT_ERROR_REPLY,
    }
}

/// Anything the pipeline can pull comments from without waiting
pub trait CommentSource: Send + Sync {
    fn poll_comment(&self) -> Option<Comment>;
}

impl CommentSource for StreamListener {
    fn poll_comment(&self) -> Option<Comment> {
        StreamListener::poll_comment(self)
    }
}

/// What one iteration of the loop did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// `Some(true)` if a comment produced queued audio, `Some(false)` if it was dropped
    pub comment: Option<bool>,
    pub reward_sent: bool,
}

/// Orchestrates responder, synthesizer and playback
pub struct ResponsePipeline {
    comments: Arc<dyn CommentSource>,
    responder: Arc<dyn TextResponder>,
    speech: Arc<CachedSynthesizer>,
    playback: Arc<PlaybackQueue>,
    reward: RewardConfig,
    tick: Duration,
    observer: Arc<dyn PipelineObserver>,
    last_reward: Instant,
}

impl ResponsePipeline {
    pub fn new(
        comments: Arc<dyn CommentSource>,
        responder: Arc<dyn TextResponder>,
        speech: Arc<CachedSynthesizer>,
        playback: Arc<PlaybackQueue>,
        observer: Arc<dyn PipelineObserver>,
    ) -> Self {
        Self {
            comments,
            responder,
            speech,
            playback,
            reward: RewardConfig::default(),
            tick: Duration::from_millis(100),
            observer,
            last_reward: Instant::now(),
        }
    }

    pub fn with_reward(mut self, reward: RewardConfig) -> Self {
        self.reward = reward;
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Run until `shutdown` is cancelled
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Mirror awakening, starting main loop");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            // A slow responder must not hold shutdown hostage; the in-flight tick is dropped
            tokio::select! {
                _ = self.tick_once() => {}
                _ = shutdown.cancelled() => break,
            }

            tokio::select! {
                _ = tokio::time::sleep(self.tick) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        info!("Main loop stopped");
    }

    /// One iteration: at most one comment, then the reward timer
    pub async fn tick_once(&mut self) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        if let Some(comment) = self.comments.poll_comment() {
            outcome.comment = Some(self.handle_comment(&comment).await);
        }

        if self.last_reward.elapsed() > self.reward.interval() {
            // The timer only resets on success so a failed reward is retried next tick
            if self.handle_reward().await {
                self.last_reward = Instant::now();
                outcome.reward_sent = true;
            }
        }

        outcome
    }

    /// Reply to one comment. Returns true if audio was queued.
    #[instrument(skip(self, comment), fields(username = %comment.username))]
    async fn handle_comment(&self, comment: &Comment) -> bool {
        info!(text = %comment.text, "Comment");

        let started = Instant::now();
        let result = self.responder.generate(&comment.text).await;
        let error = result.as_ref().err().map(ToString::to_string);
        self.observer
            .responder_called(started.elapsed(), error.as_deref());

        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, responder = self.responder.name(), "Responder failed, using placeholder");
                placeholder_reply(&e).to_string()
            }
        };

        let reply = reply.trim();
        if reply.is_empty() {
            info!("Responder gave no usable reply, dropping comment");
            self.observer.comment_processed(&comment.username, false);
            return false;
        }

        info!(%reply, "Mirror replies");
        let queued = self.speak(reply).await;
        self.observer.comment_processed(&comment.username, queued);
        queued
    }

    /// Speak a random reward prompt. Returns true if audio was queued.
    async fn handle_reward(&self) -> bool {
        let Some(prompt) = self.pick_prompt() else {
            debug!("No reward prompts configured");
            return false;
        };

        info!(%prompt, "Reward prompt");
        let queued = self.speak(&prompt).await;
        if queued {
            self.observer.reward_sent();
        }
        queued
    }

    fn pick_prompt(&self) -> Option<String> {
        self.reward.prompts.choose(&mut rand::rng()).cloned()
    }

    /// Cache-checked synthesis followed by enqueue
    async fn speak(&self, text: &str) -> bool {
        match self.speech.speak(text).await {
            Ok(audio) => {
                debug!(key = %audio.key, cache_hit = audio.cache_hit, "Audio ready");
                self.playback.enqueue(PlaybackItem::new(audio.path))
            }
            Err(e) => {
                warn!(error = %e, "No audio produced");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_mapping() {
        assert_eq!(
            placeholder_reply(&ResponderError::RateLimited),
            RATE_LIMITED_REPLY
        );
        assert_eq!(
            placeholder_reply(&ResponderError::AuthFailure("bad key".to_string())),
            CONFIGURATION_ERROR_REPLY
        );
        assert_eq!(
            placeholder_reply(&ResponderError::Unknown("boom".to_string())),
            TRANSIENT_ERROR_REPLY
        );
    }
}
