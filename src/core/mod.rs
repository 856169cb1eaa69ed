//! Core pipeline logic.
//!
//! This module contains:
//! - Backoff: reconnect and retry delays
//! - ContentCache: size-bounded audio cache on disk
//! - CachedSynthesizer: the cache-checked synthesis path
//! - PlaybackQueue: serialized, cancellable playback
//! - StreamListener: reconnecting live chat listener
//! - ResponsePipeline: the driving loop
//! - Observer: metrics hooks

pub mod backoff;
pub mod cache;
pub mod listener;
pub mod observer;
pub mod pipeline;
pub mod playback;
pub mod synthesis;

// Re-export commonly used types
pub use backoff::{Backoff, RetryPolicy};
pub use cache::{CacheError, ContentCache};
pub use listener::{ConnectionState, ListenerError, ListenerMachine, StreamListener};
pub use observer::{ApiSummary, MetricsCollector, MetricsSummary, NoopObserver, PipelineObserver};
pub use pipeline::{
    placeholder_reply, CommentSource, ResponsePipeline, TickOutcome, CONFIGURATION_ERROR_REPLY,
    RATE_LIMITED_REPLY, TRANSIENT_ERROR_REPLY,
};
pub use playback::PlaybackQueue;
pub use synthesis::{cache_key, normalize_text, ArtifactError, CachedSynthesizer, SynthesizedAudio};
