//! Observability hooks.
//!
//! Every component reports discrete events through `PipelineObserver`.
//! `MetricsCollector` is the in-process implementation: plain counters
//! plus a derived summary. Nothing here is persisted.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use super::listener::ConnectionState;

/// Receives events from the pipeline components.
///
/// All methods default to no-ops so observers only implement what they use.
pub trait PipelineObserver: Send + Sync {
    fn connection_state_changed(&self, _from: ConnectionState, _to: ConnectionState) {}

    fn backoff_scheduled(&self, _delay: Duration) {}

    fn cache_hit(&self) {}

    fn cache_miss(&self) {}

    fn cache_evicted(&self, _count: usize) {}

    fn playback_started(&self) {}

    fn playback_finished(&self, _elapsed: Duration) {}

    fn playback_failed(&self) {}

    fn playback_cancelled(&self) {}

    /// A comment went through the pipeline; `responded` is false when no audio was queued
    fn comment_processed(&self, _username: &str, _responded: bool) {}

    fn reward_sent(&self) {}

    /// One responder request finished, `error` is set when it failed
    fn responder_called(&self, _latency: Duration, _error: Option<&str>) {}

    /// One synthesizer request finished, `error` is set when it failed
    fn synthesizer_called(&self, _latency: Duration, _error: Option<&str>) {}
}

/// Observer that ignores everything
#[derive(Debug, Default)]
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Call counters for one external API
#[derive(Debug, Default)]
struct ApiCounters {
    calls: AtomicU64,
    errors: AtomicU64,
    latency_millis: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl ApiCounters {
    fn record(&self, latency: Duration, error: Option<&str>) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.latency_millis
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);

        if let Some(error) = error {
            self.errors.fetch_add(1, Ordering::Relaxed);
            *self
                .last_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(error.to_string());
        }
    }

    fn summary(&self) -> ApiSummary {
        let calls = self.calls.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let latency = self.latency_millis.load(Ordering::Relaxed);

        ApiSummary {
            calls,
            errors,
            success_rate: percent(calls.saturating_sub(errors), calls),
            average_latency_ms: latency as f64 / calls.max(1) as f64,
            last_error: self
                .last_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

/// In-memory counters for the running pipeline
#[derive(Debug)]
pub struct MetricsCollector {
    started_at: Instant,
    connects: AtomicU64,
    disconnects: AtomicU64,
    total_comments: AtomicU64,
    total_responses: AtomicU64,
    unique_users: Mutex<HashSet<String>>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    evictions: AtomicU64,
    playbacks_started: AtomicU64,
    playbacks_failed: AtomicU64,
    playbacks_cancelled: AtomicU64,
    playback_millis: AtomicU64,
    rewards_sent: AtomicU64,
    responder: ApiCounters,
    synthesizer: ApiCounters,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            connects: AtomicU64::new(0),
            disconnects: AtomicU64::new(0),
            total_comments: AtomicU64::new(0),
            total_responses: AtomicU64::new(0),
            unique_users: Mutex::new(HashSet::new()),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            playbacks_started: AtomicU64::new(0),
            playbacks_failed: AtomicU64::new(0),
            playbacks_cancelled: AtomicU64::new(0),
            playback_millis: AtomicU64::new(0),
            rewards_sent: AtomicU64::new(0),
            responder: ApiCounters::default(),
            synthesizer: ApiCounters::default(),
        }
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    pub fn rewards_sent(&self) -> u64 {
        self.rewards_sent.load(Ordering::Relaxed)
    }

    pub fn total_comments(&self) -> u64 {
        self.total_comments.load(Ordering::Relaxed)
    }

    pub fn total_responses(&self) -> u64 {
        self.total_responses.load(Ordering::Relaxed)
    }

    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    pub fn disconnects(&self) -> u64 {
        self.disconnects.load(Ordering::Relaxed)
    }

    /// Snapshot of the derived rates
    pub fn summary(&self) -> MetricsSummary {
        let comments = self.total_comments();
        let responses = self.total_responses();
        let hits = self.cache_hits();
        let lookups = hits + self.cache_misses();
        let unique_users = self
            .unique_users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();

        MetricsSummary {
            uptime_seconds: self.started_at.elapsed().as_secs(),
            reconnects: self.disconnects(),
            comments,
            responses,
            response_rate: percent(responses, comments),
            unique_users,
            cache_hit_rate: percent(hits, lookups),
            evictions: self.evictions.load(Ordering::Relaxed),
            playbacks: self.playbacks_started.load(Ordering::Relaxed),
            failed_playbacks: self.playbacks_failed.load(Ordering::Relaxed),
            cancelled_playbacks: self.playbacks_cancelled.load(Ordering::Relaxed),
            playback_seconds: self.playback_millis.load(Ordering::Relaxed) as f64 / 1000.0,
            rewards_sent: self.rewards_sent(),
            responder: self.responder.summary(),
            synthesizer: self.synthesizer.summary(),
        }
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    part as f64 / whole.max(1) as f64 * 100.0
}

/// Derived view of the collected metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub uptime_seconds: u64,
    pub reconnects: u64,
    pub comments: u64,
    pub responses: u64,
    pub response_rate: f64,
    pub unique_users: usize,
    pub cache_hit_rate: f64,
    pub evictions: u64,
    pub playbacks: u64,
    pub failed_playbacks: u64,
    pub cancelled_playbacks: u64,
    pub playback_seconds: f64,
    pub rewards_sent: u64,
    pub responder: ApiSummary,
    pub synthesizer: ApiSummary,
}

/// Request statistics for one external API
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApiSummary {
    pub calls: u64,
    pub errors: u64,
    pub success_rate: f64,
    pub average_latency_ms: f64,
    pub last_error: Option<String>,
}

impl PipelineObserver for MetricsCollector {
    fn connection_state_changed(&self, from: ConnectionState, to: ConnectionState) {
        debug!(?from, ?to, "connection state changed");
        match to {
            ConnectionState::Connected => {
                self.connects.fetch_add(1, Ordering::Relaxed);
            }
            ConnectionState::Disconnected if from == ConnectionState::Connected => {
                self.disconnects.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    fn backoff_scheduled(&self, delay: Duration) {
        debug!(?delay, "reconnect scheduled");
    }

    fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    fn cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    fn cache_evicted(&self, count: usize) {
        debug!(count, "cache entries evicted");
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    fn playback_started(&self) {
        self.playbacks_started.fetch_add(1, Ordering::Relaxed);
    }

    fn playback_finished(&self, elapsed: Duration) {
        self.playback_millis
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    fn playback_failed(&self) {
        self.playbacks_failed.fetch_add(1, Ordering::Relaxed);
    }

    fn playback_cancelled(&self) {
        self.playbacks_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    fn comment_processed(&self, username: &str, responded: bool) {
        self.total_comments.fetch_add(1, Ordering::Relaxed);
        if responded {
            self.total_responses.fetch_add(1, Ordering::Relaxed);
        }
        self.unique_users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(username.to_string());
    }

    fn reward_sent(&self) {
        self.rewards_sent.fetch_add(1, Ordering::Relaxed);
    }

    fn responder_called(&self, latency: Duration, error: Option<&str>) {
        self.responder.record(latency, error);
    }

    fn synthesizer_called(&self, latency: Duration, error: Option<&str>) {
        self.synthesizer.record(latency, error);
    }
}
