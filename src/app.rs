//! Application context.
//!
//! Builds every component once at startup, runs the three execution contexts
//! (listener, playback worker, driving loop) and tears them down in a fixed
//! order on shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapters::{
    platform_executor, ElevenLabsSynthesizer, OpenAiResponder, PlaybackExecutor, RelaySource,
    SpeechSynthesizer, StreamSource, TextResponder,
};
use crate::config::ResolvedConfig;
use crate::core::{
    CachedSynthesizer, ContentCache, MetricsCollector, PipelineObserver, PlaybackQueue,
    ResponsePipeline, StreamListener,
};

/// Secrets and endpoints supplied by the environment
#[derive(Debug, Clone)]
pub struct Credentials {
    pub openai_api_key: String,
    pub elevenlabs_api_key: String,
    pub voice_id: String,
    /// Live channel to listen to
    pub channel: String,
    /// Address of the chat relay
    pub relay_addr: String,
}

/// The external services the pipeline talks to
pub struct Collaborators {
    pub source: Arc<dyn StreamSource>,
    pub responder: Arc<dyn TextResponder>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub executor: Arc<dyn PlaybackExecutor>,
}

impl Collaborators {
    /// Production adapters configured from settings and credentials
    pub fn from_config(config: &ResolvedConfig, credentials: &Credentials) -> Self {
        let settings = &config.settings;
        Self {
            source: Arc::new(RelaySource::new(
                credentials.relay_addr.clone(),
                credentials.channel.clone(),
                settings.chat.connection_timeout(),
            )),
            responder: Arc::new(OpenAiResponder::new(
                credentials.openai_api_key.clone(),
                settings.responder.clone(),
            )),
            synthesizer: Arc::new(ElevenLabsSynthesizer::new(
                credentials.elevenlabs_api_key.clone(),
                credentials.voice_id.clone(),
                settings.synthesizer.clone(),
            )),
            executor: Arc::new(platform_executor()),
        }
    }
}

/// All running components
pub struct MirrorApp {
    listener: Arc<StreamListener>,
    playback: Arc<PlaybackQueue>,
    pipeline: ResponsePipeline,
    metrics: Arc<MetricsCollector>,
}

impl MirrorApp {
    /// Construct every component. Nothing is started yet.
    pub async fn build(config: &ResolvedConfig, collaborators: Collaborators) -> Result<Self> {
        let settings = &config.settings;
        let metrics = Arc::new(MetricsCollector::new());
        let observer: Arc<dyn PipelineObserver> = metrics.clone();

        let cache_dir = config.cache_dir();
        let cache = ContentCache::open(&cache_dir, config.max_cache_bytes())
            .await
            .with_context(|| format!("Failed to open cache directory: {}", cache_dir.display()))?
            .with_observer(observer.clone());

        let speech = Arc::new(CachedSynthesizer::new(
            Arc::new(cache),
            collaborators.synthesizer,
            config.output_dir(),
        ));
        speech.purge_spill().await.with_context(|| {
            format!("Failed to clean output directory: {}", config.output_dir().display())
        })?;

        let listener = Arc::new(StreamListener::new(
            collaborators.source,
            settings.chat.backoff(),
            observer.clone(),
        ));

        let playback = Arc::new(PlaybackQueue::new(collaborators.executor, observer.clone()));

        let pipeline = ResponsePipeline::new(
            listener.clone(),
            collaborators.responder,
            speech,
            playback.clone(),
            observer,
        )
        .with_reward(settings.reward.clone())
        .with_tick(settings.pipeline.tick());

        Ok(Self {
            listener,
            playback,
            pipeline,
            metrics,
        })
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    /// Run until `shutdown` is cancelled, then tear everything down
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let Self {
            listener,
            playback,
            pipeline,
            metrics,
        } = self;

        playback.start();
        listener.start();
        let driver = tokio::spawn(pipeline.run(shutdown.clone()));

        shutdown.cancelled().await;
        info!("Mirror is going to sleep...");

        // The driving loop stops first so nothing new is produced
        if let Err(e) = driver.await {
            warn!(error = %e, "Driving loop panicked");
        }

        playback.close();
        playback.stop_current();
        let dropped_audio = playback.clear();
        let dropped_comments = listener.clear_queue();
        listener.stop();

        listener.join().await;
        playback.join().await;

        let summary = metrics.summary();
        info!(
            dropped_audio,
            dropped_comments,
            comments = summary.comments,
            responses = summary.responses,
            cache_hit_rate = summary.cache_hit_rate,
            responder_success_rate = summary.responder.success_rate,
            synthesizer_success_rate = summary.synthesizer.success_rate,
            "Mirror has entered rest mode"
        );
        Ok(())
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Upper bound on how long shutdown may take before the process exits anyway
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
