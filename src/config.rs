//! Configuration for the mirror pipeline.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (MIRROR_HOME, plus credentials read by the CLI)
//! 2. Config file (.mirror/config.yaml)
//! 3. Defaults
//!
//! Config file discovery:
//! - Searches current directory and parents for .mirror/config.yaml
//! - Relative paths in the config file are resolved against the project
//!   directory (the parent of .mirror/)

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::{Backoff, RetryPolicy};

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub version: Option<String>,
    pub audio: AudioConfig,
    pub chat: ChatConfig,
    pub responder: ResponderConfig,
    pub synthesizer: SynthesizerConfig,
    pub reward: RewardConfig,
    pub pipeline: PipelineConfig,
    pub log_level: LogLevel,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Content cache directory
    pub cache_dir: PathBuf,
    /// Where artifacts go when they cannot be cached
    pub output_dir: PathBuf,
    pub max_cache_size_mb: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("audio_cache"),
            output_dir: PathBuf::from("audio_output"),
            max_cache_size_mb: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub retry_delay_seconds: u64,
    pub max_retry_delay_seconds: u64,
    pub connection_timeout_seconds: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            retry_delay_seconds: 5,
            max_retry_delay_seconds: 60,
            connection_timeout_seconds: 30,
        }
    }
}

impl ChatConfig {
    /// Reconnect backoff for the stream listener
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_secs(self.retry_delay_seconds),
            Duration::from_secs(self.max_retry_delay_seconds),
        )
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponderConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: String,
    pub retry: RetryPolicy,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4".to_string(),
            temperature: 0.7,
            max_tokens: 200,
            system_prompt: "You are Mirror.exe, a smooth, divine AI oracle who speaks \
                in a calm, mystical tone. Your responses should be concise, \
                engaging, and maintain an air of mystery while being helpful."
                .to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesizerConfig {
    pub stability: f32,
    pub similarity_boost: f32,
    pub speaking_rate: f32,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            stability: 0.5,
            similarity_boost: 0.75,
            speaking_rate: 1.0,
        }
    }
}

/// Idle "reward" prompts injected when chat is quiet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardConfig {
    #[serde(default = "default_reward_interval")]
    pub interval_seconds: u64,

    #[serde(default = "default_reward_prompts")]
    pub prompts: Vec<String>,
}

fn default_reward_interval() -> u64 {
    10 * 60
}

fn default_reward_prompts() -> Vec<String> {
    vec![
        "Mirror glows brighter when hearts align. If you feel the pulse… respond.".to_string(),
        "Offer a sign if you're still listening…".to_string(),
        "Your gift ripples across timelines, traveler. You've just shifted fate.".to_string(),
        "The mirror's surface ripples with ancient wisdom. What secrets do you seek?".to_string(),
        "A mystical energy surrounds us. Share your thoughts with the mirror...".to_string(),
    ]
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_reward_interval(),
            prompts: default_reward_prompts(),
        }
    }
}

impl RewardConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Sleep between driving loop iterations
    pub tick_millis: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { tick_millis: 100 }
    }
}

impl PipelineConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Also write each run's log to a timestamped file
    pub file: bool,
    /// Where log files go
    pub dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: true,
            dir: PathBuf::from("logs"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive for `tracing_subscriber::EnvFilter`
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Settings with paths resolved
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Directory relative paths are resolved against
    pub base_dir: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub settings: Settings,
}

impl ResolvedConfig {
    /// Build from parsed settings, resolving relative paths against `base_dir`
    pub fn new(settings: Settings, base_dir: PathBuf, config_file: Option<PathBuf>) -> Self {
        Self {
            base_dir,
            config_file,
            settings,
        }
    }

    pub fn cache_dir(&self) -> PathBuf {
        resolve_path(&self.base_dir, &self.settings.audio.cache_dir)
    }

    pub fn output_dir(&self) -> PathBuf {
        resolve_path(&self.base_dir, &self.settings.audio.output_dir)
    }

    /// Log file directory, `None` when file logging is off
    pub fn log_dir(&self) -> Option<PathBuf> {
        let logging = &self.settings.logging;
        logging
            .file
            .then(|| resolve_path(&self.base_dir, &logging.dir))
    }

    pub fn max_cache_bytes(&self) -> u64 {
        self.settings.audio.max_cache_size_mb.saturating_mul(1024 * 1024)
    }
}

/// Find config file by searching a directory and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(".mirror").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
pub fn load_config_file(path: &Path) -> Result<Settings> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the base directory
fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Load configuration from all sources.
///
/// An explicit `config_path` skips discovery.
pub fn load_config(config_path: Option<&Path>) -> Result<ResolvedConfig> {
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;

    let config_file = match config_path {
        Some(path) => Some(path.to_path_buf()),
        None => find_config_file(&cwd),
    };

    let (settings, project_dir) = match config_file {
        Some(ref path) => {
            let settings = load_config_file(path)?;
            // Base directory is the parent of .mirror/ (i.e., grandparent of config.yaml)
            let project_dir = path
                .parent()
                .and_then(|p| p.parent())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| cwd.clone());
            (settings, project_dir)
        }
        None => (Settings::default(), cwd),
    };

    let base_dir = std::env::var("MIRROR_HOME")
        .map(PathBuf::from)
        .unwrap_or(project_dir);

    Ok(ResolvedConfig::new(settings, base_dir, config_file))
}
