//! Command-line interface for mirror.
//!
//! `mirror` with no subcommand runs the live pipeline. Credentials are read
//! from flags or the environment.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::app::{shutdown_signal, Collaborators, Credentials, MirrorApp, SHUTDOWN_GRACE};
use crate::config::ResolvedConfig;

pub mod cache;

/// mirror - Live chat oracle with synthesized voice replies
#[derive(Parser, Debug)]
#[command(name = "mirror")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: search for .mirror/config.yaml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Listen to chat and speak replies until interrupted (default)
    Run(RunArgs),

    /// Inspect or clear the audio cache
    Cache {
        #[command(subcommand)]
        command: cache::CacheCommands,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// Secrets and endpoints for `run`
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Chat completion API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Text-to-speech API key
    #[arg(long, env = "ELEVENLABS_API_KEY", hide_env_values = true)]
    pub elevenlabs_api_key: Option<String>,

    /// Voice to synthesize with
    #[arg(long, env = "VOICE_ID")]
    pub voice_id: Option<String>,

    /// Live channel to listen to
    #[arg(long, env = "TIKTOK_USERNAME")]
    pub channel: Option<String>,

    /// Chat relay address
    #[arg(long, env = "MIRROR_RELAY_ADDR", default_value = "127.0.0.1:7878")]
    pub relay_addr: String,
}

impl RunArgs {
    /// Arguments when no subcommand was given: environment only
    fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            openai_api_key: var("OPENAI_API_KEY"),
            elevenlabs_api_key: var("ELEVENLABS_API_KEY"),
            voice_id: var("VOICE_ID"),
            channel: var("TIKTOK_USERNAME"),
            relay_addr: var("MIRROR_RELAY_ADDR").unwrap_or_else(|| "127.0.0.1:7878".to_string()),
        }
    }

    /// All credentials, or an error naming the first missing one
    pub fn credentials(self) -> Result<Credentials> {
        Ok(Credentials {
            openai_api_key: self
                .openai_api_key
                .context("OPENAI_API_KEY is not set")?,
            elevenlabs_api_key: self
                .elevenlabs_api_key
                .context("ELEVENLABS_API_KEY is not set")?,
            voice_id: self.voice_id.context("VOICE_ID is not set")?,
            channel: self.channel.context("TIKTOK_USERNAME is not set")?,
            relay_addr: self.relay_addr,
        })
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self, config: ResolvedConfig) -> Result<()> {
        match self.command {
            None => run(RunArgs::from_env(), config).await,
            Some(Commands::Run(args)) => run(args, config).await,
            Some(Commands::Cache { command }) => command.execute(&config).await,
            Some(Commands::Config) => show_config(&config),
        }
    }
}

/// Run the live pipeline until Ctrl-C or SIGTERM
async fn run(args: RunArgs, config: ResolvedConfig) -> Result<()> {
    let credentials = args.credentials()?;
    info!(
        channel = %credentials.channel,
        relay = %credentials.relay_addr,
        "Starting mirror"
    );

    let collaborators = Collaborators::from_config(&config, &credentials);
    let app = MirrorApp::build(&config, collaborators).await?;

    let shutdown = CancellationToken::new();
    let running = tokio::spawn(app.run(shutdown.clone()));

    shutdown_signal().await;
    shutdown.cancel();

    match tokio::time::timeout(SHUTDOWN_GRACE, running).await {
        Ok(joined) => joined.context("Mirror task panicked")?,
        Err(_) => {
            warn!(grace = ?SHUTDOWN_GRACE, "Shutdown did not finish in time, exiting");
            Ok(())
        }
    }
}

/// Show resolved configuration
fn show_config(config: &ResolvedConfig) -> Result<()> {
    let settings = &config.settings;

    println!("Config file: {}", config.config_file.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "(none - using defaults)".to_string()));
    println!();
    println!("Paths:");
    println!("  Base:   {}", config.base_dir.display());
    println!("  Cache:  {}", config.cache_dir().display());
    println!("  Output: {}", config.output_dir().display());
    println!();
    println!("Cache limit: {} MB", settings.audio.max_cache_size_mb);
    println!();
    println!("Chat:");
    println!("  Retry delay:        {}s", settings.chat.retry_delay_seconds);
    println!("  Max retry delay:    {}s", settings.chat.max_retry_delay_seconds);
    println!("  Connection timeout: {}s", settings.chat.connection_timeout_seconds);
    println!();
    println!("Responder:");
    println!("  Model:       {}", settings.responder.model);
    println!("  Temperature: {}", settings.responder.temperature);
    println!("  Max tokens:  {}", settings.responder.max_tokens);
    println!("  Attempts:    {}", settings.responder.retry.max_attempts);
    println!();
    println!("Rewards:");
    println!("  Interval: {}s", settings.reward.interval_seconds);
    println!("  Prompts:  {}", settings.reward.prompts.len());
    println!();
    println!("Log level: {}", settings.log_level.as_directive());
    match config.log_dir() {
        Some(dir) => println!("Log files: {}", dir.display()),
        None => println!("Log files: (disabled)"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_defaults_to_run() {
        let cli = Cli::try_parse_from(["mirror"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_cache_subcommands() {
        let cli = Cli::try_parse_from(["mirror", "cache", "stats", "--list"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Cache {
                command: cache::CacheCommands::Stats { list: true }
            })
        ));

        let cli = Cli::try_parse_from(["mirror", "--config", "x.yaml", "cache", "clear"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("x.yaml")));
        assert!(matches!(
            cli.command,
            Some(Commands::Cache {
                command: cache::CacheCommands::Clear
            })
        ));
    }

    #[test]
    fn test_missing_credentials_named() {
        let args = RunArgs {
            openai_api_key: Some("sk".to_string()),
            elevenlabs_api_key: None,
            voice_id: Some("v".to_string()),
            channel: Some("@c".to_string()),
            relay_addr: "127.0.0.1:7878".to_string(),
        };
        let err = args.credentials().unwrap_err();
        assert!(err.to_string().contains("ELEVENLABS_API_KEY"));
    }
}
