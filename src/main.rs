//! mirror CLI entrypoint

use anyhow::Result;
use clap::Parser;
use tracing::debug;

use mirror::cli::Cli;
use mirror::{config, logging};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_config(cli.config.as_deref())?;

    // Held until exit so the file writer flushes
    let _log_file = match logging::init_logging(&config)? {
        Some((path, guard)) => {
            debug!(path = %path.display(), "Logging to file");
            Some(guard)
        }
        None => None,
    };

    cli.execute(config).await
}
