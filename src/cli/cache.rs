//! Cache CLI subcommands.
//!
//! - `stats`: Show size and entry count of the audio cache
//! - `clear`: Remove every cached artifact

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::Subcommand;

use crate::config::ResolvedConfig;
use crate::core::ContentCache;

/// Cache-related subcommands
#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Show cache usage
    Stats {
        /// Also list entries, oldest first
        #[arg(short, long)]
        list: bool,
    },

    /// Delete all cached audio
    Clear,
}

impl CacheCommands {
    pub async fn execute(self, config: &ResolvedConfig) -> Result<()> {
        let dir = config.cache_dir();
        let cache = ContentCache::open(&dir, config.max_cache_bytes())
            .await
            .with_context(|| format!("Failed to open cache directory: {}", dir.display()))?;

        match self {
            CacheCommands::Stats { list } => show_stats(&cache, list).await,
            CacheCommands::Clear => {
                let removed = cache.clear().await;
                println!("Removed {} cached file(s) from {}", removed, dir.display());
                Ok(())
            }
        }
    }
}

async fn show_stats(cache: &ContentCache, list: bool) -> Result<()> {
    let stats = cache.stats().await.context("Failed to scan cache")?;

    println!("Cache directory: {}", cache.dir().display());
    println!("Files:           {}", stats.file_count);
    println!(
        "Size:            {} / {}",
        format_bytes(stats.total_bytes),
        format_bytes(cache.max_size_bytes())
    );

    if list {
        let entries = cache.entries().await.context("Failed to scan cache")?;
        if entries.is_empty() {
            return Ok(());
        }

        println!();
        println!("{:<66} {:>10} {:<20}", "KEY", "SIZE", "WRITTEN");
        println!("{}", "-".repeat(98));
        for entry in entries {
            let written: DateTime<Local> = entry.written_at.into();
            println!(
                "{:<66} {:>10} {:<20}",
                entry.key.as_str(),
                format_bytes(entry.size_bytes),
                written.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }

    Ok(())
}

/// Human-readable byte count
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
