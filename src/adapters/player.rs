//! Subprocess audio playback.
//!
//! Each platform gets a `PlayerBackend` that knows which executable to run.
//! The backend is chosen once at startup by `platform_executor`; the
//! playback queue only sees the `PlaybackExecutor` trait.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{PlaybackError, PlaybackExecutor};

/// Builds the command that plays one file
pub trait PlayerBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn command(&self, path: &Path) -> Command;
}

/// macOS `afplay`
#[derive(Debug, Default)]
pub struct Afplay;

impl PlayerBackend for Afplay {
    fn name(&self) -> &'static str {
        "afplay"
    }

    fn command(&self, path: &Path) -> Command {
        let mut cmd = Command::new("afplay");
        cmd.arg(path);
        cmd
    }
}

/// Linux `mpg123`
#[derive(Debug, Default)]
pub struct Mpg123;

impl PlayerBackend for Mpg123 {
    fn name(&self) -> &'static str {
        "mpg123"
    }

    fn command(&self, path: &Path) -> Command {
        let mut cmd = Command::new("mpg123");
        cmd.arg("-q").arg(path);
        cmd
    }
}

/// Windows PowerShell `Media.SoundPlayer`
#[derive(Debug, Default)]
pub struct PowerShellSoundPlayer;

impl PlayerBackend for PowerShellSoundPlayer {
    fn name(&self) -> &'static str {
        "powershell"
    }

    fn command(&self, path: &Path) -> Command {
        // Single quotes are escaped by doubling inside a PowerShell literal
        let quoted = path.to_string_lossy().replace('\'', "''");
        let mut cmd = Command::new("powershell");
        cmd.arg("-c")
            .arg(format!("(New-Object Media.SoundPlayer '{}').PlaySync()", quoted));
        cmd
    }
}

/// Plays files by running a backend's command to completion
pub struct SubprocessExecutor {
    backend: Box<dyn PlayerBackend>,
}

impl SubprocessExecutor {
    pub fn new(backend: Box<dyn PlayerBackend>) -> Self {
        Self { backend }
    }
}

/// Executor for the host platform
pub fn platform_executor() -> SubprocessExecutor {
    let backend: Box<dyn PlayerBackend> = if cfg!(target_os = "windows") {
        Box::new(PowerShellSoundPlayer)
    } else if cfg!(target_os = "macos") {
        Box::new(Afplay)
    } else {
        Box::new(Mpg123)
    };
    SubprocessExecutor::new(backend)
}

#[async_trait]
impl PlaybackExecutor for SubprocessExecutor {
    fn name(&self) -> &str {
        self.backend.name()
    }

    async fn play(&self, path: &Path) -> Result<(), PlaybackError> {
        let path = tokio::fs::canonicalize(path)
            .await
            .map_err(|_| PlaybackError::NotFound(path.to_path_buf()))?;

        // kill_on_drop: cancelling playback drops this future and kills the player
        let mut child = self
            .backend
            .command(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        debug!(player = self.backend.name(), path = %path.display(), "Player spawned");

        let status = child.wait().await?;
        if !status.success() {
            return Err(PlaybackError::Failed(status.code().unwrap_or(-1)));
        }

        Ok(())
    }
}
