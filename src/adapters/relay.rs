//! Live chat relay over TCP.
//!
//! The relay is a small sidecar that holds the actual live-platform session
//! and forwards its events as newline-delimited JSON:
//!
//! ```text
//! → {"subscribe":"@channel"}
//! ← {"type":"comment","username":"ana","text":"hello"}
//! ← {"type":"like","username":"bo"}
//! ```
//!
//! Unknown event types are passed through as `StreamEvent::Other`; lines
//! that are not valid JSON (including invalid UTF-8) are logged and skipped.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::domain::StreamEvent;

use super::{StreamConnection, StreamError, StreamSource};

/// Connects to a chat relay and subscribes to one channel
pub struct RelaySource {
    addr: String,
    channel: String,
    connect_timeout: Duration,
}

#[derive(Debug, Serialize)]
struct Subscribe<'a> {
    subscribe: &'a str,
}

impl RelaySource {
    pub fn new(addr: impl Into<String>, channel: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            channel: channel.into(),
            connect_timeout,
        }
    }
}

#[async_trait]
impl StreamSource for RelaySource {
    fn name(&self) -> &str {
        "relay"
    }

    async fn connect(&self) -> Result<Box<dyn StreamConnection>, StreamError> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| StreamError::Timeout(self.connect_timeout))?
            .map_err(|e| StreamError::Connect(format!("{}: {}", self.addr, e)))?;

        let (reader, mut writer) = stream.into_split();

        let subscribe = serde_json::to_string(&Subscribe {
            subscribe: &self.channel,
        })
        .map_err(|e| StreamError::Connect(e.to_string()))?;
        writer
            .write_all(format!("{}\n", subscribe).as_bytes())
            .await?;
        writer.flush().await?;

        debug!(addr = %self.addr, channel = %self.channel, "Subscribed to relay");

        Ok(Box::new(RelayConnection {
            reader: BufReader::new(reader),
            line: Vec::new(),
            _writer: writer,
        }))
    }
}

/// An open relay session
struct RelayConnection {
    reader: BufReader<OwnedReadHalf>,
    line: Vec<u8>,
    /// Held so the relay does not see our side close
    _writer: OwnedWriteHalf,
}

#[async_trait]
impl StreamConnection for RelayConnection {
    async fn next_event(&mut self) -> Result<Option<StreamEvent>, StreamError> {
        loop {
            self.line.clear();
            if self.reader.read_until(b'\n', &mut self.line).await? == 0 {
                return Ok(None);
            }

            if self.line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            match serde_json::from_slice::<StreamEvent>(&self.line) {
                Ok(event) => return Ok(Some(event)),
                Err(e) => warn!(error = %e, "Skipping malformed relay line"),
            }
        }
    }
}
