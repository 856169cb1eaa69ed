//! mirror - Live chat oracle with synthesized voice replies
//!
//! Listens to a live stream's chat, generates a reply for each comment,
//! turns the reply into speech and plays it aloud, one clip at a time.
//!
//! # Architecture
//!
//! Three execution contexts hand work to each other through unbounded FIFO
//! buffers (chat comments and queued audio):
//! - The stream listener keeps a chat connection alive and queues comments
//! - The driving loop turns comments (and idle reward prompts) into audio
//! - The playback worker plays queued audio strictly in order
//!
//! Synthesized audio goes through a size-bounded on-disk cache keyed by the
//! hash of the normalized text, so repeated phrases are synthesized once.
//!
//! # Modules
//!
//! - `adapters`: External services (responder, synthesizer, chat relay, players)
//! - `core`: Listener, cache, playback queue and the driving loop
//! - `domain`: Data structures (Comment, CacheKey, PlaybackItem)
//! - `app`: Wiring and ordered shutdown
//! - `cli`: Command-line interface
//! - `logging`: Console and per-run log file output
//!
//! # Usage
//!
//! ```bash
//! # Listen and reply until Ctrl-C
//! mirror
//!
//! # Inspect the audio cache
//! mirror cache stats --list
//! ```

pub mod adapters;
pub mod app;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod logging;

// Re-export main types at crate root for convenience
pub use app::{Collaborators, Credentials, MirrorApp};
pub use core::{ContentCache, PlaybackQueue, ResponsePipeline, StreamListener};
pub use domain::{CacheKey, Comment, PlaybackItem, StreamEvent};
