//! Live chat listener with reconnect backoff.
//!
//! `ListenerMachine` is the connection state machine
//! (`Disconnected → Connecting → Connected → Disconnected`). Its transition
//! functions are called only by the task that owns the connection.
//! `StreamListener` runs that task and exposes the comment buffer to the
//! rest of the pipeline.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::{StreamConnection, StreamSource};
use crate::domain::{Comment, StreamEvent};

use super::backoff::Backoff;
use super::observer::PipelineObserver;

/// Connection state of the listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    /// Allowed transitions. `Connecting → Disconnected` is a failed handshake.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
        )
    }
}

#[derive(Debug, Clone, Error)]
pub enum ListenerError {
    #[error("Invalid connection transition: {from:?} → {to:?}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },
}

/// State visible outside the connection task
struct Shared {
    state: Mutex<ConnectionState>,
    comments: Mutex<VecDeque<Comment>>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn comments(&self) -> MutexGuard<'_, VecDeque<Comment>> {
        self.comments.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Connection state machine plus backoff
pub struct ListenerMachine {
    shared: Arc<Shared>,
    backoff: Backoff,
    observer: Arc<dyn PipelineObserver>,
}

impl ListenerMachine {
    pub fn new(backoff: Backoff, observer: Arc<dyn PipelineObserver>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ConnectionState::Disconnected),
                comments: Mutex::new(VecDeque::new()),
            }),
            backoff,
            observer,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state()
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    fn transition(&mut self, to: ConnectionState) -> Result<(), ListenerError> {
        let from = {
            let mut state = self.shared.state();
            let from = *state;
            if !from.can_transition_to(to) {
                return Err(ListenerError::InvalidTransition { from, to });
            }
            *state = to;
            from
        };
        self.observer.connection_state_changed(from, to);
        Ok(())
    }

    /// `Disconnected → Connecting`
    pub fn begin_connect(&mut self) -> Result<(), ListenerError> {
        self.transition(ConnectionState::Connecting)
    }

    /// `Connecting → Connected`; resets the backoff
    pub fn on_connect(&mut self) -> Result<(), ListenerError> {
        self.transition(ConnectionState::Connected)?;
        self.backoff.reset();
        Ok(())
    }

    /// `Connecting | Connected → Disconnected`. Returns how long to wait
    /// before the next attempt and doubles the following delay.
    pub fn on_disconnect(&mut self) -> Result<Duration, ListenerError> {
        self.transition(ConnectionState::Disconnected)?;
        let delay = self.backoff.next_delay();
        self.observer.backoff_scheduled(delay);
        Ok(delay)
    }

    /// Buffer a comment from the live connection
    pub fn on_comment(&mut self, username: String, text: String) {
        self.shared.comments().push_back(Comment::new(username, text));
    }

    /// External stop: straight to `Disconnected`, no backoff
    pub fn on_stop(&mut self) {
        let from = std::mem::replace(&mut *self.shared.state(), ConnectionState::Disconnected);
        if from != ConnectionState::Disconnected {
            self.observer
                .connection_state_changed(from, ConnectionState::Disconnected);
        }
    }
}

/// Owns the live chat connection and buffers incoming comments
pub struct StreamListener {
    source: Arc<dyn StreamSource>,
    shared: Arc<Shared>,
    /// Taken by `start`; `None` once the connection task exists
    machine: Mutex<Option<ListenerMachine>>,
    stop: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamListener {
    pub fn new(
        source: Arc<dyn StreamSource>,
        backoff: Backoff,
        observer: Arc<dyn PipelineObserver>,
    ) -> Self {
        let machine = ListenerMachine::new(backoff, observer);
        Self {
            source,
            shared: Arc::clone(&machine.shared),
            machine: Mutex::new(Some(machine)),
            stop: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Spawn the connect loop. Idempotent; a stopped listener never restarts.
    pub fn start(&self) {
        if self.stop.is_cancelled() {
            debug!("Listener already stopped, not starting");
            return;
        }

        let Some(machine) = self
            .machine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        info!(source = self.source.name(), "Starting stream listener");
        let handle = tokio::spawn(run_connection(
            machine,
            Arc::clone(&self.source),
            self.stop.clone(),
        ));
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Ask the connect loop to finish after the current attempt. Idempotent.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Wait for the connect loop to exit (after `stop`)
    pub async fn join(&self) {
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Listener task panicked");
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state()
    }

    /// Oldest unseen comment, without waiting
    pub fn poll_comment(&self) -> Option<Comment> {
        self.shared.comments().pop_front()
    }

    /// Drop every buffered comment. Returns how many were discarded.
    pub fn clear_queue(&self) -> usize {
        let mut comments = self.shared.comments();
        let removed = comments.len();
        comments.clear();
        removed
    }

    pub fn pending_comments(&self) -> usize {
        self.shared.comments().len()
    }
}

/// Why a live connection ended
enum SessionEnd {
    Stopped,
    Closed,
    Failed(String),
}

/// The connect / read / back off loop. Never gives up until stopped.
async fn run_connection(
    mut machine: ListenerMachine,
    source: Arc<dyn StreamSource>,
    stop: CancellationToken,
) {
    loop {
        if stop.is_cancelled() {
            break;
        }

        if let Err(e) = machine.begin_connect() {
            warn!(error = %e, "Unexpected listener state");
            break;
        }

        // An in-flight attempt is allowed to finish even if stop was requested
        match source.connect().await {
            Ok(mut connection) => {
                if let Err(e) = machine.on_connect() {
                    warn!(error = %e, "Unexpected listener state");
                    break;
                }
                info!(source = source.name(), "Connected to live stream");

                match read_events(&mut machine, connection.as_mut(), &stop).await {
                    SessionEnd::Stopped => break,
                    SessionEnd::Closed => warn!("Disconnected: stream closed by peer"),
                    SessionEnd::Failed(reason) => warn!(%reason, "Disconnected"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Connection attempt failed");
            }
        }

        if stop.is_cancelled() {
            break;
        }

        let delay = match machine.on_disconnect() {
            Ok(delay) => delay,
            Err(e) => {
                warn!(error = %e, "Unexpected listener state");
                break;
            }
        };
        info!(delay_secs = delay.as_secs_f64(), "Attempting to reconnect");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop.cancelled() => break,
        }
    }

    machine.on_stop();
    info!("Stream listener stopped");
}

async fn read_events(
    machine: &mut ListenerMachine,
    connection: &mut dyn StreamConnection,
    stop: &CancellationToken,
) -> SessionEnd {
    loop {
        let event = tokio::select! {
            event = connection.next_event() => event,
            _ = stop.cancelled() => return SessionEnd::Stopped,
        };

        match event {
            Ok(Some(StreamEvent::Comment { username, text })) => {
                debug!(%username, "Comment received");
                machine.on_comment(username, text);
            }
            Ok(Some(StreamEvent::Other)) => {}
            Ok(None) => return SessionEnd::Closed,
            Err(e) => return SessionEnd::Failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::observer::NoopObserver;

    fn machine() -> ListenerMachine {
        ListenerMachine::new(
            Backoff::new(Duration::from_secs(5), Duration::from_secs(60)),
            Arc::new(NoopObserver),
        )
    }

    #[test]
    fn test_transition_table() {
        use ConnectionState::*;
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connecting.can_transition_to(Disconnected));
        assert!(Connected.can_transition_to(Disconnected));

        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!Disconnected.can_transition_to(Disconnected));
    }

    #[test]
    fn test_connect_cycle() {
        let mut m = machine();
        assert_eq!(m.state(), ConnectionState::Disconnected);

        m.begin_connect().unwrap();
        assert_eq!(m.state(), ConnectionState::Connecting);
        m.on_connect().unwrap();
        assert_eq!(m.state(), ConnectionState::Connected);

        assert_eq!(m.on_disconnect().unwrap(), Duration::from_secs(5));
        assert_eq!(m.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        let mut m = machine();
        let result = m.on_connect();
        assert!(matches!(
            result,
            Err(ListenerError::InvalidTransition {
                from: ConnectionState::Disconnected,
                to: ConnectionState::Connected,
            })
        ));
        assert_eq!(m.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_failed_handshakes_double_delay_and_connect_resets() {
        let mut m = machine();
        let mut delays = Vec::new();
        for _ in 0..6 {
            m.begin_connect().unwrap();
            delays.push(m.on_disconnect().unwrap().as_secs());
        }
        assert_eq!(delays, vec![5, 10, 20, 40, 60, 60]);

        m.begin_connect().unwrap();
        m.on_connect().unwrap();
        assert_eq!(m.backoff().current(), Duration::from_secs(5));
    }

    #[test]
    fn test_stop_skips_connecting() {
        let mut m = machine();
        m.begin_connect().unwrap();
        m.on_connect().unwrap();

        m.on_stop();
        assert_eq!(m.state(), ConnectionState::Disconnected);
        // Idempotent
        m.on_stop();
        assert_eq!(m.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_comments_are_fifo() {
        let mut m = machine();
        m.on_comment("ana".to_string(), "first".to_string());
        m.on_comment("bo".to_string(), "second".to_string());

        let mut comments = m.shared.comments();
        assert_eq!(comments.pop_front().unwrap().text, "first");
        assert_eq!(comments.pop_front().unwrap().text, "second");
        assert!(comments.pop_front().is_none());
    }
}
