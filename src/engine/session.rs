// Location session state machine: turns position events into resolved image references.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::resolver::ImageResolver;
use crate::error::FetchError;
use crate::location::{PositionEvents, PositionSource, Tuning};
use crate::model::{FailureReason, ImageReference, Position, PositionEvent, SessionState};

#[derive(Debug, Clone, Copy)]
enum Command {
    Start,
    Stop,
    Toggle,
}

/// Receivers of every reference the session publishes, in publication order.
type ImageSubscribers = Arc<Mutex<Vec<mpsc::UnboundedSender<ImageReference>>>>;

struct ResolveOutcome {
    seq: u64,
    result: Result<ImageReference, FetchError>,
}

/// Handle to a running session loop.
///
/// The loop task owns the session state; this handle only sends requests to
/// it and reads the published state. Dropping the handle shuts the loop down.
pub struct SessionController {
    commands: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<SessionState>,
    source: Arc<dyn PositionSource>,
    image_subscribers: ImageSubscribers,
    shutdown_token: CancellationToken,
}

impl SessionController {
    /// Spawn the session loop on the current Tokio runtime. The session starts `Stopped`.
    pub fn spawn(source: Arc<dyn PositionSource>, resolver: Arc<dyn ImageResolver>) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Stopped);
        let shutdown_token = CancellationToken::new();
        let image_subscribers: ImageSubscribers = Arc::new(Mutex::new(Vec::new()));

        let session_loop = SessionLoop {
            source: Arc::clone(&source),
            resolver,
            image_subscribers: Arc::clone(&image_subscribers),
            state_tx,
            state: SessionState::Stopped,
            events: None,
            resolves: JoinSet::new(),
            next_seq: 0,
            last_applied: 0,
        };
        tokio::spawn(session_loop.run(command_rx, shutdown_token.clone()));

        Self {
            commands,
            state_rx,
            source,
            image_subscribers,
            shutdown_token,
        }
    }

    /// Request `Stopped → Started`. Ignored from any other state.
    pub fn start(&self) {
        self.send(Command::Start);
    }

    /// Request a stop from any state. This is also how a blocked session is reset.
    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    /// Flip between stopped and running. No-op while permission is missing or after a failure.
    pub fn toggle_start_stop(&self) {
        self.send(Command::Toggle);
    }

    pub fn state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Stream of every image reference the session publishes, oldest first.
    ///
    /// Unlike [`subscribe`](Self::subscribe), nothing is coalesced. If an image
    /// is currently available it is the first item. The stream ends when the
    /// session loop exits.
    pub fn subscribe_images(&self) -> mpsc::UnboundedReceiver<ImageReference> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.image_subscribers.lock();
        if let SessionState::ImageAvailable(reference) = &*self.state_rx.borrow() {
            let _ = tx.send(reference.clone());
        }
        subscribers.push(tx);
        rx
    }

    /// Wait until the published state satisfies `predicate` and return it.
    ///
    /// Returns the last published state if the loop has shut down first.
    pub async fn wait_until<F>(&self, mut predicate: F) -> SessionState
    where
        F: FnMut(&SessionState) -> bool,
    {
        let mut rx = self.state_rx.clone();
        let state = match rx.wait_for(|s| predicate(s)).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        };
        state
    }

    pub fn tuning(&self) -> Tuning {
        self.source.tuning()
    }

    /// Minimum movement between readings; `None` delivers every reading.
    pub fn set_distance_filter(&self, meters: Option<u32>) {
        let mut tuning = self.source.tuning();
        tuning.distance_filter = meters;
        self.source.set_tuning(tuning);
    }

    pub fn set_desired_accuracy(&self, meters: f64) {
        let mut tuning = self.source.tuning();
        tuning.desired_accuracy = meters;
        self.source.set_tuning(tuning);
    }

    /// Stop the loop. Pending resolves are abandoned and the source is stopped.
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("session loop gone, dropping {:?}", command);
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        debug!("SessionController dropped, shutting down session loop");
        self.shutdown_token.cancel();
    }
}

struct SessionLoop {
    source: Arc<dyn PositionSource>,
    resolver: Arc<dyn ImageResolver>,
    image_subscribers: ImageSubscribers,
    state_tx: watch::Sender<SessionState>,
    state: SessionState,
    events: Option<PositionEvents>,
    resolves: JoinSet<ResolveOutcome>,
    next_seq: u64,
    /// Sequence number of the newest resolve applied to the state.
    last_applied: u64,
}

impl SessionLoop {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        shutdown_token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown_token.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                event = next_event(&mut self.events) => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        warn!("position source closed its event stream");
                        self.events = None;
                    }
                },
                Some(joined) = self.resolves.join_next(), if !self.resolves.is_empty() => {
                    self.handle_resolved(joined);
                }
            }
        }

        if self.events.is_some() {
            self.source.stop();
        }
        self.image_subscribers.lock().clear();
        debug!("session loop exited in state {}", self.state.label());
    }

    fn handle_command(&mut self, command: Command) {
        let stopped = self.state == SessionState::Stopped;
        let active = self.state.is_active();
        match command {
            Command::Start | Command::Toggle if stopped => self.start_session(),
            Command::Stop if !stopped => self.stop_session(),
            Command::Toggle if active => self.stop_session(),
            Command::Stop => {}
            command => debug!("{:?} ignored in state {}", command, self.state.label()),
        }
    }

    fn start_session(&mut self) {
        self.events = Some(self.source.subscribe());
        self.source.start();
        self.set_state(SessionState::Started);
    }

    fn stop_session(&mut self) {
        self.source.stop();
        self.events = None;
        self.abandon_resolves();
        self.set_state(SessionState::Stopped);
    }

    fn handle_event(&mut self, event: PositionEvent) {
        if !self.state.is_active() {
            debug!("{:?} ignored in state {}", event, self.state.label());
            return;
        }

        match event {
            PositionEvent::PermissionGranted => {
                // Permission upgraded mid-session; the source must be restarted to deliver readings.
                self.source.start();
            }
            PositionEvent::PermissionDenied => {
                self.abandon_resolves();
                self.set_state(SessionState::PermissionMissing);
            }
            PositionEvent::PositionError(e) => {
                self.abandon_resolves();
                self.set_state(SessionState::Failed(FailureReason::PositionFailure(e)));
            }
            PositionEvent::PositionUpdate(position) => self.spawn_resolve(position),
        }
    }

    fn spawn_resolve(&mut self, position: Position) {
        self.next_seq += 1;
        let seq = self.next_seq;
        let resolver = Arc::clone(&self.resolver);
        debug!(
            "resolve #{} lat={} lon={}",
            seq, position.latitude, position.longitude
        );

        self.resolves.spawn(async move {
            let result = resolver.resolve(&position).await;
            ResolveOutcome { seq, result }
        });
    }

    fn handle_resolved(&mut self, joined: Result<ResolveOutcome, JoinError>) {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("resolve task did not complete: {}", e);
                return;
            }
        };

        if !self.state.is_active() {
            debug!("resolve #{} finished after session left active state", outcome.seq);
            return;
        }
        if outcome.seq < self.last_applied {
            debug!(
                "resolve #{} superseded by #{}, dropping",
                outcome.seq, self.last_applied
            );
            return;
        }
        self.last_applied = outcome.seq;

        match outcome.result {
            Ok(reference) => self.set_state(SessionState::ImageAvailable(reference)),
            Err(e) => {
                self.abandon_resolves();
                self.set_state(SessionState::Failed(FailureReason::FetchFailure(e)));
            }
        }
    }

    fn abandon_resolves(&mut self) {
        if !self.resolves.is_empty() {
            debug!("abandoning {} pending resolves", self.resolves.len());
        }
        // Dropping a JoinSet aborts every task in it.
        self.resolves = JoinSet::new();
    }

    fn set_state(&mut self, state: SessionState) {
        if state == self.state {
            return;
        }
        info!("session {} -> {}", self.state.label(), state.label());
        self.state = state.clone();

        // Held across the state update so a new image subscriber sees each reference once.
        let mut subscribers = self.image_subscribers.lock();
        if let SessionState::ImageAvailable(reference) = &state {
            subscribers.retain(|tx| tx.send(reference.clone()).is_ok());
        }
        self.state_tx.send_replace(state);
    }
}

async fn next_event(events: &mut Option<PositionEvents>) -> Option<PositionEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
