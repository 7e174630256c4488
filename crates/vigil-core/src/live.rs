// ── Live event stream client ──
//
// Holds at most one open push stream. Frames are decoded into `Event`s
// and handed off on a bounded channel; the stream reconnects forever with
// capped, jittered backoff until it is closed or credentials are refused.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use futures_util::StreamExt;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use vigil_api::{ApiClient, FrameStream};

use crate::backoff::BackoffPolicy;
use crate::config::Scope;
use crate::convert::event_from_frame;
use crate::error::CoreError;
use crate::model::{EntityKind, Event};
use crate::store::EntityUpdate;

const LIVE_CHANNEL_SIZE: usize = 256;

// ── Stream source seam ───────────────────────────────────────────────

/// Anything that can open a frame stream for a scope.
pub trait StreamSource: Send + Sync + 'static {
    fn open(&self, scope: &Scope) -> impl Future<Output = Result<FrameStream, CoreError>> + Send;
}

impl StreamSource for ApiClient {
    async fn open(&self, scope: &Scope) -> Result<FrameStream, CoreError> {
        Ok(self.open_event_stream(&scope.location_id).await?)
    }
}

// ── Connection state ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Retrying { attempt: u32 },
    /// Credentials refused. No further reconnects.
    Failed,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (_, Self::Idle)
                | (Self::Idle | Self::Retrying { .. } | Self::Failed, Self::Connecting)
                | (Self::Connecting, Self::Connected | Self::Retrying { .. } | Self::Failed)
                | (Self::Connected, Self::Retrying { .. })
        )
    }

    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

/// Observable state of the live stream, with the error behind the latest
/// retry or failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub last_error: Option<String>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Idle,
            last_error: None,
        }
    }
}

/// What the stream hands downstream.
#[derive(Debug, Clone)]
pub enum LiveMessage {
    Event(Event),
    /// A zone transition, sent ahead of its event so the reconciler sees
    /// it before the next poll.
    EntityStateChanged(EntityUpdate),
}

// ── Client ───────────────────────────────────────────────────────────

struct ActiveStream {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct LiveStreamClient<S: StreamSource> {
    source: Arc<S>,
    backoff: BackoffPolicy,
    status: Arc<watch::Sender<ConnectionStatus>>,
    active: Mutex<Option<ActiveStream>>,
}

impl<S: StreamSource> LiveStreamClient<S> {
    pub fn new(source: Arc<S>, backoff: BackoffPolicy) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::default());
        Self {
            source,
            backoff,
            status: Arc::new(status),
            active: Mutex::new(None),
        }
    }

    /// Open the stream for `scope`, closing any stream already running.
    ///
    /// Each call returns a fresh receiver; messages decoded for an earlier
    /// scope die with the earlier receiver. The stream task is a child of
    /// `parent`.
    pub async fn connect(
        &self,
        scope: Scope,
        parent: &CancellationToken,
    ) -> mpsc::Receiver<LiveMessage> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            previous.cancel.cancel();
            let _ = previous.task.await;
            debug!("previous event stream closed");
        }

        let (tx, rx) = mpsc::channel(LIVE_CHANNEL_SIZE);
        let cancel = parent.child_token();
        let task = tokio::spawn(stream_task(
            Arc::clone(&self.source),
            scope,
            self.backoff,
            Arc::clone(&self.status),
            tx,
            cancel.clone(),
        ));
        *active = Some(ActiveStream { cancel, task });
        rx
    }

    /// Close the stream, if any, and return to `Idle`.
    pub async fn close(&self) {
        if let Some(active) = self.active.lock().await.take() {
            active.cancel.cancel();
            let _ = active.task.await;
        }
        set_state(&self.status, ConnectionState::Idle, None);
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }
}

fn set_state(
    status: &watch::Sender<ConnectionStatus>,
    next: ConnectionState,
    error: Option<String>,
) {
    status.send_if_modified(|current| {
        if current.state == next && error.is_none() {
            return false;
        }
        if !current.state.can_transition_to(next) {
            warn!(from = ?current.state, to = ?next, "illegal stream transition ignored");
            return false;
        }
        trace!(from = ?current.state, to = ?next, "stream state");
        current.state = next;
        if error.is_some() || next == ConnectionState::Connected || next == ConnectionState::Idle {
            current.last_error = error;
        }
        true
    });
}

// ── Background task ──────────────────────────────────────────────────

enum ReadEnd {
    Cancelled,
    ReceiverGone,
    /// Server closed the body, or the transport failed mid-read.
    Closed(Option<String>),
}

async fn stream_task<S: StreamSource>(
    source: Arc<S>,
    scope: Scope,
    backoff: BackoffPolicy,
    status: Arc<watch::Sender<ConnectionStatus>>,
    tx: mpsc::Sender<LiveMessage>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        set_state(&status, ConnectionState::Connecting, None);
        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            opened = source.open(&scope) => opened,
        };

        let error = match opened {
            Ok(frames) => {
                set_state(&status, ConnectionState::Connected, None);
                info!(location = %scope.location_id, "event stream connected");
                attempt = 0;
                match read_frames(frames, &tx, &cancel).await {
                    ReadEnd::Cancelled | ReadEnd::ReceiverGone => break,
                    ReadEnd::Closed(error) => {
                        error.unwrap_or_else(|| "stream closed by server".to_owned())
                    }
                }
            }
            Err(err) if err.is_authorization() => {
                warn!(error = %err, "event stream refused credentials");
                set_state(&status, ConnectionState::Failed, Some(err.to_string()));
                break;
            }
            Err(err) => err.to_string(),
        };

        let delay = backoff.jittered(attempt);
        attempt = attempt.saturating_add(1);
        debug!(attempt, ?delay, %error, "event stream reconnecting");
        set_state(&status, ConnectionState::Retrying { attempt }, Some(error));

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    debug!(location = %scope.location_id, "event stream task stopped");
}

async fn read_frames(
    mut frames: FrameStream,
    tx: &mpsc::Sender<LiveMessage>,
    cancel: &CancellationToken,
) -> ReadEnd {
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return ReadEnd::Cancelled,
            next = frames.next() => next,
        };

        let frame = match next {
            None => return ReadEnd::Closed(None),
            Some(Err(e)) => return ReadEnd::Closed(Some(CoreError::from(e).to_string())),
            Some(Ok(frame)) => frame,
        };

        let event = match event_from_frame(&frame, Utc::now()) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                continue;
            }
        };

        for message in messages_for(event) {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return ReadEnd::Cancelled,
                sent = tx.send(message) => if sent.is_err() { return ReadEnd::ReceiverGone },
            }
        }
    }
}

/// Zone transitions are announced as a state change before the event
/// itself.
fn messages_for(event: Event) -> Vec<LiveMessage> {
    let signal = event
        .entity
        .as_ref()
        .filter(|e| e.kind == EntityKind::Zone && !event.is_control())
        .and_then(|_| EntityUpdate::from_event(&event));

    match signal {
        Some(update) => vec![
            LiveMessage::EntityStateChanged(update),
            LiveMessage::Event(event),
        ],
        None => vec![LiveMessage::Event(event)],
    }
}
