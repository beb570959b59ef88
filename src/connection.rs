//! WebSocket connection manager with capped linear reconnect backoff.
//!
//! The manager itself is synchronous and owned by the session actor. Socket
//! I/O runs in a spawned task that forwards everything it sees as
//! [`SocketEvent`]s over an unbounded channel; the actor feeds those back
//! through [`ConnectionManager::observe`], which filters events from
//! superseded sockets and applies the reconnect policy.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};

use crate::error::StreamError;

/// Close code for an orderly, intended shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close frame without a status code.
pub const NO_STATUS: u16 = 1005;
/// Connection dropped without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;
/// Closed by this end after a local failure it cannot recover from in place.
pub const INTERNAL_ERROR: u16 = 1011;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Open => "OPEN",
            ConnectionState::Closing => "CLOSING",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Reconnect policy
// ---------------------------------------------------------------------------

/// `delay = base_delay * attempt` for attempts `1..=max_attempts`; no jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(2000), 5)
    }
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self { base_delay, max_attempts }
    }

    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        Some(self.base_delay * attempt)
    }
}

// ---------------------------------------------------------------------------
// Socket events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEventKind {
    Opened,
    Binary(Vec<u8>),
    Text(String),
    Error(String),
    Closed { code: u16, reason: String },
}

/// An event from the socket task, tagged with the id of the socket that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketEvent {
    pub socket: u64,
    pub kind: SocketEventKind,
}

#[derive(Debug, Clone, Copy)]
struct PendingReconnect {
    at: Instant,
    delay: Duration,
}

impl PendingReconnect {
    fn after(delay: Duration) -> Self {
        Self { at: Instant::now() + delay, delay }
    }
}

#[derive(Debug)]
enum SocketCommand {
    Close { code: CloseCode, reason: String },
}

/// Validate `url` as a ws/wss endpoint and build the handshake request.
pub fn client_request(url: &str) -> Result<Request, StreamError> {
    let invalid = |detail: String| StreamError::Connect { url: url.to_string(), detail };
    if !(url.starts_with("ws://") || url.starts_with("wss://")) {
        return Err(invalid("scheme must be ws:// or wss://".to_string()));
    }
    let request = url.into_client_request().map_err(|e| invalid(e.to_string()))?;
    if request.uri().host().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(request)
}

// ---------------------------------------------------------------------------
// ConnectionManager
// ---------------------------------------------------------------------------

pub struct ConnectionManager {
    policy: ReconnectPolicy,
    state: ConnectionState,
    attempts: u32,
    url: Option<String>,
    socket_id: u64,
    user_closed: bool,
    reconnect: Option<PendingReconnect>,
    events: mpsc::UnboundedSender<SocketEvent>,
    commands: Option<mpsc::UnboundedSender<SocketCommand>>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Socket events are delivered to `events`.
    pub fn new(policy: ReconnectPolicy, events: mpsc::UnboundedSender<SocketEvent>) -> Self {
        Self {
            policy,
            state: ConnectionState::Disconnected,
            attempts: 0,
            url: None,
            socket_id: 0,
            user_closed: false,
            reconnect: None,
            events,
            commands: None,
            task: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Id of the current socket; events carrying any other id are stale.
    pub fn socket_id(&self) -> u64 {
        self.socket_id
    }

    /// Replace the target URL used by the next (re)connect.
    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = Some(url.into());
    }

    /// Start connecting to `url`. A no-op while already open or connecting.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(&mut self, url: &str) -> Result<(), StreamError> {
        if matches!(self.state, ConnectionState::Open | ConnectionState::Connecting) {
            tracing::debug!(state = %self.state, "open ignored, socket already live");
            return Ok(());
        }
        let request = client_request(url)?;

        self.url = Some(url.to_string());
        self.socket_id += 1;
        self.user_closed = false;
        self.reconnect = None;
        self.state = ConnectionState::Connecting;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        self.commands = Some(cmd_tx);
        tracing::info!(url, socket = self.socket_id, "connecting");
        self.task = Some(tokio::spawn(run_socket(
            request,
            self.socket_id,
            self.events.clone(),
            cmd_rx,
        )));
        Ok(())
    }

    /// Close the socket with a normal closure. Never triggers a reconnect and
    /// cancels one that is pending.
    pub fn close(&mut self, reason: &str) {
        self.reconnect = None;
        self.user_closed = true;
        if let Some(tx) = self.commands.take() {
            let _ = tx.send(SocketCommand::Close {
                code: CloseCode::Normal,
                reason: reason.to_string(),
            });
        }
        self.state = match self.state {
            ConnectionState::Open | ConnectionState::Connecting => ConnectionState::Closing,
            other => other,
        };
        tracing::info!(reason, "closing connection");
    }

    /// Drop the current socket after a local failure: close it with
    /// [`INTERNAL_ERROR`], ignore anything it still reports, and schedule a
    /// reconnect through the backoff policy.
    ///
    /// Returns the reconnect delay, or `None` once attempts are used up.
    pub fn abandon(&mut self, reason: &str) -> Option<Duration> {
        if let Some(tx) = self.commands.take() {
            let _ = tx.send(SocketCommand::Close {
                code: CloseCode::Error,
                reason: reason.to_string(),
            });
        }
        // Detached: the task finishes the close handshake on its own.
        self.task = None;
        self.socket_id += 1;
        self.state = ConnectionState::Disconnected;
        self.user_closed = false;
        self.reconnect = None;
        tracing::warn!(reason, "connection abandoned");

        let delay = self.handle_close(INTERNAL_ERROR)?;
        self.reconnect = Some(PendingReconnect::after(delay));
        Some(delay)
    }

    /// Apply a socket event. Returns `None` for events from a superseded
    /// socket, and for anything but `Closed` once the user closed it.
    pub fn observe(&mut self, event: SocketEvent) -> Option<SocketEventKind> {
        if event.socket != self.socket_id {
            tracing::trace!(socket = event.socket, current = self.socket_id, "stale socket event");
            return None;
        }
        if self.user_closed && !matches!(event.kind, SocketEventKind::Closed { .. }) {
            tracing::trace!(socket = event.socket, "event after user close ignored");
            return None;
        }
        match &event.kind {
            SocketEventKind::Opened => {
                self.state = ConnectionState::Open;
                self.attempts = 0;
                tracing::info!(socket = self.socket_id, "connection open");
            }
            SocketEventKind::Error(detail) => {
                tracing::warn!(socket = self.socket_id, %detail, "socket error");
            }
            SocketEventKind::Closed { code, reason } => {
                self.state = ConnectionState::Disconnected;
                self.commands = None;
                self.task = None;
                tracing::info!(code, %reason, "connection closed");
                if !self.user_closed {
                    if let Some(delay) = self.handle_close(*code) {
                        self.reconnect = Some(PendingReconnect::after(delay));
                        tracing::info!(
                            attempt = self.attempts,
                            delay_ms = delay.as_millis() as u64,
                            "reconnect scheduled"
                        );
                    }
                }
            }
            SocketEventKind::Binary(_) | SocketEventKind::Text(_) => {}
        }
        Some(event.kind)
    }

    /// Backoff decision for a close with `code`: the delay before the next
    /// attempt, or `None` when no reconnect should happen.
    pub fn handle_close(&mut self, code: u16) -> Option<Duration> {
        if code == NORMAL_CLOSURE || self.attempts >= self.policy.max_attempts {
            return None;
        }
        self.attempts += 1;
        self.policy.delay_for(self.attempts)
    }

    pub fn reconnect_deadline(&self) -> Option<Instant> {
        self.reconnect.map(|r| r.at)
    }

    /// The delay the pending reconnect was scheduled with.
    pub fn reconnect_delay(&self) -> Option<Duration> {
        self.reconnect.map(|r| r.delay)
    }

    /// True once every allowed attempt has been used without reaching Open.
    pub fn reconnects_exhausted(&self) -> bool {
        self.attempts >= self.policy.max_attempts
    }

    pub fn closed_by_user(&self) -> bool {
        self.user_closed
    }

    /// Arrange a connect to the stored URL after `delay`.
    pub fn schedule_connect(&mut self, delay: Duration) {
        self.reconnect = Some(PendingReconnect::after(delay));
    }

    /// Run a due reconnect. Returns `Ok(true)` when a new socket was started.
    pub fn fire_reconnect(&mut self) -> Result<bool, StreamError> {
        self.reconnect = None;
        if matches!(self.state, ConnectionState::Open | ConnectionState::Connecting) {
            return Ok(false);
        }
        let Some(url) = self.url.clone() else {
            return Ok(false);
        };
        self.open(&url)?;
        Ok(true)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn emit(events: &mpsc::UnboundedSender<SocketEvent>, socket: u64, kind: SocketEventKind) {
    let _ = events.send(SocketEvent { socket, kind });
}

async fn run_socket(
    request: Request,
    socket: u64,
    events: mpsc::UnboundedSender<SocketEvent>,
    mut commands: mpsc::UnboundedReceiver<SocketCommand>,
) {
    let ws = match tokio_tungstenite::connect_async(request).await {
        Ok((ws, _response)) => ws,
        Err(e) => {
            emit(&events, socket, SocketEventKind::Error(e.to_string()));
            emit(
                &events,
                socket,
                SocketEventKind::Closed { code: ABNORMAL_CLOSURE, reason: e.to_string() },
            );
            return;
        }
    };
    emit(&events, socket, SocketEventKind::Opened);

    let (mut sink, mut stream) = ws.split();
    let mut closing = false;
    let mut close: Option<(u16, String)> = None;

    loop {
        tokio::select! {
            cmd = commands.recv(), if !closing => match cmd {
                Some(SocketCommand::Close { code, reason }) => {
                    closing = true;
                    let frame = CloseFrame { code, reason: reason.into() };
                    if let Err(e) = sink.send(WsMessage::Close(Some(frame))).await {
                        tracing::debug!(error = %e, "close frame not sent");
                        close = Some((u16::from(code), "closed by client".to_string()));
                        break;
                    }
                }
                // Manager dropped without closing.
                None => break,
            },
            msg = stream.next() => match msg {
                Some(Ok(WsMessage::Binary(data))) => {
                    emit(&events, socket, SocketEventKind::Binary(data));
                }
                Some(Ok(WsMessage::Text(text))) => {
                    emit(&events, socket, SocketEventKind::Text(text));
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    close = Some(match frame {
                        Some(f) => (u16::from(f.code), f.reason.into_owned()),
                        None => (NO_STATUS, String::new()),
                    });
                }
                Some(Ok(_)) => {}
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => break,
                Some(Err(e)) => {
                    emit(&events, socket, SocketEventKind::Error(e.to_string()));
                    close.get_or_insert((ABNORMAL_CLOSURE, e.to_string()));
                    break;
                }
            }
        }
    }

    let (code, reason) = close.unwrap_or((ABNORMAL_CLOSURE, "connection dropped".to_string()));
    emit(&events, socket, SocketEventKind::Closed { code, reason });
}
