//! The session actor: one task that owns the connection manager, the
//! appender and the snapshot renderer, and drives them from a single
//! `select!` loop. All state lives here; nothing is shared across tasks.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant, MissedTickBehavior};

use crate::appender::{AppenderConfig, IncrementalMediaAppender};
use crate::config::{build_ws_url, ClientConfig, StreamKind};
use crate::connection::{
    ConnectionManager, ConnectionState, SocketEvent, SocketEventKind, NORMAL_CLOSURE,
};
use crate::error::StreamError;
use crate::events::AppenderEvent;
use crate::sink::{SinkFactory, SinkSignal, SinkState};
use crate::snapshot::{FrameDisplay, SnapshotRenderer};
use crate::stats::StatsTracker;

/// Delay before reconnecting after a stream-kind switch.
pub const SWITCH_RECONNECT_DELAY: Duration = Duration::from_millis(500);

/// Requests from the embedding application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Connect,
    Disconnect,
    SwitchKind(StreamKind),
    Shutdown,
}

pub struct StreamSession {
    config: ClientConfig,
    kind: StreamKind,
    connection: ConnectionManager,
    socket_rx: mpsc::UnboundedReceiver<SocketEvent>,
    appender: IncrementalMediaAppender,
    sink_rx: mpsc::UnboundedReceiver<SinkSignal>,
    snapshots: SnapshotRenderer,
    stats: StatsTracker,
    events: mpsc::UnboundedSender<AppenderEvent>,
}

impl StreamSession {
    pub fn new(
        config: ClientConfig,
        factory: Box<dyn SinkFactory>,
        display: Box<dyn FrameDisplay>,
        events: mpsc::UnboundedSender<AppenderEvent>,
    ) -> Self {
        let (socket_tx, socket_rx) = mpsc::unbounded_channel();
        let (sink_tx, sink_rx) = mpsc::unbounded_channel();
        let connection = ConnectionManager::new(config.reconnect_policy(), socket_tx);
        let appender = IncrementalMediaAppender::new(AppenderConfig::from(&config), factory, sink_tx)
            .with_events(events.clone());
        Self {
            kind: config.kind,
            config,
            connection,
            socket_rx,
            appender,
            sink_rx,
            snapshots: SnapshotRenderer::new(display),
            stats: StatsTracker::new(std::time::Instant::now()),
            events,
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    fn emit(&self, event: AppenderEvent) {
        let _ = self.events.send(event);
    }

    fn emit_state(&self) {
        self.emit(AppenderEvent::ConnectionState { state: self.connection.state() });
    }

    /// Open a socket to the configured server for the current kind.
    pub fn connect(&mut self) -> Result<(), StreamError> {
        let url = build_ws_url(self.config.server.as_deref().unwrap_or(""), self.kind)?;
        self.connection.open(&url)?;
        self.emit_state();
        Ok(())
    }

    /// Close the socket and drop sink, queue and snapshot without waiting.
    pub fn disconnect(&mut self) {
        self.connection.close("User disconnected");
        self.appender.on_close();
        self.snapshots.reset();
        self.emit_state();
    }

    /// Switch between live and snapshot streams, reconnecting shortly after
    /// if a connection was live.
    pub fn switch_kind(&mut self, kind: StreamKind) -> Result<(), StreamError> {
        if kind == self.kind {
            return Ok(());
        }
        let was_live = matches!(
            self.connection.state(),
            ConnectionState::Open | ConnectionState::Connecting
        );
        if was_live {
            self.disconnect();
        }
        self.kind = kind;
        let url = build_ws_url(self.config.server.as_deref().unwrap_or(""), kind)?;
        self.connection.set_url(url);
        tracing::info!(%kind, "stream kind selected");
        if was_live {
            self.connection.schedule_connect(SWITCH_RECONNECT_DELAY);
        }
        Ok(())
    }

    /// Run until `Shutdown`, the command channel closing, or a terminal error.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    ) -> Result<(), StreamError> {
        if let Err(e) = self.connect() {
            self.emit(AppenderEvent::Fatal { message: e.to_string() });
            return Err(e);
        }

        let mut janitor = tokio::time::interval(self.config.janitor_tick());
        janitor.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let deadline = self.connection.reconnect_deadline();
            tokio::select! {
                Some(event) = self.socket_rx.recv() => {
                    if let Some(err) = self.handle_socket(event) {
                        self.disconnect();
                        return Err(err);
                    }
                }
                Some(signal) = self.sink_rx.recv() => {
                    self.appender.on_sink_signal(signal);
                }
                _ = janitor.tick() => self.on_tick(),
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Err(e) = self.connection.fire_reconnect() {
                        self.emit(AppenderEvent::Fatal { message: e.to_string() });
                        return Err(e);
                    }
                    self.emit_state();
                }
                cmd = commands.recv() => match cmd {
                    Some(SessionCommand::Connect) => {
                        if let Err(e) = self.connect() {
                            self.emit(AppenderEvent::Fatal { message: e.to_string() });
                            return Err(e);
                        }
                    }
                    Some(SessionCommand::Disconnect) => self.disconnect(),
                    Some(SessionCommand::SwitchKind(kind)) => self.switch_kind(kind)?,
                    Some(SessionCommand::Shutdown) | None => {
                        self.disconnect();
                        return Ok(());
                    }
                }
            }

            if self.kind == StreamKind::Live {
                if self.appender.is_exhausted() {
                    let attempted = self.appender.codec_attempts();
                    self.disconnect();
                    return Err(StreamError::CodecsExhausted { attempted });
                }
                if self.appender.sink_state() == SinkState::Errored
                    && self.connection.state() == ConnectionState::Open
                {
                    self.rebuild_sink()?;
                }
            }
        }
    }

    /// Apply one socket event. Returns a terminal error when reconnects are
    /// used up.
    fn handle_socket(&mut self, event: SocketEvent) -> Option<StreamError> {
        let kind = self.connection.observe(event)?;
        let now = std::time::Instant::now();
        match kind {
            SocketEventKind::Opened => {
                self.emit_state();
                self.stats.reset(now);
                match self.kind {
                    StreamKind::Live => self.appender.on_open(),
                    StreamKind::Snapshot => self.snapshots.reset(),
                }
            }
            SocketEventKind::Binary(data) => {
                self.stats.record(data.len(), now);
                match self.kind {
                    StreamKind::Live => self.appender.on_segment(data, now),
                    StreamKind::Snapshot => match self.snapshots.on_frame(&data) {
                        Ok(frame) => self.emit(AppenderEvent::SnapshotShown { frame, bytes: data.len() }),
                        Err(e) => {
                            tracing::warn!(error = %e, "snapshot frame dropped");
                            self.emit(AppenderEvent::Warning { message: e.to_string() });
                        }
                    },
                }
            }
            SocketEventKind::Text(text) => self.appender.on_text(&text),
            SocketEventKind::Error(detail) => {
                let err = StreamError::Transport(detail);
                self.emit(AppenderEvent::Warning { message: err.to_string() });
            }
            SocketEventKind::Closed { code, reason } => {
                self.appender.on_close();
                self.snapshots.reset();
                self.emit_state();
                if self.connection.closed_by_user() {
                    return None;
                }
                if let Some(delay) = self.connection.reconnect_delay() {
                    self.emit(AppenderEvent::ReconnectScheduled {
                        attempt: self.connection.attempts(),
                        delay_ms: delay.as_millis() as u64,
                    });
                } else if code != NORMAL_CLOSURE && self.connection.reconnects_exhausted() {
                    let err = StreamError::Transport(format!(
                        "connection lost (code {code}: {reason}) after {} reconnect attempts",
                        self.connection.attempts()
                    ));
                    self.emit(AppenderEvent::Fatal { message: err.to_string() });
                    return Some(err);
                }
            }
        }
        None
    }

    /// The sink failed after its codec was locked in. Drop the connection
    /// and let the backoff reconnect start over with a fresh sink.
    fn rebuild_sink(&mut self) -> Result<(), StreamError> {
        self.appender.on_close();
        match self.connection.abandon("media sink errored") {
            Some(delay) => {
                self.emit_state();
                self.emit(AppenderEvent::ReconnectScheduled {
                    attempt: self.connection.attempts(),
                    delay_ms: delay.as_millis() as u64,
                });
                Ok(())
            }
            None => {
                let err = StreamError::Transport(
                    "media sink errored and reconnect attempts are used up".to_string(),
                );
                self.emit(AppenderEvent::Fatal { message: err.to_string() });
                Err(err)
            }
        }
    }

    fn on_tick(&mut self) {
        if self.connection.state() != ConnectionState::Open {
            return;
        }
        if self.kind == StreamKind::Live {
            self.appender.janitor_tick();
            if let Some((ahead_secs, percent)) = self.appender.buffer_health() {
                self.emit(AppenderEvent::BufferHealth { ahead_secs, percent });
            }
        }
        self.emit(AppenderEvent::Stats(self.stats.snapshot()));
    }
}
