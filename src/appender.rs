//! # IncrementalMediaAppender
//!
//! Feeds classified segments into a buffered-media sink one append at a time.
//!
//! ## Flow
//! socket bytes → [`SegmentClassifier`] → [`AppendQueue`] → (sink Ready)
//! pop + [`MediaSink::append`] → [`SinkSignal`] → drain next.
//!
//! ## Guarantees
//! - At most one append is in flight. [`SinkState::Busy`] gates `drain`, and
//!   completions are matched against the in-flight [`AppendTicket`], so a
//!   stray signal (after abort, teardown or codec fallback) is ignored.
//! - Media segments reach the sink in arrival order; an init segment is
//!   pushed to the front of the queue and goes next.
//! - Codec candidates are tried in order and never revisited.
//!
//! ## NOT Responsible For
//! - Socket lifecycle and reconnects (see [`crate::connection`])
//! - Timers: the owner calls [`IncrementalMediaAppender::janitor_tick`]

use std::time::Instant;

use tokio::sync::mpsc;

use crate::codec::{CodecFallback, FallbackState};
use crate::config::ClientConfig;
use crate::error::{SinkError, StreamError};
use crate::events::AppenderEvent;
use crate::janitor::BufferJanitor;
use crate::queue::AppendQueue;
use crate::segment::{ClassifierConfig, Segment, SegmentClassifier, SegmentKind};
use crate::sink::{
    AppendTicket, MediaSink, SinkFactory, SinkNotifier, SinkSignal, SinkState,
};
use crate::stats;

/// Settings the appender needs from the client config.
#[derive(Debug, Clone)]
pub struct AppenderConfig {
    pub codecs: Vec<String>,
    pub classifier: ClassifierConfig,
    pub retention: std::time::Duration,
}

impl From<&ClientConfig> for AppenderConfig {
    fn from(cfg: &ClientConfig) -> Self {
        Self {
            codecs: cfg.codecs.clone(),
            classifier: cfg.classifier(),
            retention: cfg.retention(),
        }
    }
}

impl Default for AppenderConfig {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    ticket: AppendTicket,
    ordinal: u64,
    kind: SegmentKind,
    bytes: usize,
}

pub struct IncrementalMediaAppender {
    config: AppenderConfig,
    factory: Box<dyn SinkFactory>,
    sink: Option<Box<dyn MediaSink>>,
    sink_state: SinkState,
    codec: CodecFallback,
    classifier: SegmentClassifier,
    queue: AppendQueue,
    janitor: BufferJanitor,
    connected: bool,
    ordinal: u64,
    /// Bumped on every sink creation.
    generation: u64,
    next_seq: u64,
    in_flight: Option<InFlight>,
    signals: mpsc::UnboundedSender<SinkSignal>,
    events: Option<mpsc::UnboundedSender<AppenderEvent>>,
}

impl IncrementalMediaAppender {
    /// Sinks created by `factory` report completions into `signals`; the
    /// owner routes whatever arrives there to [`Self::on_sink_signal`].
    pub fn new(
        config: AppenderConfig,
        factory: Box<dyn SinkFactory>,
        signals: mpsc::UnboundedSender<SinkSignal>,
    ) -> Self {
        let codec = CodecFallback::new(config.codecs.clone());
        let classifier = SegmentClassifier::new(config.classifier);
        let janitor = BufferJanitor::new(config.retention);
        Self {
            config,
            factory,
            sink: None,
            sink_state: SinkState::Uninitialized,
            codec,
            classifier,
            queue: AppendQueue::new(),
            janitor,
            connected: false,
            ordinal: 0,
            generation: 0,
            next_seq: 0,
            in_flight: None,
            signals,
            events: None,
        }
    }

    /// Emit [`AppenderEvent`]s into `events`.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<AppenderEvent>) -> Self {
        self.events = Some(events);
        self
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn sink_state(&self) -> SinkState {
        self.sink_state
    }

    pub fn fallback_state(&self) -> FallbackState {
        self.codec.state()
    }

    pub fn current_codec(&self) -> Option<&str> {
        self.codec.current()
    }

    pub fn is_exhausted(&self) -> bool {
        self.codec.is_exhausted()
    }

    /// Codec candidates tried on the current connection.
    pub fn codec_attempts(&self) -> usize {
        self.codec.attempts()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn in_flight(&self) -> Option<AppendTicket> {
        self.in_flight.map(|f| f.ticket)
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    /// The socket opened: start a fresh queue, classifier and codec walk.
    pub fn on_open(&mut self) {
        self.connected = true;
        self.ordinal = 0;
        self.queue.clear();
        self.classifier.reset();
        self.codec = CodecFallback::new(self.config.codecs.clone());
        self.establish_sink();
    }

    /// The socket closed or was closed: drop the sink and everything queued
    /// without waiting for an in-flight append.
    pub fn on_close(&mut self) {
        self.connected = false;
        self.teardown_sink();
        self.queue.clear();
        self.classifier.reset();
    }

    // -----------------------------------------------------------------------
    // Inbound data
    // -----------------------------------------------------------------------

    /// Classify and enqueue one binary unit, then try to drain.
    pub fn on_segment(&mut self, data: Vec<u8>, now: Instant) {
        if !self.connected {
            tracing::debug!(bytes = data.len(), "segment dropped, not connected");
            return;
        }
        self.ordinal += 1;
        if matches!(self.sink_state, SinkState::Errored | SinkState::Uninitialized) {
            tracing::trace!(ordinal = self.ordinal, "segment dropped, no usable sink");
            return;
        }

        let kind = self.classifier.classify(data.len(), self.ordinal, now);
        let segment = Segment::new(data, kind, self.ordinal, now);
        match kind {
            SegmentKind::Init => {
                tracing::info!(ordinal = segment.ordinal(), bytes = segment.len(), "init segment detected");
                self.emit(AppenderEvent::InitSegment {
                    ordinal: segment.ordinal(),
                    bytes: segment.len(),
                });
                self.classifier.mark_init(now);
                self.clear_sink_buffer();
                self.queue.push_front(segment);
            }
            SegmentKind::Media => self.queue.push_back(segment),
        }
        self.drain();
    }

    /// Text frames carry nothing a sink can use; report and drop.
    pub fn on_text(&mut self, text: &str) {
        let err = StreamError::MalformedSegment(format!(
            "unexpected text frame ({} bytes)",
            text.len()
        ));
        tracing::warn!(error = %err, "frame dropped");
        self.emit(AppenderEvent::Warning { message: err.to_string() });
    }

    /// Completion (or late failure) of an append.
    pub fn on_sink_signal(&mut self, signal: SinkSignal) {
        let flight = match self.in_flight {
            Some(f) if f.ticket == signal.ticket => f,
            _ => {
                tracing::trace!(ticket = ?signal.ticket, "stale sink signal ignored");
                return;
            }
        };
        self.in_flight = None;
        self.sink_state = SinkState::Ready;

        match signal.outcome {
            Ok(()) => {
                if !self.codec.is_locked() {
                    self.codec.confirm();
                    tracing::info!(codec = self.codec.current().unwrap_or_default(), "codec locked");
                }
                self.emit(AppenderEvent::SegmentAppended {
                    ordinal: flight.ordinal,
                    kind: flight.kind,
                    bytes: flight.bytes,
                });
            }
            Err(err) => self.handle_append_error(err, flight.ordinal),
        }
        self.drain();
    }

    // -----------------------------------------------------------------------
    // Janitor
    // -----------------------------------------------------------------------

    /// Remove buffered ranges that fell behind the retention window.
    ///
    /// Skipped while an append is in flight; the next tick retries. Returns
    /// the number of ranges removed.
    pub fn janitor_tick(&mut self) -> usize {
        if self.sink_state != SinkState::Ready {
            if self.sink_state == SinkState::Busy {
                tracing::trace!("janitor deferred, append in flight");
            }
            return 0;
        }
        let Some(sink) = self.sink.as_mut() else {
            return 0;
        };
        let expired = self.janitor.expired(&sink.buffered(), sink.playback_position());
        let mut removed = Vec::with_capacity(expired.len());
        for range in expired {
            match sink.remove(range) {
                Ok(()) => removed.push(range),
                Err(e) => tracing::debug!(error = %e, "buffer trim failed"),
            }
        }
        for range in &removed {
            tracing::debug!(start = range.start, end = range.end, "cleaned buffer");
            self.emit(AppenderEvent::BufferTrimmed { start: range.start, end: range.end });
        }
        removed.len()
    }

    /// Seconds buffered ahead of playback and a 0-100 fill figure.
    pub fn buffer_health(&self) -> Option<(f64, f64)> {
        let sink = self.sink.as_ref()?;
        stats::buffer_health(&sink.buffered(), sink.playback_position())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn emit(&self, event: AppenderEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Issue appends while the sink is Ready and there is work.
    fn drain(&mut self) {
        while self.connected && self.sink_state == SinkState::Ready {
            let Some(segment) = self.queue.pop_front() else {
                return;
            };
            if let Err(e) = self.begin_append(segment) {
                tracing::error!(error = %e, "append discipline violated");
                self.emit(AppenderEvent::Fatal { message: e.to_string() });
                return;
            }
        }
    }

    fn begin_append(&mut self, segment: Segment) -> Result<(), StreamError> {
        if self.in_flight.is_some() || self.sink_state == SinkState::Busy {
            return Err(StreamError::SinkBusyViolation);
        }
        let Some(sink) = self.sink.as_mut() else {
            return Ok(());
        };
        let ticket = AppendTicket { generation: self.generation, seq: self.next_seq };
        self.next_seq += 1;
        tracing::debug!(
            ordinal = segment.ordinal(),
            kind = %segment.kind(),
            bytes = segment.len(),
            head = %segment.head_hex(),
            queued_ms = Instant::now()
                .saturating_duration_since(segment.received_at())
                .as_millis() as u64,
            "appending segment"
        );

        self.sink_state = SinkState::Busy;
        match sink.append(segment.data(), ticket) {
            Ok(()) => {
                self.in_flight = Some(InFlight {
                    ticket,
                    ordinal: segment.ordinal(),
                    kind: segment.kind(),
                    bytes: segment.len(),
                });
            }
            Err(err) => {
                self.sink_state = SinkState::Ready;
                self.handle_append_error(err, segment.ordinal());
            }
        }
        Ok(())
    }

    fn handle_append_error(&mut self, err: SinkError, ordinal: u64) {
        let codec = self.codec.current().unwrap_or_default().to_string();
        if !err.is_structural() {
            tracing::warn!(ordinal, error = %err, "append failed, segment dropped");
            self.emit(AppenderEvent::Warning {
                message: format!("segment {ordinal} dropped: {err}"),
            });
            return;
        }

        if self.codec.is_locked() {
            let fatal = StreamError::UnsupportedFormat { codec, detail: err.to_string() };
            tracing::error!(error = %fatal, "sink errored");
            self.sink_state = SinkState::Errored;
            self.queue.clear();
            self.emit(AppenderEvent::Fatal { message: fatal.to_string() });
            return;
        }

        tracing::warn!(%codec, error = %err, "codec rejected on append");
        self.emit(AppenderEvent::CodecRejected { codec, reason: err.to_string() });
        self.codec.reject();
        self.queue.clear();
        self.classifier.reset();
        self.establish_sink();
    }

    /// Create a sink for the current candidate, walking forward on failure.
    fn establish_sink(&mut self) {
        self.teardown_sink();
        while let Some(mime) = self.codec.current().map(str::to_string) {
            if !self.factory.supports(&mime) {
                tracing::warn!(codec = %mime, "codec not supported");
                self.emit(AppenderEvent::CodecRejected {
                    codec: mime,
                    reason: "not supported".to_string(),
                });
                self.codec.reject();
                continue;
            }
            self.generation += 1;
            match self.factory.create(&mime, SinkNotifier::new(self.signals.clone())) {
                Ok(sink) => {
                    tracing::info!(codec = %mime, generation = self.generation, "sink created");
                    self.sink = Some(sink);
                    self.sink_state = SinkState::Ready;
                    self.emit(AppenderEvent::CodecSelected { codec: mime });
                    return;
                }
                Err(err) => {
                    tracing::warn!(codec = %mime, error = %err, "sink creation failed");
                    self.emit(AppenderEvent::CodecRejected { codec: mime, reason: err.to_string() });
                    self.codec.reject();
                }
            }
        }

        let fatal = StreamError::CodecsExhausted { attempted: self.codec.attempts() };
        tracing::error!(error = %fatal, "all codec configurations failed");
        self.sink_state = SinkState::Errored;
        self.queue.clear();
        self.emit(AppenderEvent::Fatal { message: fatal.to_string() });
    }

    fn teardown_sink(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            if self.in_flight.is_some() {
                sink.abort();
            }
        }
        self.in_flight = None;
        self.sink_state = SinkState::Uninitialized;
    }

    /// Abort any in-flight append and remove everything buffered, ahead of a
    /// new init segment.
    fn clear_sink_buffer(&mut self) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        sink.abort();
        if self.in_flight.take().is_some() {
            self.sink_state = SinkState::Ready;
        }
        for range in sink.buffered() {
            if let Err(e) = sink.remove(range) {
                tracing::debug!(error = %e, "buffer clear failed");
            }
        }
    }
}
