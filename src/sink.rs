//! The buffered-media sink the appender feeds.
//!
//! A sink accepts one append at a time. [`MediaSink::append`] only *starts*
//! the append; the sink reports completion (or a late failure) by sending a
//! [`SinkSignal`] through the [`SinkNotifier`] it was created with. The
//! appender matches signals against the [`AppendTicket`] of the append in
//! flight and ignores anything else.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::SinkError;

// ---------------------------------------------------------------------------
// Shared types
// ---------------------------------------------------------------------------

/// Mirrors the sink's own "updating" flag as seen by the appender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkState {
    /// No sink exists (not connected, or every codec failed).
    Uninitialized,
    /// Idle; the next append may be issued.
    Ready,
    /// An append is in flight.
    Busy,
    /// The sink hit an unrecoverable error; nothing more is appended.
    Errored,
}

/// One contiguous buffered time range, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BufferedRange {
    pub start: f64,
    pub end: f64,
}

impl BufferedRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

/// Identifies one append. `generation` changes whenever a sink is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AppendTicket {
    pub generation: u64,
    pub seq: u64,
}

/// Completion report for an append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkSignal {
    pub ticket: AppendTicket,
    pub outcome: Result<(), SinkError>,
}

impl SinkSignal {
    pub fn completed(ticket: AppendTicket) -> Self {
        Self { ticket, outcome: Ok(()) }
    }

    pub fn failed(ticket: AppendTicket, err: SinkError) -> Self {
        Self { ticket, outcome: Err(err) }
    }
}

/// Handle a sink uses to report append completion back to the appender.
#[derive(Debug, Clone)]
pub struct SinkNotifier {
    tx: mpsc::UnboundedSender<SinkSignal>,
}

impl SinkNotifier {
    pub fn new(tx: mpsc::UnboundedSender<SinkSignal>) -> Self {
        Self { tx }
    }

    pub fn complete(&self, ticket: AppendTicket) {
        // A closed channel means the appender is gone; nothing to tell.
        let _ = self.tx.send(SinkSignal::completed(ticket));
    }

    pub fn fail(&self, ticket: AppendTicket, err: SinkError) {
        let _ = self.tx.send(SinkSignal::failed(ticket, err));
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A buffered-media consumer that decodes appended bytes for playback.
pub trait MediaSink: Send {
    /// Begin appending `data`. An `Err` means the append was rejected
    /// synchronously; otherwise completion arrives through the notifier.
    fn append(&mut self, data: &[u8], ticket: AppendTicket) -> Result<(), SinkError>;

    /// Cancel an in-flight append, if any.
    fn abort(&mut self);

    /// Drop buffered data in `range`.
    fn remove(&mut self, range: BufferedRange) -> Result<(), SinkError>;

    /// Currently buffered ranges, ordered by start.
    fn buffered(&self) -> Vec<BufferedRange>;

    /// Current playback position in seconds.
    fn playback_position(&self) -> f64;
}

/// Creates sinks for a given MIME type.
pub trait SinkFactory: Send {
    /// Cheap capability check made before `create`.
    fn supports(&self, _mime: &str) -> bool {
        true
    }

    fn create(&mut self, mime: &str, notifier: SinkNotifier) -> Result<Box<dyn MediaSink>, SinkError>;
}

// ---------------------------------------------------------------------------
// File-backed sink
// ---------------------------------------------------------------------------

/// Writes every appended segment to a file. The file has no playback clock,
/// so it never reports buffered ranges and the janitor leaves it alone.
pub struct FileSink {
    file: File,
    notifier: SinkNotifier,
    written: u64,
}

impl MediaSink for FileSink {
    fn append(&mut self, data: &[u8], ticket: AppendTicket) -> Result<(), SinkError> {
        self.file
            .write_all(data)
            .map_err(|e| SinkError::Other(format!("write failed: {e}")))?;
        self.written += data.len() as u64;
        tracing::trace!(bytes = data.len(), total = self.written, "segment written");
        self.notifier.complete(ticket);
        Ok(())
    }

    fn abort(&mut self) {}

    fn remove(&mut self, _range: BufferedRange) -> Result<(), SinkError> {
        Ok(())
    }

    fn buffered(&self) -> Vec<BufferedRange> {
        Vec::new()
    }

    fn playback_position(&self) -> f64 {
        0.0
    }
}

/// Creates [`FileSink`]s for any `video/mp4` type. The first sink truncates
/// the output file; later ones (reconnects, codec fallback) append to it.
pub struct FileSinkFactory {
    path: PathBuf,
    truncate_next: bool,
}

impl FileSinkFactory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), truncate_next: true }
    }
}

impl SinkFactory for FileSinkFactory {
    fn supports(&self, mime: &str) -> bool {
        mime.trim_start().starts_with("video/mp4")
    }

    fn create(&mut self, mime: &str, notifier: SinkNotifier) -> Result<Box<dyn MediaSink>, SinkError> {
        if !self.supports(mime) {
            return Err(SinkError::NotSupported(mime.to_string()));
        }
        let mut opts = OpenOptions::new();
        opts.create(true);
        if self.truncate_next {
            opts.write(true).truncate(true);
        } else {
            opts.append(true);
        }
        let file = opts
            .open(&self.path)
            .map_err(|e| SinkError::Other(format!("{}: {e}", self.path.display())))?;
        self.truncate_next = false;
        tracing::debug!(path = %self.path.display(), mime, "file sink opened");
        Ok(Box::new(FileSink { file, notifier, written: 0 }))
    }
}
