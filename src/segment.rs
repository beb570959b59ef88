//! Inbound media segments and the init/media classifier.
//!
//! The server sends fragmented MP4 without any framing that marks which
//! binary unit carries the `moov` box, so classification is a heuristic:
//!
//! - small (`< 1 KiB`) units among the first three of a connection,
//! - the first unit after a connect or codec fallback,
//! - the first unit after the refresh interval (30 s) has elapsed,
//!
//! are treated as initialization segments. Nothing guarantees the server
//! actually resends an init segment on that schedule.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// What a segment carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    /// Codec/track metadata required before any media segment decodes.
    Init,
    /// Encoded frame data.
    Media,
}

impl std::fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SegmentKind::Init => write!(f, "init"),
            SegmentKind::Media => write!(f, "media"),
        }
    }
}

/// An immutable unit of stream data, owned by the append queue until it is
/// handed to the sink.
#[derive(Debug, Clone)]
pub struct Segment {
    data: Vec<u8>,
    kind: SegmentKind,
    ordinal: u64,
    received_at: Instant,
}

impl Segment {
    pub fn new(data: Vec<u8>, kind: SegmentKind, ordinal: u64, received_at: Instant) -> Self {
        Self { data, kind, ordinal, received_at }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn kind(&self) -> SegmentKind {
        self.kind
    }

    /// 1-based arrival position within the current connection.
    pub fn ordinal(&self) -> u64 {
        self.ordinal
    }

    pub fn received_at(&self) -> Instant {
        self.received_at
    }

    /// Hex dump of the first 16 bytes, for debug logs.
    pub fn head_hex(&self) -> String {
        self.data
            .iter()
            .take(16)
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Thresholds for the init-segment heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifierConfig {
    /// Units strictly smaller than this (bytes) may be init segments.
    pub size_threshold: usize,
    /// ...but only among the first `ordinal_limit` units of a connection.
    pub ordinal_limit: u64,
    /// Treat the next unit as init once this much time passed since the last.
    pub refresh_after: Duration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            size_threshold: 1024,
            ordinal_limit: 3,
            refresh_after: Duration::from_secs(30),
        }
    }
}

/// Tracks when the last init segment was accepted and classifies new units.
#[derive(Debug, Clone)]
pub struct SegmentClassifier {
    config: ClassifierConfig,
    last_init: Option<Instant>,
}

impl SegmentClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config, last_init: None }
    }

    pub fn classify(&self, len: usize, ordinal: u64, now: Instant) -> SegmentKind {
        let small_and_early =
            len < self.config.size_threshold && ordinal <= self.config.ordinal_limit;
        let due = self
            .since_last_init(now)
            .map_or(true, |elapsed| elapsed > self.config.refresh_after);
        if small_and_early || due {
            SegmentKind::Init
        } else {
            SegmentKind::Media
        }
    }

    /// Record that an init segment was accepted at `now`.
    pub fn mark_init(&mut self, now: Instant) {
        self.last_init = Some(now);
    }

    pub fn has_init(&self) -> bool {
        self.last_init.is_some()
    }

    pub fn since_last_init(&self, now: Instant) -> Option<Duration> {
        self.last_init.map(|at| now.saturating_duration_since(at))
    }

    /// Forget the last init; the next unit will be classified as init.
    pub fn reset(&mut self) {
        self.last_init = None;
    }
}
