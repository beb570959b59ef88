//! Receive-side counters: chunks, bytes, data rate, buffer health.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::sink::BufferedRange;

/// Buffered-ahead seconds that count as a full (100 %) buffer.
pub const HEALTHY_BUFFER_SECS: f64 = 5.0;

const RATE_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct StreamStats {
    pub chunks: u64,
    pub bytes: u64,
    /// Kilobits per second over the last completed one-second window.
    pub kbps: f64,
}

/// Accumulates [`StreamStats`] and recomputes the rate once per window.
#[derive(Debug, Clone)]
pub struct StatsTracker {
    stats: StreamStats,
    window_start: Instant,
    window_bytes: u64,
}

impl StatsTracker {
    pub fn new(now: Instant) -> Self {
        Self { stats: StreamStats::default(), window_start: now, window_bytes: 0 }
    }

    /// Start over, e.g. on a fresh connection.
    pub fn reset(&mut self, now: Instant) {
        *self = Self::new(now);
    }

    pub fn record(&mut self, bytes: usize, now: Instant) {
        self.stats.chunks += 1;
        self.stats.bytes += bytes as u64;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= RATE_WINDOW {
            let delta = self.stats.bytes - self.window_bytes;
            self.stats.kbps = (delta as f64 * 8.0) / 1024.0;
            self.window_start = now;
            self.window_bytes = self.stats.bytes;
        }
    }

    pub fn snapshot(&self) -> StreamStats {
        self.stats
    }
}

/// Seconds buffered past `position` and the matching fill percentage.
///
/// `None` when nothing is buffered.
pub fn buffer_health(ranges: &[BufferedRange], position: f64) -> Option<(f64, f64)> {
    let last = ranges.last()?;
    let ahead = last.end - position;
    let percent = (ahead / HEALTHY_BUFFER_SECS * 100.0).clamp(0.0, 100.0);
    Some((ahead, percent))
}

/// Human-readable byte count: `0 Bytes`, `1.5 KB`, `2 MB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = (value * 100.0).round() / 100.0;
    format!("{rounded} {}", UNITS[unit])
}
