//! Buffer janitor: decides which buffered ranges are far enough behind the
//! playback position to be removed from the sink.

use std::time::Duration;

use crate::sink::BufferedRange;

#[derive(Debug, Clone, Copy)]
pub struct BufferJanitor {
    retention: Duration,
}

impl Default for BufferJanitor {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl BufferJanitor {
    pub fn new(retention: Duration) -> Self {
        Self { retention }
    }

    /// Ranges whose end lies more than `retention` behind `position` (seconds).
    pub fn expired(&self, ranges: &[BufferedRange], position: f64) -> Vec<BufferedRange> {
        let cutoff = position - self.retention.as_secs_f64();
        ranges.iter().copied().filter(|r| r.end < cutoff).collect()
    }
}
