//! Ordered queue of segments waiting for the sink.

use std::collections::VecDeque;

use crate::segment::Segment;

/// FIFO of pending segments. Init segments are pushed to the front so they
/// reach the sink before any media already waiting.
#[derive(Debug, Default)]
pub struct AppendQueue {
    items: VecDeque<Segment>,
}

impl AppendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, segment: Segment) {
        self.items.push_back(segment);
    }

    pub fn push_front(&mut self, segment: Segment) {
        self.items.push_front(segment);
    }

    pub fn pop_front(&mut self) -> Option<Segment> {
        self.items.pop_front()
    }

    pub fn peek(&self) -> Option<&Segment> {
        self.items.front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total bytes waiting.
    pub fn pending_bytes(&self) -> usize {
        self.items.iter().map(Segment::len).sum()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
