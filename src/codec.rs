//! Codec fallback: walk an ordered candidate list until one sink accepts the
//! stream.
//!
//! ```text
//! Trying(0) --reject--> Trying(1) --reject--> ... Trying(M-1) --reject--> Exhausted
//!     |                     |
//!  confirm               confirm
//!     v                     v
//! Locked(0)             Locked(1)
//! ```
//!
//! A candidate is never revisited. `Locked` and `Exhausted` are terminal.

use serde::Serialize;

/// Where the fallback walk currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "index", rename_all = "lowercase")]
pub enum FallbackState {
    Trying(usize),
    Locked(usize),
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct CodecFallback {
    candidates: Vec<String>,
    state: FallbackState,
}

impl CodecFallback {
    pub fn new(candidates: Vec<String>) -> Self {
        let state = if candidates.is_empty() {
            FallbackState::Exhausted
        } else {
            FallbackState::Trying(0)
        };
        Self { candidates, state }
    }

    pub fn state(&self) -> FallbackState {
        self.state
    }

    /// The candidate being tried or locked in; `None` once exhausted.
    pub fn current(&self) -> Option<&str> {
        match self.state {
            FallbackState::Trying(i) | FallbackState::Locked(i) => {
                self.candidates.get(i).map(String::as_str)
            }
            FallbackState::Exhausted => None,
        }
    }

    /// Drop the current candidate and move to the next one.
    ///
    /// Returns the next candidate, or `None` when the list is exhausted.
    /// Has no effect once locked or exhausted.
    pub fn reject(&mut self) -> Option<&str> {
        if let FallbackState::Trying(i) = self.state {
            self.state = if i + 1 < self.candidates.len() {
                FallbackState::Trying(i + 1)
            } else {
                FallbackState::Exhausted
            };
        }
        match self.state {
            FallbackState::Trying(_) => self.current(),
            _ => None,
        }
    }

    /// The current candidate carried data successfully; stop searching.
    pub fn confirm(&mut self) {
        if let FallbackState::Trying(i) = self.state {
            self.state = FallbackState::Locked(i);
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.state, FallbackState::Locked(_))
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == FallbackState::Exhausted
    }

    /// Number of candidates tried so far, including the current one.
    pub fn attempts(&self) -> usize {
        match self.state {
            FallbackState::Trying(i) | FallbackState::Locked(i) => i + 1,
            FallbackState::Exhausted => self.candidates.len(),
        }
    }
}
