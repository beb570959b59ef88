//! Snapshot stream rendering: every binary frame is a complete JPEG shown
//! as soon as it arrives, replacing (and releasing) the previous one.

use std::path::PathBuf;

use crate::error::StreamError;

/// Where decoded stills end up.
pub trait FrameDisplay: Send {
    /// Show `frame`, releasing whatever was shown before.
    fn show(&mut self, frame: &[u8]) -> Result<(), StreamError>;

    /// Release the currently shown frame, if any.
    fn release(&mut self);
}

/// Writes the latest frame to `<dir>/latest.jpg`.
///
/// Each frame is written to a temporary file first and renamed over the
/// previous one, so readers never observe a half-written image.
pub struct FileFrameDisplay {
    dir: PathBuf,
    shown: bool,
}

impl FileFrameDisplay {
    pub const FILE_NAME: &'static str = "latest.jpg";

    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StreamError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, shown: false })
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(Self::FILE_NAME)
    }
}

impl FrameDisplay for FileFrameDisplay {
    fn show(&mut self, frame: &[u8]) -> Result<(), StreamError> {
        let tmp = self.dir.join(".latest.jpg.tmp");
        std::fs::write(&tmp, frame)?;
        std::fs::rename(&tmp, self.path())?;
        self.shown = true;
        Ok(())
    }

    fn release(&mut self) {
        // The last still stays on disk as the final frame; only forget it.
        self.shown = false;
    }
}

/// Counts and forwards snapshot frames to a [`FrameDisplay`].
pub struct SnapshotRenderer {
    display: Box<dyn FrameDisplay>,
    frames: u64,
}

impl SnapshotRenderer {
    pub fn new(display: Box<dyn FrameDisplay>) -> Self {
        Self { display, frames: 0 }
    }

    /// Show one frame. Returns its 1-based number within this connection.
    pub fn on_frame(&mut self, frame: &[u8]) -> Result<u64, StreamError> {
        if frame.is_empty() {
            return Err(StreamError::MalformedSegment("empty snapshot frame".to_string()));
        }
        self.display.show(frame)?;
        self.frames += 1;
        tracing::debug!(frame = self.frames, bytes = frame.len(), "snapshot displayed");
        Ok(self.frames)
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Release the shown frame and reset the counter.
    pub fn reset(&mut self) {
        self.display.release();
        self.frames = 0;
    }
}
