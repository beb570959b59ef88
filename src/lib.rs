//! # screen-stream
//!
//! Client for a remote screen-capture server that streams either fragmented
//! H.264-in-MP4 segments (`/screen/live`) or JPEG stills
//! (`/screen/snapstream`) over a WebSocket.
//!
//! The live path is built around [`IncrementalMediaAppender`], a sans-IO
//! state machine that classifies inbound units, queues them, and feeds a
//! [`MediaSink`] one append at a time, falling back through codec
//! candidates when the sink rejects the stream. [`StreamSession`] wires it
//! to a [`ConnectionManager`] and timers inside one tokio task.
//!
//! ```rust,ignore
//! let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
//! let (cmd_tx, cmd_rx) = tokio::sync::mpsc::unbounded_channel();
//! let session = StreamSession::new(
//!     config,
//!     Box::new(FileSinkFactory::new("capture.mp4")),
//!     Box::new(FileFrameDisplay::new("frames")?),
//!     events_tx,
//! );
//! tokio::spawn(session.run(cmd_rx));
//! ```

pub mod appender;
pub mod cli;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod janitor;
pub mod queue;
pub mod segment;
pub mod session;
pub mod sink;
pub mod snapshot;
pub mod stats;

pub use appender::{AppenderConfig, IncrementalMediaAppender};
pub use codec::{CodecFallback, FallbackState};
pub use config::{build_ws_url, ClientConfig, StreamKind};
pub use connection::{ConnectionManager, ConnectionState, ReconnectPolicy};
pub use error::{SinkError, StreamError};
pub use events::AppenderEvent;
pub use segment::{Segment, SegmentClassifier, SegmentKind};
pub use session::{SessionCommand, StreamSession};
pub use sink::{
    AppendTicket, BufferedRange, FileSinkFactory, MediaSink, SinkFactory, SinkNotifier,
    SinkSignal, SinkState,
};
pub use snapshot::{FileFrameDisplay, FrameDisplay, SnapshotRenderer};
