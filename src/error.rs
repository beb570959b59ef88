//! Crate-level error types.
//!
//! [`StreamError`] is what callers of the session see. [`SinkError`] is what a
//! buffered-media sink reports back to the appender; the appender decides
//! whether a sink error is recoverable, triggers codec fallback, or is fatal.

use thiserror::Error;

/// Errors surfaced by the streaming client.
///
/// Only [`StreamError::Connect`] and [`StreamError::CodecsExhausted`] are
/// terminal from the user's point of view. Transport and format failures are
/// recovered locally (reconnect and codec fallback respectively).
#[derive(Debug, Error)]
pub enum StreamError {
    /// The endpoint could not be turned into a WebSocket request.
    #[error("invalid endpoint '{url}': {detail}")]
    Connect { url: String, detail: String },

    /// The socket failed mid-stream.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The sink rejected the current codec.
    #[error("unsupported format '{codec}': {detail}")]
    UnsupportedFormat { codec: String, detail: String },

    /// Every configured codec candidate failed.
    #[error("cannot render stream: all {attempted} codec candidates failed")]
    CodecsExhausted { attempted: usize },

    /// An append was issued while another one was still in flight.
    #[error("append issued while the sink was busy")]
    SinkBusyViolation,

    /// A frame had a shape the current stream kind cannot use.
    #[error("malformed segment: {0}")]
    MalformedSegment(String),

    /// Config file could not be parsed or serialized.
    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    /// Whether the error ends the session rather than being recovered.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamError::Connect { .. } | StreamError::CodecsExhausted { .. }
        )
    }
}

/// Errors reported by a [`MediaSink`](crate::sink::MediaSink) or its factory.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// The sink has no room for more data.
    #[error("quota exceeded")]
    QuotaExceeded,

    /// The appended bytes do not match the sink's codec.
    #[error("unsupported content: {0}")]
    UnsupportedContent(String),

    /// The MIME type cannot be used to create a sink.
    #[error("type not supported: {0}")]
    NotSupported(String),

    /// The sink was in the wrong state for the call.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("{0}")]
    Other(String),
}

impl SinkError {
    /// Structural errors mean the current codec cannot carry this stream and
    /// the next candidate should be tried.
    pub fn is_structural(&self) -> bool {
        match self {
            SinkError::QuotaExceeded | SinkError::UnsupportedContent(_) => true,
            SinkError::NotSupported(msg)
            | SinkError::InvalidState(msg)
            | SinkError::Other(msg) => msg.to_ascii_lowercase().contains("codec"),
        }
    }
}
