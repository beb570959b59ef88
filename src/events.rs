//! Events emitted by the session for whatever is presenting the stream.
//!
//! Serialized with a `type` tag so `--json` output is one object per line.

use serde::Serialize;

use crate::connection::ConnectionState;
use crate::segment::SegmentKind;
use crate::stats::StreamStats;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppenderEvent {
    ConnectionState {
        state: ConnectionState,
    },
    ReconnectScheduled {
        attempt: u32,
        delay_ms: u64,
    },
    /// A sink was created for `codec`.
    CodecSelected {
        codec: String,
    },
    CodecRejected {
        codec: String,
        reason: String,
    },
    InitSegment {
        ordinal: u64,
        bytes: usize,
    },
    SegmentAppended {
        ordinal: u64,
        kind: SegmentKind,
        bytes: usize,
    },
    BufferTrimmed {
        start: f64,
        end: f64,
    },
    /// Seconds buffered ahead of playback and a 0-100 fill figure.
    BufferHealth {
        ahead_secs: f64,
        percent: f64,
    },
    SnapshotShown {
        frame: u64,
        bytes: usize,
    },
    Stats(StreamStats),
    /// Recoverable problem, already handled.
    Warning {
        message: String,
    },
    /// The session cannot continue rendering.
    Fatal {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_type_tagged() {
        let ev = AppenderEvent::SegmentAppended { ordinal: 7, kind: SegmentKind::Media, bytes: 900 };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "segment_appended");
        assert_eq!(json["kind"], "media");
        assert_eq!(json["ordinal"], 7);
    }

    #[test]
    fn test_connection_state_event() {
        let ev = AppenderEvent::ConnectionState { state: ConnectionState::Open };
        let json = serde_json::to_string(&ev).unwrap();
        assert_eq!(json, r#"{"type":"connection_state","state":"open"}"#);
    }
}
