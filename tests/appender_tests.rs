//! External tests for the incremental media appender: queue ordering, init
//! priority, single in-flight discipline, codec fallback and the janitor.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use proptest::prelude::*;
use screen_stream::appender::{AppenderConfig, IncrementalMediaAppender};
use screen_stream::codec::FallbackState;
use screen_stream::error::SinkError;
use screen_stream::events::AppenderEvent;
use screen_stream::segment::ClassifierConfig;
use screen_stream::sink::{
    AppendTicket, BufferedRange, MediaSink, SinkFactory, SinkNotifier, SinkSignal, SinkState,
};
use tokio::sync::mpsc;

// -- Test doubles ----------------------------------------------------------

#[derive(Default)]
struct SinkLog {
    created: Vec<String>,
    appended: Vec<Vec<u8>>,
    outstanding: Option<AppendTicket>,
    fail_next: VecDeque<SinkError>,
    aborts: usize,
    buffered: Vec<BufferedRange>,
    removed: Vec<BufferedRange>,
    position: f64,
}

type Shared = Arc<Mutex<SinkLog>>;

struct RecordingSink {
    log: Shared,
}

impl MediaSink for RecordingSink {
    fn append(&mut self, data: &[u8], ticket: AppendTicket) -> Result<(), SinkError> {
        let mut log = self.log.lock().unwrap();
        if let Some(err) = log.fail_next.pop_front() {
            return Err(err);
        }
        assert!(
            log.outstanding.is_none(),
            "append issued while another append was in flight"
        );
        log.outstanding = Some(ticket);
        log.appended.push(data.to_vec());
        Ok(())
    }

    fn abort(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.aborts += 1;
        log.outstanding = None;
    }

    fn remove(&mut self, range: BufferedRange) -> Result<(), SinkError> {
        let mut log = self.log.lock().unwrap();
        log.removed.push(range);
        log.buffered.retain(|r| *r != range);
        Ok(())
    }

    fn buffered(&self) -> Vec<BufferedRange> {
        self.log.lock().unwrap().buffered.clone()
    }

    fn playback_position(&self) -> f64 {
        self.log.lock().unwrap().position
    }
}

struct RecordingFactory {
    log: Shared,
    failing: Vec<String>,
    unsupported: Vec<String>,
}

impl SinkFactory for RecordingFactory {
    fn supports(&self, mime: &str) -> bool {
        !self.unsupported.iter().any(|m| m == mime)
    }

    fn create(&mut self, mime: &str, _notifier: SinkNotifier) -> Result<Box<dyn MediaSink>, SinkError> {
        self.log.lock().unwrap().created.push(mime.to_string());
        if self.failing.iter().any(|m| m == mime) {
            return Err(SinkError::NotSupported(mime.to_string()));
        }
        Ok(Box::new(RecordingSink { log: Arc::clone(&self.log) }))
    }
}

struct Harness {
    appender: IncrementalMediaAppender,
    log: Shared,
    events: mpsc::UnboundedReceiver<AppenderEvent>,
    _signals: mpsc::UnboundedReceiver<SinkSignal>,
    t0: Instant,
}

fn harness_with(codecs: &[&str], failing: &[&str], unsupported: &[&str]) -> Harness {
    let log: Shared = Arc::new(Mutex::new(SinkLog::default()));
    let factory = RecordingFactory {
        log: Arc::clone(&log),
        failing: failing.iter().map(|s| s.to_string()).collect(),
        unsupported: unsupported.iter().map(|s| s.to_string()).collect(),
    };
    let config = AppenderConfig {
        codecs: codecs.iter().map(|s| s.to_string()).collect(),
        classifier: ClassifierConfig::default(),
        retention: Duration::from_secs(5),
    };
    let (sig_tx, sig_rx) = mpsc::unbounded_channel();
    let (ev_tx, ev_rx) = mpsc::unbounded_channel();
    let appender = IncrementalMediaAppender::new(config, Box::new(factory), sig_tx).with_events(ev_tx);
    Harness { appender, log, events: ev_rx, _signals: sig_rx, t0: Instant::now() }
}

fn harness(codecs: &[&str]) -> Harness {
    harness_with(codecs, &[], &[])
}

impl Harness {
    /// Push a unit whose first byte is `tag`.
    fn push(&mut self, tag: u8, len: usize, at_secs: u64) {
        let mut data = vec![0u8; len.max(1)];
        data[0] = tag;
        self.appender.on_segment(data, self.t0 + Duration::from_secs(at_secs));
    }

    /// Acknowledge the append the sink is currently holding.
    fn complete(&mut self) {
        let ticket = self.log.lock().unwrap().outstanding.take();
        if let Some(ticket) = ticket {
            self.appender.on_sink_signal(SinkSignal::completed(ticket));
        }
    }

    fn appended_tags(&self) -> Vec<u8> {
        self.log.lock().unwrap().appended.iter().map(|d| d[0]).collect()
    }

    fn created(&self) -> Vec<String> {
        self.log.lock().unwrap().created.clone()
    }

    fn drain_events(&mut self) -> Vec<AppenderEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = self.events.try_recv() {
            out.push(ev);
        }
        out
    }
}

const CODECS: &[&str] = &["video/mp4; codecs=\"a\"", "video/mp4; codecs=\"b\"", "video/mp4; codecs=\"c\""];

// -- Ordering --------------------------------------------------------------

#[test]
fn test_media_drains_in_arrival_order() {
    let mut h = harness(CODECS);
    h.appender.on_open();
    h.push(0, 200, 0);
    for tag in 1..=5 {
        h.push(tag, 2000, 1);
    }
    assert_eq!(h.appender.queue_len(), 5);
    for _ in 0..6 {
        h.complete();
    }
    assert_eq!(h.appended_tags(), vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(h.appender.queue_len(), 0);
    assert_eq!(h.appender.sink_state(), SinkState::Ready);
}

#[test]
fn test_first_unit_is_appended_as_init() {
    let mut h = harness(CODECS);
    h.appender.on_open();
    h.push(7, 200, 0);
    let events = h.drain_events();
    assert!(events.contains(&AppenderEvent::InitSegment { ordinal: 1, bytes: 200 }));
    assert_eq!(h.appended_tags(), vec![7]);
    assert_eq!(h.appender.sink_state(), SinkState::Busy);
}

#[test]
fn test_init_jumps_ahead_of_queued_media() {
    let mut h = harness(CODECS);
    h.appender.on_open();
    h.push(0, 200, 0);
    h.complete();
    h.push(1, 5000, 1);
    h.push(2, 5000, 2);
    h.push(3, 5000, 3);
    h.push(4, 5000, 4);
    // 1 is in flight, 2..=4 queued; the refresh interval has passed at 31 s.
    h.push(9, 5000, 31);
    assert_eq!(h.appender.queue_len(), 3);
    for _ in 0..4 {
        h.complete();
    }
    assert_eq!(h.appended_tags(), vec![0, 1, 9, 2, 3, 4]);
    assert!(h.log.lock().unwrap().aborts >= 1);
}

#[test]
fn test_init_clears_buffered_ranges() {
    let mut h = harness(CODECS);
    h.appender.on_open();
    h.push(0, 200, 0);
    h.complete();
    h.log.lock().unwrap().buffered = vec![BufferedRange::new(0.0, 4.0), BufferedRange::new(4.0, 8.0)];
    h.push(9, 5000, 40);
    let log = h.log.lock().unwrap();
    assert_eq!(log.removed.len(), 2);
    assert!(log.buffered.is_empty());
}

#[test]
fn test_stale_completion_after_abort_is_ignored() {
    let mut h = harness(CODECS);
    h.appender.on_open();
    h.push(0, 200, 0);
    h.complete();
    h.push(1, 5000, 1);
    let aborted = h.appender.in_flight().unwrap();
    h.push(9, 5000, 40);
    let current = h.appender.in_flight().unwrap();
    assert_ne!(aborted, current);

    h.appender.on_sink_signal(SinkSignal::completed(aborted));
    assert_eq!(h.appender.in_flight(), Some(current));
    assert_eq!(h.appender.sink_state(), SinkState::Busy);
}

// -- Lifecycle -------------------------------------------------------------

#[test]
fn test_segments_before_open_are_dropped() {
    let mut h = harness(CODECS);
    h.push(0, 200, 0);
    assert!(h.created().is_empty());
    assert!(h.appended_tags().is_empty());
    assert_eq!(h.appender.sink_state(), SinkState::Uninitialized);
}

#[test]
fn test_close_discards_queue_and_ignores_late_signal() {
    let mut h = harness(CODECS);
    h.appender.on_open();
    h.push(0, 200, 0);
    let ticket = h.appender.in_flight().unwrap();
    h.push(1, 5000, 1);
    h.push(2, 5000, 2);
    h.appender.on_close();

    assert_eq!(h.appender.queue_len(), 0);
    assert_eq!(h.appender.sink_state(), SinkState::Uninitialized);
    h.appender.on_sink_signal(SinkSignal::completed(ticket));
    assert_eq!(h.appender.sink_state(), SinkState::Uninitialized);
    h.push(3, 5000, 3);
    assert_eq!(h.appended_tags(), vec![0]);
}

#[test]
fn test_text_frame_is_reported_and_dropped() {
    let mut h = harness(CODECS);
    h.appender.on_open();
    h.drain_events();
    h.appender.on_text("{\"hello\":1}");
    let events = h.drain_events();
    assert!(matches!(
        events.as_slice(),
        [AppenderEvent::Warning { message }] if message.contains("malformed segment")
    ));
    assert_eq!(h.appender.queue_len(), 0);
    assert!(h.appended_tags().is_empty());
}

#[test]
fn test_reopen_restarts_codec_walk() {
    let mut h = harness(CODECS);
    h.appender.on_open();
    h.push(0, 200, 0);
    h.complete();
    assert_eq!(h.appender.fallback_state(), FallbackState::Locked(0));
    h.appender.on_close();
    h.appender.on_open();
    assert_eq!(h.appender.fallback_state(), FallbackState::Trying(0));
    assert_eq!(h.created().len(), 2);
}

// -- Codec fallback --------------------------------------------------------

#[test]
fn test_all_candidates_failing_exhausts_after_m_attempts() {
    let mut h = harness_with(CODECS, CODECS, &[]);
    h.appender.on_open();
    assert_eq!(h.created(), CODECS.iter().map(|s| s.to_string()).collect::<Vec<_>>());
    assert_eq!(h.appender.fallback_state(), FallbackState::Exhausted);
    assert!(h.appender.is_exhausted());
    assert_eq!(h.appender.codec_attempts(), 3);
    assert_eq!(h.appender.sink_state(), SinkState::Errored);

    let fatal = h
        .drain_events()
        .into_iter()
        .find_map(|e| match e {
            AppenderEvent::Fatal { message } => Some(message),
            _ => None,
        })
        .expect("no fatal event");
    assert!(fatal.contains("cannot render stream"));

    h.push(0, 200, 0);
    assert!(h.appended_tags().is_empty());
    assert_eq!(h.created().len(), 3);
}

#[test]
fn test_unsupported_candidates_are_skipped_without_create() {
    let mut h = harness_with(CODECS, &[], &[CODECS[0]]);
    h.appender.on_open();
    assert_eq!(h.created(), vec![CODECS[1].to_string()]);
    assert_eq!(h.appender.current_codec(), Some(CODECS[1]));
}

#[test]
fn test_quota_on_first_candidate_moves_to_second() {
    let mut h = harness(CODECS);
    h.appender.on_open();
    h.log.lock().unwrap().fail_next.push_back(SinkError::QuotaExceeded);
    h.push(0, 200, 0);

    assert_eq!(h.created(), vec![CODECS[0].to_string(), CODECS[1].to_string()]);
    assert_eq!(h.appender.current_codec(), Some(CODECS[1]));
    assert_eq!(h.appender.fallback_state(), FallbackState::Trying(1));
    assert_eq!(h.appender.sink_state(), SinkState::Ready);

    // Init flags were reset: the next unit is treated as init again.
    h.drain_events();
    h.push(1, 50_000, 1);
    assert!(h.drain_events().contains(&AppenderEvent::InitSegment { ordinal: 2, bytes: 50_000 }));
    assert_eq!(h.appended_tags(), vec![1]);
}

#[test]
fn test_async_codec_failure_falls_back() {
    let mut h = harness(CODECS);
    h.appender.on_open();
    h.push(0, 200, 0);
    let ticket = h.log.lock().unwrap().outstanding.take().unwrap();
    h.appender.on_sink_signal(SinkSignal::failed(
        ticket,
        SinkError::UnsupportedContent("avc1 profile".into()),
    ));
    assert_eq!(h.appender.current_codec(), Some(CODECS[1]));
    assert_eq!(h.created().len(), 2);
}

#[test]
fn test_fallback_never_revisits_a_candidate() {
    let mut h = harness(CODECS);
    h.appender.on_open();
    for i in 0..3u8 {
        h.log.lock().unwrap().fail_next.push_back(SinkError::QuotaExceeded);
        h.push(i, 200, i as u64);
    }
    let created = h.created();
    let unique: HashSet<_> = created.iter().collect();
    assert_eq!(created.len(), unique.len());
    assert!(h.appender.is_exhausted());
}

#[test]
fn test_structural_error_after_lock_is_fatal_for_sink() {
    let mut h = harness(CODECS);
    h.appender.on_open();
    h.push(0, 200, 0);
    h.complete();
    assert_eq!(h.appender.fallback_state(), FallbackState::Locked(0));

    h.log.lock().unwrap().fail_next.push_back(SinkError::QuotaExceeded);
    h.push(1, 5000, 1);
    assert_eq!(h.appender.sink_state(), SinkState::Errored);
    assert_eq!(h.created().len(), 1);
    h.push(2, 5000, 2);
    assert_eq!(h.appended_tags(), vec![0]);
}

#[test]
fn test_non_structural_error_drops_segment_and_continues() {
    let mut h = harness(CODECS);
    h.appender.on_open();
    h.push(0, 200, 0);
    h.push(1, 5000, 1);
    h.push(2, 5000, 2);
    h.log
        .lock()
        .unwrap()
        .fail_next
        .push_back(SinkError::InvalidState("detached".into()));
    h.complete();

    assert_eq!(h.appended_tags(), vec![0, 2]);
    assert_eq!(h.appender.fallback_state(), FallbackState::Locked(0));
    assert!(h
        .drain_events()
        .iter()
        .any(|e| matches!(e, AppenderEvent::Warning { .. })));
}

// -- Janitor ---------------------------------------------------------------

#[test]
fn test_janitor_trims_old_ranges_when_idle() {
    let mut h = harness(CODECS);
    h.appender.on_open();
    {
        let mut log = h.log.lock().unwrap();
        log.buffered = vec![
            BufferedRange::new(0.0, 3.0),
            BufferedRange::new(4.0, 9.0),
            BufferedRange::new(9.5, 20.0),
        ];
        log.position = 12.0;
    }
    assert_eq!(h.appender.janitor_tick(), 1);
    assert_eq!(h.log.lock().unwrap().removed, vec![BufferedRange::new(0.0, 3.0)]);
    assert_eq!(h.appender.buffer_health(), Some((8.0, 100.0)));
}

#[test]
fn test_janitor_defers_while_append_in_flight() {
    let mut h = harness(CODECS);
    h.appender.on_open();
    h.push(0, 200, 0);
    {
        let mut log = h.log.lock().unwrap();
        log.buffered = vec![BufferedRange::new(0.0, 1.0)];
        log.position = 30.0;
    }
    assert_eq!(h.appender.janitor_tick(), 0);
    assert!(h.log.lock().unwrap().removed.is_empty());
    h.complete();
    assert_eq!(h.appender.janitor_tick(), 1);
}

// -- Properties ------------------------------------------------------------

#[derive(Debug, Clone)]
enum Op {
    Enqueue { len: usize, gap_ms: u64 },
    Complete,
    Stale,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (1usize..4000, 0u64..12_000).prop_map(|(len, gap_ms)| Op::Enqueue { len, gap_ms }),
        3 => Just(Op::Complete),
        1 => Just(Op::Stale),
    ]
}

proptest! {
    #[test]
    fn prop_single_in_flight_and_media_order(ops in proptest::collection::vec(op(), 1..120)) {
        let mut h = harness(CODECS);
        h.appender.on_open();
        let mut clock = h.t0;
        let mut ordinal: u64 = 0;
        let mut ordinals_by_head = Vec::new();

        for op in ops {
            match op {
                Op::Enqueue { len, gap_ms } => {
                    ordinal += 1;
                    clock += Duration::from_millis(gap_ms);
                    let mut data = vec![0u8; len.max(8)];
                    data[..8].copy_from_slice(&ordinal.to_be_bytes());
                    ordinals_by_head.push(ordinal);
                    h.appender.on_segment(data, clock);
                }
                Op::Complete => h.complete(),
                Op::Stale => h.appender.on_sink_signal(SinkSignal::completed(AppendTicket {
                    generation: u64::MAX,
                    seq: u64::MAX,
                })),
            }
            // The sink's own bookkeeping agrees with the appender's.
            let outstanding = h.log.lock().unwrap().outstanding;
            prop_assert_eq!(h.appender.in_flight(), outstanding);
            prop_assert_eq!(
                h.appender.sink_state() == SinkState::Busy,
                h.appender.in_flight().is_some()
            );
        }

        let inits: HashSet<u64> = h
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                AppenderEvent::InitSegment { ordinal, .. } => Some(ordinal),
                _ => None,
            })
            .collect();
        let appended: Vec<u64> = h
            .log
            .lock()
            .unwrap()
            .appended
            .iter()
            .map(|d| u64::from_be_bytes(d[..8].try_into().unwrap()))
            .collect();
        let media: Vec<u64> = appended.into_iter().filter(|o| !inits.contains(o)).collect();
        prop_assert!(media.windows(2).all(|w| w[0] < w[1]), "media out of order: {:?}", media);
    }
}
