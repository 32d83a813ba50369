//! Snapshot ("snap") capture
//!
//! The ring is always recording, so a snap is retroactive: it extracts
//! `trigger ± window` from history. Only the past half exists at trigger
//! time, so capture runs in phases, none of which blocks the poll loop:
//!
//! 1. [`SettleTimer`] waits for `window` seconds of post-trigger data while
//!    the acquisition loop keeps sampling. The owner polls it between ticks.
//! 2. [`SnapCapture::capture`] queries the store and assembles a [`Snap`],
//!    then [`SnapCapture::persist`] offers it to the persistence sink.
//! 3. [`SnapForward`] sends the artifact over the live link a few lines per
//!    poll pass, and [`SnapCapture::conclude`] records the outcome.
//!
//! ## Artifact format
//!
//! ```text
//! # Trigger: <seconds, 6 decimals>
//! # Window: ±<w> seconds (<2w> total)
//! # Records: <count>
//! <column header>
//! <one row per record, oldest first>
//! ```

use alloc::vec::Vec;

use core::fmt::{self, Write};
use core::ops::Range;

use log::{info, warn};

use crate::error::{CaptureError, StorageError, StoreError};
use crate::record::RecordShape;
use crate::ring_store::RingStore;
use crate::telemetry::{MAX_LINE_LEN, SerialLink};
use crate::time::{has_reached, secs_to_us, us_to_secs};

/// Capacity of a generated snap identifier or file name.
pub const SNAP_NAME_LEN: usize = 32;

pub type SnapName = heapless::String<SNAP_NAME_LEN>;

/// Frame markers around a snap sent over the live link.
pub const SNAP_START_MARKER: &str = "[SNAP_START]";
pub const SNAP_END_MARKER: &str = "[SNAP_END]";

/// Comment and column lines ahead of the first row.
pub const HEADER_LINES: usize = 4;

/// Most lines [`SnapForward::pump`] sends in one poll pass.
pub const FORWARD_LINES_PER_PASS: usize = 32;

/// A forward is abandoned once the link has refused lines for this long.
pub const FORWARD_STALL_US: u32 = 2_000_000;

/// One extracted window of history.
#[derive(Debug, Clone, PartialEq)]
pub struct Snap<R: RecordShape> {
    pub sequence: u32,
    pub trigger_us: u32,
    /// Half-width of the window in seconds
    pub window_secs: f32,
    /// Acquisition start, for relative time columns
    pub origin_us: u32,
    pub records: Vec<R>,
}

impl<R: RecordShape> Snap<R> {
    /// `snap_<sequence:05>_<trigger_us:010>`; zero padding keeps lexical order chronological.
    pub fn identifier(&self) -> SnapName {
        let mut name = SnapName::new();
        // 5 + 1 + 5 + 1 + 10 characters always fit.
        let _ = write!(name, "snap_{:05}_{:010}", self.sequence, self.trigger_us);
        name
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Write the full artifact text, one `\n`-terminated line at a time.
    pub fn write_artifact<W: Write>(&self, out: &mut W) -> fmt::Result {
        self.write_header(out)?;
        self.write_rows(0..self.records.len(), out)
    }

    /// The [`HEADER_LINES`] lines ahead of the rows, each `\n`-terminated.
    pub fn write_header<W: Write>(&self, out: &mut W) -> fmt::Result {
        for line in 0..HEADER_LINES {
            self.write_header_line(line, out)?;
            out.write_char('\n')?;
        }
        Ok(())
    }

    /// Rows in `range` (clamped to the record count), each `\n`-terminated.
    pub fn write_rows<W: Write>(&self, range: Range<usize>, out: &mut W) -> fmt::Result {
        let end = range.end.min(self.records.len());
        let start = range.start.min(end);
        for record in &self.records[start..end] {
            record.write_row(self.origin_us, out)?;
            out.write_char('\n')?;
        }
        Ok(())
    }

    fn write_header_line<W: Write>(&self, line: usize, out: &mut W) -> fmt::Result {
        match line {
            0 => write!(out, "# Trigger: {:.6}", us_to_secs(self.trigger_us)),
            1 => write!(
                out,
                "# Window: ±{} seconds ({} total)",
                self.window_secs,
                self.window_secs * 2.0
            ),
            2 => write!(out, "# Records: {}", self.records.len()),
            _ => out.write_str(R::COLUMNS),
        }
    }
}

/// Post-trigger settle period, checked without blocking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleTimer {
    pub trigger_us: u32,
    pub sequence: u32,
    settle_us: u32,
}

impl SettleTimer {
    pub fn new(trigger_us: u32, settle_secs: f32, sequence: u32) -> Self {
        Self {
            trigger_us,
            sequence,
            settle_us: secs_to_us(settle_secs),
        }
    }

    pub fn deadline_us(&self) -> u32 {
        self.trigger_us.wrapping_add(self.settle_us)
    }

    pub fn is_elapsed(&self, now_us: u32) -> bool {
        has_reached(now_us, self.deadline_us())
    }
}

/// Destination for a finished snap.
pub trait SnapSink<R: RecordShape> {
    /// Whether the sink wants a snap with zero records.
    fn accepts_empty(&self) -> bool {
        false
    }

    fn deliver(&mut self, snap: &Snap<R>) -> Result<(), StorageError>;
}

/// Where a snap ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub sequence: u32,
    pub identifier: SnapName,
    pub records: usize,
    /// `None` when no persistence sink was offered the snap
    pub persisted: Option<Result<(), StorageError>>,
    pub forwarded: bool,
}

impl Delivery {
    pub fn new<R: RecordShape>(
        snap: &Snap<R>,
        persisted: Option<Result<(), StorageError>>,
        forwarded: bool,
    ) -> Self {
        Self {
            sequence: snap.sequence,
            identifier: snap.identifier(),
            records: snap.records.len(),
            persisted,
            forwarded,
        }
    }

    pub fn is_delivered(&self) -> bool {
        self.forwarded || matches!(self.persisted, Some(Ok(())))
    }
}

/// Snap sequencing and extraction.
#[derive(Debug, Clone)]
pub struct SnapCapture {
    window_secs: f32,
    max_records: usize,
    next_sequence: u32,
}

impl SnapCapture {
    pub fn new(window_secs: f32, max_records: usize) -> Self {
        Self {
            window_secs,
            max_records,
            next_sequence: 0,
        }
    }

    pub fn window_secs(&self) -> f32 {
        self.window_secs
    }

    /// Sequence number the next snap will carry.
    pub fn next_sequence(&self) -> u32 {
        self.next_sequence
    }

    /// Start the settle period for a trigger at `trigger_us`.
    ///
    /// Fails immediately if the store has never received a record.
    pub fn arm<R: RecordShape>(
        &self,
        store: &RingStore<R>,
        trigger_us: u32,
    ) -> Result<SettleTimer, CaptureError> {
        if store.is_empty() {
            return Err(CaptureError::EmptyStore);
        }
        Ok(SettleTimer::new(
            trigger_us,
            self.window_secs,
            self.next_sequence,
        ))
    }

    /// Extract the window around `trigger_us` into a [`Snap`].
    ///
    /// Call only after the settle period; a zero-length window is a warning,
    /// not an error.
    pub fn capture<R: RecordShape>(
        &self,
        store: &RingStore<R>,
        trigger_us: u32,
        origin_us: u32,
    ) -> Result<Snap<R>, CaptureError> {
        if store.is_empty() {
            return Err(CaptureError::EmptyStore);
        }

        let records = store
            .extract_window(trigger_us, self.window_secs, self.max_records)
            .map_err(|e| match e {
                StoreError::AllocationFailed { requested_bytes } => {
                    CaptureError::OutOfMemory { requested_bytes }
                }
                StoreError::ZeroCapacity => CaptureError::EmptyStore,
            })?;

        if records.is_empty() {
            warn!(
                "Snap {}: no records within ±{}s of {} us",
                self.next_sequence, self.window_secs, trigger_us
            );
        } else {
            info!(
                "Snap {}: extracted {} records",
                self.next_sequence,
                records.len()
            );
        }

        Ok(Snap {
            sequence: self.next_sequence,
            trigger_us,
            window_secs: self.window_secs,
            origin_us,
            records,
        })
    }

    /// Offer a snap to the persistence sink.
    ///
    /// Returns `None` when the snap is empty and the sink does not keep
    /// empty snaps.
    pub fn persist<R, P>(&self, snap: &Snap<R>, sink: &mut P) -> Option<Result<(), StorageError>>
    where
        R: RecordShape,
        P: SnapSink<R>,
    {
        if snap.is_empty() && !sink.accepts_empty() {
            return None;
        }

        let result = sink.deliver(snap);
        if let Err(e) = result {
            warn!("Snap {}: not persisted: {}", snap.sequence, e);
        }
        Some(result)
    }

    /// Record the outcome of a snap.
    ///
    /// The sequence counter advances when either sink took the snap, so a
    /// storage failure does not cost a sequence number if the snap still went
    /// out over the live link.
    pub fn conclude(&mut self, delivery: Delivery) -> Result<Delivery, CaptureError> {
        if delivery.is_delivered() {
            self.next_sequence = self.next_sequence.wrapping_add(1);
            Ok(delivery)
        } else if delivery.records == 0 {
            // Nothing to send is reported, not failed.
            Ok(delivery)
        } else {
            Err(CaptureError::Undelivered {
                sequence: delivery.sequence,
            })
        }
    }
}

/// Progress of a live snap transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardState {
    Sending,
    Done,
    /// The link refused lines for longer than [`FORWARD_STALL_US`]
    Stalled,
}

/// Next line of a forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    Start,
    Header(usize),
    Row(usize),
    End,
    Done,
}

/// Sends a snap over the live link between frame markers, spread across
/// poll passes.
///
/// A refused line is retried on the next pass, so a link with a small
/// transmit buffer slows the transfer down instead of failing it.
#[derive(Debug)]
pub struct SnapForward<R: RecordShape> {
    snap: Snap<R>,
    persisted: Option<Result<(), StorageError>>,
    cursor: Cursor,
    refused_since: Option<u32>,
}

impl<R: RecordShape> SnapForward<R> {
    /// Start forwarding `snap`; `persisted` is what the persistence sink reported.
    pub fn new(snap: Snap<R>, persisted: Option<Result<(), StorageError>>) -> Self {
        Self {
            snap,
            persisted,
            cursor: Cursor::Start,
            refused_since: None,
        }
    }

    pub fn snap(&self) -> &Snap<R> {
        &self.snap
    }

    /// Send up to [`FORWARD_LINES_PER_PASS`] lines.
    pub fn pump<L: SerialLink>(&mut self, link: &mut L, now_us: u32) -> ForwardState {
        for _ in 0..FORWARD_LINES_PER_PASS {
            if self.cursor == Cursor::Done {
                break;
            }

            let mut line = heapless::String::<MAX_LINE_LEN>::new();
            // Every row and header line fits MAX_LINE_LEN; an overflow would
            // only cut the line short.
            let _ = self.render(self.cursor, &mut line);

            if !link.send_line(&line) {
                let since = *self.refused_since.get_or_insert(now_us);
                if has_reached(now_us, since.wrapping_add(FORWARD_STALL_US)) {
                    warn!("Snap {}: live link stalled", self.snap.sequence);
                    return ForwardState::Stalled;
                }
                return ForwardState::Sending;
            }

            self.refused_since = None;
            self.cursor = self.advance(self.cursor);
        }

        if self.cursor == Cursor::Done {
            ForwardState::Done
        } else {
            ForwardState::Sending
        }
    }

    /// Outcome of the finished transfer.
    pub fn finish(self, forwarded: bool) -> Delivery {
        Delivery::new(&self.snap, self.persisted, forwarded)
    }

    fn render<W: Write>(&self, cursor: Cursor, out: &mut W) -> fmt::Result {
        match cursor {
            Cursor::Start => out.write_str(SNAP_START_MARKER),
            Cursor::Header(line) => self.snap.write_header_line(line, out),
            Cursor::Row(index) => match self.snap.records.get(index) {
                Some(record) => record.write_row(self.snap.origin_us, out),
                None => Ok(()),
            },
            Cursor::End => out.write_str(SNAP_END_MARKER),
            Cursor::Done => Ok(()),
        }
    }

    fn advance(&self, cursor: Cursor) -> Cursor {
        let rows = self.snap.records.len();
        match cursor {
            Cursor::Start => Cursor::Header(0),
            Cursor::Header(line) if line + 1 < HEADER_LINES => Cursor::Header(line + 1),
            Cursor::Header(_) if rows > 0 => Cursor::Row(0),
            Cursor::Header(_) => Cursor::End,
            Cursor::Row(index) if index + 1 < rows => Cursor::Row(index + 1),
            Cursor::Row(_) => Cursor::End,
            Cursor::End | Cursor::Done => Cursor::Done,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::tests::RecordingLink;
    use crate::link::PipeLink;
    use crate::record::{DenseRecord, SparseRecord};
    use alloc::string::String;
    use alloc::vec;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use embassy_sync::pipe::Pipe;

    struct MemorySink {
        delivered: Vec<u32>,
        fail: bool,
        accepts_empty: bool,
    }

    impl MemorySink {
        fn new() -> Self {
            Self {
                delivered: Vec::new(),
                fail: false,
                accepts_empty: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new()
            }
        }
    }

    impl<R: RecordShape> SnapSink<R> for MemorySink {
        fn accepts_empty(&self) -> bool {
            self.accepts_empty
        }

        fn deliver(&mut self, snap: &Snap<R>) -> Result<(), StorageError> {
            if self.fail {
                return Err(StorageError::Unavailable);
            }
            self.delivered.push(snap.sequence);
            Ok(())
        }
    }

    fn sparse_store(timestamps: &[u32]) -> RingStore<SparseRecord> {
        let mut store = RingStore::new(16);
        store.begin().unwrap();
        for &ts in timestamps {
            store.push(SparseRecord::new(ts, 1));
        }
        store
    }

    fn artifact<R: RecordShape>(snap: &Snap<R>) -> String {
        let mut text = String::new();
        snap.write_artifact(&mut text).unwrap();
        text
    }

    /// Pump until the forward leaves `Sending`, draining `pipe` between passes.
    fn forward_through_pipe<R: RecordShape, const N: usize>(
        forward: &mut SnapForward<R>,
        pipe: &Pipe<CriticalSectionRawMutex, N>,
    ) -> (ForwardState, String) {
        let mut link = PipeLink::new(pipe);
        let mut received = Vec::new();
        let mut buf = [0u8; 64];

        for pass in 0..10_000u32 {
            let state = forward.pump(&mut link, pass * 100);
            while let Ok(n) = pipe.try_read(&mut buf) {
                received.extend_from_slice(&buf[..n]);
            }
            if state != ForwardState::Sending {
                return (state, String::from_utf8(received).unwrap());
            }
        }
        panic!("forward never finished");
    }

    #[test]
    fn test_arm_rejects_empty_store() {
        let capture = SnapCapture::new(2.5, 100);
        let store = sparse_store(&[]);
        assert_eq!(capture.arm(&store, 0), Err(CaptureError::EmptyStore));
        assert_eq!(capture.capture(&store, 0, 0), Err(CaptureError::EmptyStore));
    }

    #[test]
    fn test_settle_timer() {
        let timer = SettleTimer::new(1_000_000, 2.5, 0);
        assert!(!timer.is_elapsed(3_499_999));
        assert!(timer.is_elapsed(3_500_000));

        let wrapping = SettleTimer::new(u32::MAX - 1_000_000, 2.5, 0);
        assert!(!wrapping.is_elapsed(u32::MAX), "deadline lies past the wrap");
        assert!(wrapping.is_elapsed(1_500_000));
    }

    #[test]
    fn test_identifier_is_zero_padded() {
        let snap: Snap<SparseRecord> = Snap {
            sequence: 7,
            trigger_us: 1_234_567,
            window_secs: 2.5,
            origin_us: 0,
            records: Vec::new(),
        };
        assert_eq!(snap.identifier().as_str(), "snap_00007_0001234567");
    }

    #[test]
    fn test_sparse_artifact() {
        let store = sparse_store(&[500_000, 3_000_000, 5_000_000, 9_000_000]);
        let snap = SnapCapture::new(2.5, 100).capture(&store, 3_000_000, 0).unwrap();

        let expected = "# Trigger: 3.000000\n\
                        # Window: ±2.5 seconds (5 total)\n\
                        # Records: 3\n\
                        timestamp_us,layers\n\
                        500000,1\n\
                        3000000,1\n\
                        5000000,1\n";
        assert_eq!(artifact(&snap), expected);
    }

    #[test]
    fn test_narrow_window_header_keeps_precision() {
        let store = sparse_store(&[100]);
        let snap = SnapCapture::new(0.001, 10).capture(&store, 100, 0).unwrap();
        let text = artifact(&snap);
        assert_eq!(text.lines().nth(1), Some("# Window: ±0.001 seconds (0.002 total)"));
    }

    #[test]
    fn test_dense_artifact_header() {
        let mut store: RingStore<DenseRecord> = RingStore::new(4);
        store.begin().unwrap();
        store.push(DenseRecord {
            timestamp_us: 2_000_000,
            voltage: 0.5,
            hit: true,
            layer_mask: 1,
            cumulative_hits: 1,
        });

        let snap = SnapCapture::new(2.5, 10).capture(&store, 2_000_000, 1_000_000).unwrap();
        let text = artifact(&snap);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[3], "time_ms,voltage_V,hit,layers,cum_counts,timestamp_us");
        assert_eq!(lines[4], "1000.000,0.5000,1,1,1,2000000");
    }

    #[test]
    fn test_write_rows_clamps_range() {
        let store = sparse_store(&[10, 20, 30]);
        let snap = SnapCapture::new(1.0, 10).capture(&store, 20, 0).unwrap();

        let mut text = String::new();
        snap.write_rows(1..99, &mut text).unwrap();
        assert_eq!(text, "20,1\n30,1\n");
    }

    #[test]
    fn test_sequence_advances_on_delivery() {
        let store = sparse_store(&[100]);
        let mut capture = SnapCapture::new(1.0, 10);
        let mut archive = MemorySink::new();

        for expected in 0..3 {
            let snap = capture.capture(&store, 100, 0).unwrap();
            assert_eq!(snap.sequence, expected);
            let persisted = capture.persist(&snap, &mut archive);
            let delivery = capture.conclude(Delivery::new(&snap, persisted, false)).unwrap();
            assert_eq!(delivery.persisted, Some(Ok(())));
        }
        assert_eq!(archive.delivered, vec![0, 1, 2]);
        assert_eq!(capture.next_sequence(), 3);
    }

    #[test]
    fn test_forwarding_succeeds_without_storage() {
        let store = sparse_store(&[100]);
        let mut capture = SnapCapture::new(1.0, 10);
        let mut archive = MemorySink::failing();
        let mut link = RecordingLink::default();

        let snap = capture.capture(&store, 100, 0).unwrap();
        let persisted = capture.persist(&snap, &mut archive);
        let mut forward = SnapForward::new(snap, persisted);
        assert_eq!(forward.pump(&mut link, 0), ForwardState::Done);
        let delivery = capture.conclude(forward.finish(true)).unwrap();

        assert!(delivery.forwarded);
        assert_eq!(delivery.persisted, Some(Err(StorageError::Unavailable)));
        assert_eq!(capture.next_sequence(), 1, "partial success still consumes the number");
        assert_eq!(link.lines.first().map(String::as_str), Some(SNAP_START_MARKER));
        assert_eq!(link.lines.last().map(String::as_str), Some(SNAP_END_MARKER));
        assert!(link.lines.iter().any(|l| l == "100,1"));
    }

    #[test]
    fn test_forward_through_link_smaller_than_snap() {
        let mut store: RingStore<SparseRecord> = RingStore::new(1_000);
        store.begin().unwrap();
        for n in 0..1_000u32 {
            store.push(SparseRecord::new(1_000_000 + n * 1_000, 1));
        }
        let snap = SnapCapture::new(2.5, 1_000).capture(&store, 1_500_000, 0).unwrap();
        let expected = alloc::format!("{}\n{}{}\n", SNAP_START_MARKER, artifact(&snap), SNAP_END_MARKER);
        assert!(expected.len() > 8 * 1024);

        let pipe: Pipe<CriticalSectionRawMutex, 256> = Pipe::new();
        let mut forward = SnapForward::new(snap, None);
        let (state, received) = forward_through_pipe(&mut forward, &pipe);

        assert_eq!(state, ForwardState::Done);
        assert_eq!(received, expected, "every line arrives once, in order");
    }

    #[test]
    fn test_forward_gives_up_on_a_stalled_link() {
        let store = sparse_store(&[100]);
        let snap = SnapCapture::new(1.0, 10).capture(&store, 100, 0).unwrap();
        let mut link = RecordingLink {
            refuse: true,
            ..RecordingLink::default()
        };

        let mut forward = SnapForward::new(snap, None);
        assert_eq!(forward.pump(&mut link, 5_000), ForwardState::Sending);
        assert_eq!(forward.pump(&mut link, 5_000 + FORWARD_STALL_US - 1), ForwardState::Sending);
        assert_eq!(forward.pump(&mut link, 5_000 + FORWARD_STALL_US), ForwardState::Stalled);
    }

    #[test]
    fn test_undelivered_snap_keeps_sequence() {
        let store = sparse_store(&[100]);
        let mut capture = SnapCapture::new(1.0, 10);
        let mut archive = MemorySink::failing();

        let snap = capture.capture(&store, 100, 0).unwrap();
        let persisted = capture.persist(&snap, &mut archive);
        let result = capture.conclude(Delivery::new(&snap, persisted, false));

        assert_eq!(result, Err(CaptureError::Undelivered { sequence: 0 }));
        assert_eq!(capture.next_sequence(), 0);
    }

    #[test]
    fn test_empty_window_is_offered_only_to_accepting_sinks() {
        let store = sparse_store(&[100]);
        let mut capture = SnapCapture::new(1.0, 10);
        let snap = capture.capture(&store, 90_000_000, 0).unwrap();
        assert!(snap.is_empty());

        let mut strict = MemorySink::new();
        let persisted = capture.persist(&snap, &mut strict);
        let delivery = capture.conclude(Delivery::new(&snap, persisted, false)).unwrap();
        assert_eq!(delivery.persisted, None);
        assert!(strict.delivered.is_empty());
        assert_eq!(capture.next_sequence(), 0);

        let mut lenient = MemorySink {
            accepts_empty: true,
            ..MemorySink::new()
        };
        let persisted = capture.persist(&snap, &mut lenient);
        let delivery = capture.conclude(Delivery::new(&snap, persisted, false)).unwrap();
        assert_eq!(delivery.persisted, Some(Ok(())));
        assert_eq!(capture.next_sequence(), 1);
    }
}
