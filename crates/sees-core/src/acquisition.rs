//! Fixed-rate acquisition loop
//!
//! [`Acquisition::tick`] is called as often as the host can manage. It
//! accepts a sample only once the schedule says one is due, then advances
//! the schedule by exactly one interval. Advancing from the previous due
//! time (never from `now`) means call overhead adds jitter but no drift.
//!
//! A host that falls behind catches up one sample per tick. Once the backlog
//! exceeds [`MAX_SCHEDULE_LAG_US`] the schedule is re-anchored at `now`
//! instead, and the missed samples are counted as skipped.
//!
//! Each accepted sample flows through:
//!
//! ```text
//! SampleSource -> AdcScale -> HitDetector -> RecordShape -> RingStore
//!                                         \-> TelemetryLine -> SerialLink
//! ```

use log::warn;

use crate::adc::{AdcScale, SampleSource};
use crate::detector::{DetectorConfig, HitDetector};
use crate::error::StoreError;
use crate::record::{RecordShape, SINGLE_LAYER_MASK, SampleEvent};
use crate::ring_store::RingStore;
use crate::telemetry::{SerialLink, TelemetryLine};

/// Largest backlog caught up sample by sample.
pub const MAX_SCHEDULE_LAG_US: u32 = 1_000_000;

pub struct Acquisition<R: RecordShape> {
    detector: HitDetector,
    store: RingStore<R>,
    scale: AdcScale,
    interval_us: u32,
    next_sample_us: u32,
    origin_us: u32,
    samples_taken: u64,
    samples_skipped: u64,
    telemetry_dropped: u32,
}

impl<R: RecordShape> Acquisition<R> {
    pub fn new(
        detector: DetectorConfig,
        scale: AdcScale,
        interval_us: u32,
        capacity: usize,
    ) -> Self {
        Self {
            detector: HitDetector::new(detector),
            store: RingStore::new(capacity),
            scale,
            interval_us,
            next_sample_us: 0,
            origin_us: 0,
            samples_taken: 0,
            samples_skipped: 0,
            telemetry_dropped: 0,
        }
    }

    /// Allocate the ring store. Failure is fatal to acquisition.
    pub fn begin(&mut self) -> Result<(), StoreError> {
        self.store.begin()
    }

    /// Anchor the schedule: the first sample is due at `now_us`.
    pub fn start(&mut self, now_us: u32) {
        self.next_sample_us = now_us;
        self.origin_us = now_us;
    }

    /// Take one sample if one is due.
    ///
    /// `telemetry` receives the live line; pass `None` to keep recording with
    /// the live stream switched off.
    pub fn tick<A, L>(
        &mut self,
        now_us: u32,
        source: &mut A,
        telemetry: Option<&mut L>,
    ) -> Option<SampleEvent>
    where
        A: SampleSource,
        L: SerialLink,
    {
        // Not yet due: `now` lies within one interval before the due time.
        let lag = now_us.wrapping_sub(self.next_sample_us);
        if lag > u32::MAX - self.interval_us {
            return None;
        }

        if lag > MAX_SCHEDULE_LAG_US {
            let skipped = lag / self.interval_us.max(1);
            warn!(
                "Acquisition {} us behind schedule; skipping {} samples",
                lag, skipped
            );
            self.samples_skipped += u64::from(skipped);
            self.next_sample_us = now_us;
        }
        self.next_sample_us = self.next_sample_us.wrapping_add(self.interval_us);

        let raw = source.read_raw();
        let voltage = self.scale.to_volts(raw);
        let hit = self.detector.evaluate(voltage, now_us);

        let event = SampleEvent {
            timestamp_us: now_us,
            raw,
            voltage,
            hit,
            layer_mask: if hit { SINGLE_LAYER_MASK } else { 0 },
            cumulative_hits: self.detector.cumulative_hits(),
        };

        if let Some(record) = R::from_event(&event) {
            self.store.push(record);
        }
        self.samples_taken += 1;

        if let Some(link) = telemetry {
            let line = TelemetryLine::from_event(&event, self.origin_us).render();
            if !link.send_line(&line) {
                self.telemetry_dropped = self.telemetry_dropped.wrapping_add(1);
            }
        }

        Some(event)
    }

    pub fn store(&self) -> &RingStore<R> {
        &self.store
    }

    /// Mutable store access for an explicit operator reset.
    pub fn store_mut(&mut self) -> &mut RingStore<R> {
        &mut self.store
    }

    pub fn detector(&self) -> &HitDetector {
        &self.detector
    }

    pub fn origin_us(&self) -> u32 {
        self.origin_us
    }

    pub fn next_sample_us(&self) -> u32 {
        self.next_sample_us
    }

    pub fn interval_us(&self) -> u32 {
        self.interval_us
    }

    pub fn samples_taken(&self) -> u64 {
        self.samples_taken
    }

    /// Samples dropped by schedule re-anchoring since boot.
    pub fn samples_skipped(&self) -> u64 {
        self.samples_skipped
    }

    /// Telemetry lines the link refused since boot.
    pub fn telemetry_dropped(&self) -> u32 {
        self.telemetry_dropped
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::record::{DenseRecord, SparseRecord};
    use alloc::string::String;
    use alloc::vec::Vec;

    /// Replays a fixed list of counts, then repeats the last one.
    pub(crate) struct ScriptedSource {
        pub(crate) counts: Vec<u16>,
        pub(crate) reads: usize,
    }

    impl ScriptedSource {
        pub(crate) fn new(counts: &[u16]) -> Self {
            Self {
                counts: counts.to_vec(),
                reads: 0,
            }
        }

        pub(crate) fn constant(count: u16) -> Self {
            Self::new(&[count])
        }
    }

    impl SampleSource for ScriptedSource {
        fn read_raw(&mut self) -> u16 {
            let idx = self.reads.min(self.counts.len() - 1);
            self.reads += 1;
            self.counts[idx]
        }
    }

    /// Captures every line sent to it.
    #[derive(Default)]
    pub(crate) struct RecordingLink {
        pub(crate) lines: Vec<String>,
        pub(crate) refuse: bool,
    }

    impl SerialLink for RecordingLink {
        fn send_line(&mut self, line: &str) -> bool {
            if self.refuse {
                return false;
            }
            self.lines.push(String::from(line));
            true
        }
    }

    const LOW: u16 = 62; // ~0.05 V
    const PULSE: u16 = 620; // ~0.50 V

    fn acquisition<R: RecordShape>(capacity: usize) -> Acquisition<R> {
        let mut acq = Acquisition::new(DetectorConfig::default(), AdcScale::default(), 100, capacity);
        acq.begin().unwrap();
        acq
    }

    #[test]
    fn test_tick_is_gated_by_schedule() {
        let mut acq = acquisition::<DenseRecord>(16);
        let mut source = ScriptedSource::constant(LOW);
        acq.start(1_000);

        assert!(acq.tick::<_, RecordingLink>(999, &mut source, None).is_none());
        assert!(acq.tick::<_, RecordingLink>(1_000, &mut source, None).is_some());
        assert!(acq.tick::<_, RecordingLink>(1_050, &mut source, None).is_none());
        assert!(acq.tick::<_, RecordingLink>(1_100, &mut source, None).is_some());
        assert_eq!(source.reads, 2);
        assert_eq!(acq.store().len(), 2);
    }

    #[test]
    fn test_schedule_does_not_drift_with_late_calls() {
        let mut acq = acquisition::<DenseRecord>(64);
        let mut source = ScriptedSource::constant(LOW);
        acq.start(0);

        // Every call arrives 30 us late; the due time still advances by exactly 100 us.
        for n in 0..10u32 {
            assert!(acq.tick::<_, RecordingLink>(n * 100 + 30, &mut source, None).is_some());
        }
        assert_eq!(acq.next_sample_us(), 1_000);
    }

    #[test]
    fn test_late_host_catches_up_one_sample_per_tick() {
        let mut acq = acquisition::<DenseRecord>(64);
        let mut source = ScriptedSource::constant(LOW);
        acq.start(0);

        let accepted = (0..5)
            .filter(|_| acq.tick::<_, RecordingLink>(450, &mut source, None).is_some())
            .count();
        assert_eq!(accepted, 5, "samples due at 0..=400 are all taken");
        assert!(acq.tick::<_, RecordingLink>(450, &mut source, None).is_none());
    }

    #[test]
    fn test_large_backlog_reanchors_schedule() {
        let mut acq = acquisition::<DenseRecord>(64);
        let mut source = ScriptedSource::constant(LOW);
        acq.start(0);

        assert!(acq.tick::<_, RecordingLink>(1_500_000, &mut source, None).is_some());
        assert_eq!(acq.samples_skipped(), 15_000);
        assert_eq!(acq.next_sample_us(), 1_500_100);
        assert!(acq.tick::<_, RecordingLink>(1_500_050, &mut source, None).is_none());
        assert!(acq.tick::<_, RecordingLink>(1_500_100, &mut source, None).is_some());
    }

    #[test]
    fn test_backlog_past_half_counter_period_still_samples() {
        let mut acq = acquisition::<DenseRecord>(64);
        let mut source = ScriptedSource::constant(LOW);
        acq.start(0);

        let late = (1u32 << 31) + 100;
        assert!(acq.tick::<_, RecordingLink>(late, &mut source, None).is_some());
        assert_eq!(acq.samples_skipped(), u64::from(late / 100));
        assert_eq!(acq.next_sample_us(), late + 100);
    }

    #[test]
    fn test_schedule_survives_timer_wrap() {
        let mut acq = acquisition::<DenseRecord>(8);
        let mut source = ScriptedSource::constant(LOW);
        let start = u32::MAX - 150;
        acq.start(start);

        assert!(acq.tick::<_, RecordingLink>(start, &mut source, None).is_some());
        assert!(acq.tick::<_, RecordingLink>(start.wrapping_add(100), &mut source, None).is_some());
        assert!(acq.tick::<_, RecordingLink>(20, &mut source, None).is_none());
        assert!(acq.tick::<_, RecordingLink>(50, &mut source, None).is_some());
    }

    #[test]
    fn test_sparse_store_keeps_hits_only() {
        let mut acq = acquisition::<SparseRecord>(8);
        let mut source = ScriptedSource::new(&[LOW, PULSE, PULSE, LOW, LOW, PULSE]);
        acq.start(0);

        for n in 0..6u32 {
            acq.tick::<_, RecordingLink>(n * 100, &mut source, None);
        }

        let hits: Vec<u32> = acq.store().iter().map(|r| r.timestamp_us).collect();
        assert_eq!(hits, [100, 500]);
        assert_eq!(acq.detector().cumulative_hits(), 2);
        assert_eq!(acq.samples_taken(), 6);
    }

    #[test]
    fn test_telemetry_lines() {
        let mut acq = acquisition::<DenseRecord>(8);
        let mut source = ScriptedSource::new(&[LOW, PULSE]);
        let mut link = RecordingLink::default();
        acq.start(5_000);

        acq.tick(5_000, &mut source, Some(&mut link));
        acq.tick(5_100, &mut source, Some(&mut link));

        assert_eq!(link.lines.len(), 2);
        assert!(link.lines[0].starts_with("0.000,0.0500,0,0"));
        assert!(link.lines[1].starts_with("0.100,0.4996,1,1"));
    }

    #[test]
    fn test_refused_telemetry_is_counted_not_fatal() {
        let mut acq = acquisition::<DenseRecord>(8);
        let mut source = ScriptedSource::constant(LOW);
        let mut link = RecordingLink {
            refuse: true,
            ..RecordingLink::default()
        };
        acq.start(0);

        assert!(acq.tick(0, &mut source, Some(&mut link)).is_some());
        assert_eq!(acq.telemetry_dropped(), 1);
        assert_eq!(acq.store().len(), 1, "recording continues when the link is full");
    }
}
