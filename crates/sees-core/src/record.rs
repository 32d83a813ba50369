//! Detector record shapes stored in the ring
//!
//! The acquisition loop produces one [`SampleEvent`] per accepted sample. A
//! [`RecordShape`] policy decides what, if anything, of that event is kept:
//!
//! - [`DenseRecord`]: every sample, with voltage and running hit count
//! - [`SparseRecord`]: hits only, timestamp and layer mask
//!
//! Both shapes share one [`RingStore`](crate::ring_store::RingStore)
//! implementation; the shape is a type parameter chosen at construction.

use core::fmt::{self, Write};

use serde::{Deserialize, Serialize};

use crate::time::since_origin_ms;

/// Layer mask written for a hit on the single-channel front-end.
pub const SINGLE_LAYER_MASK: u8 = 0b0001;

/// Which record shape the ring retains.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageMode {
    /// Every sample, sized by retention time x sample rate
    #[default]
    Dense,
    /// Hits only, sized by a fixed hit budget
    Sparse,
}

impl StorageMode {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Dense => "dense",
            Self::Sparse => "sparse",
        }
    }
}

/// Everything known about one accepted sample.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SampleEvent {
    /// Sample instant (free-running microseconds, wraps)
    pub timestamp_us: u32,
    /// Raw ADC counts
    pub raw: u16,
    /// Converted front-end voltage (V)
    pub voltage: f32,
    /// Whether the detector classified this sample as a hit
    pub hit: bool,
    /// Layers that saw the event
    pub layer_mask: u8,
    /// Hits accepted since boot, including this one
    pub cumulative_hits: u32,
}

/// Storage policy for one record shape.
pub trait RecordShape: Copy + Default {
    /// Mode this shape implements.
    const MODE: StorageMode;

    /// CSV column header used in snap artifacts.
    const COLUMNS: &'static str;

    /// Build a record from a sample, or `None` if this shape does not keep it.
    fn from_event(event: &SampleEvent) -> Option<Self>;

    /// Timestamp used by windowed queries.
    fn timestamp_us(&self) -> u32;

    /// Write one CSV row (without line terminator).
    ///
    /// `origin_us` is the acquisition start, used for relative time columns.
    fn write_row<W: Write>(&self, origin_us: u32, out: &mut W) -> fmt::Result;
}

/// Every-sample record.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DenseRecord {
    pub timestamp_us: u32,
    pub voltage: f32,
    pub hit: bool,
    pub layer_mask: u8,
    pub cumulative_hits: u32,
}

impl RecordShape for DenseRecord {
    const MODE: StorageMode = StorageMode::Dense;
    const COLUMNS: &'static str = "time_ms,voltage_V,hit,layers,cum_counts,timestamp_us";

    fn from_event(event: &SampleEvent) -> Option<Self> {
        Some(Self {
            timestamp_us: event.timestamp_us,
            voltage: event.voltage,
            hit: event.hit,
            layer_mask: event.layer_mask,
            cumulative_hits: event.cumulative_hits,
        })
    }

    fn timestamp_us(&self) -> u32 {
        self.timestamp_us
    }

    fn write_row<W: Write>(&self, origin_us: u32, out: &mut W) -> fmt::Result {
        let time_ms = since_origin_ms(self.timestamp_us, origin_us);
        write!(
            out,
            "{:.3},{:.4},{},{},{},{}",
            time_ms,
            self.voltage,
            self.hit as u8,
            self.layer_mask,
            self.cumulative_hits,
            self.timestamp_us
        )
    }
}

/// Hits-only record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SparseRecord {
    pub timestamp_us: u32,
    pub layer_mask: u8,
}

impl SparseRecord {
    pub const fn new(timestamp_us: u32, layer_mask: u8) -> Self {
        Self {
            timestamp_us,
            layer_mask,
        }
    }
}

impl RecordShape for SparseRecord {
    const MODE: StorageMode = StorageMode::Sparse;
    const COLUMNS: &'static str = "timestamp_us,layers";

    fn from_event(event: &SampleEvent) -> Option<Self> {
        event
            .hit
            .then(|| Self::new(event.timestamp_us, event.layer_mask))
    }

    fn timestamp_us(&self) -> u32 {
        self.timestamp_us
    }

    fn write_row<W: Write>(&self, _origin_us: u32, out: &mut W) -> fmt::Result {
        write!(out, "{},{}", self.timestamp_us, self.layer_mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;

    fn event(timestamp_us: u32, hit: bool) -> SampleEvent {
        SampleEvent {
            timestamp_us,
            raw: 620,
            voltage: 0.4996,
            hit,
            layer_mask: if hit { SINGLE_LAYER_MASK } else { 0 },
            cumulative_hits: 7,
        }
    }

    #[test]
    fn test_sparse_keeps_hits_only() {
        assert_eq!(SparseRecord::from_event(&event(10, false)), None);
        assert_eq!(
            SparseRecord::from_event(&event(10, true)),
            Some(SparseRecord::new(10, SINGLE_LAYER_MASK))
        );
    }

    #[test]
    fn test_dense_keeps_everything() {
        let record = DenseRecord::from_event(&event(10, false)).unwrap();
        assert_eq!(record.timestamp_us, 10);
        assert!(!record.hit);
        assert_eq!(record.cumulative_hits, 7);
    }

    #[test]
    fn test_dense_row_is_relative_to_origin() {
        let record = DenseRecord::from_event(&event(1_501_250, true)).unwrap();
        let mut row = String::new();
        record.write_row(1_000_000, &mut row).unwrap();
        assert_eq!(row, "501.250,0.4996,1,1,7,1501250");
    }

    #[test]
    fn test_dense_row_time_after_half_counter_period() {
        let record = DenseRecord::from_event(&event(2_200_000_000, false)).unwrap();
        let mut row = String::new();
        record.write_row(0, &mut row).unwrap();
        assert!(row.starts_with("2200000.000,"), "got {}", row);
    }

    #[test]
    fn test_sparse_row() {
        let mut row = String::new();
        SparseRecord::new(42, 1).write_row(0, &mut row).unwrap();
        assert_eq!(row, "42,1");
    }
}
