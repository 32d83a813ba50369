//! Analog front-end boundary
//!
//! The platform supplies raw counts through [`SampleSource`]; the core owns
//! the counts-to-volts conversion.

use serde::{Deserialize, Serialize};

/// One raw ADC conversion per call.
pub trait SampleSource {
    /// Read the front-end once, returning counts in `0..=2^bits - 1`.
    fn read_raw(&mut self) -> u16;
}

/// Linear counts-to-volts scale for an N-bit converter.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct AdcScale {
    /// Converter resolution in bits
    pub bits: u8,
    /// Full-scale reference voltage (V)
    pub reference_v: f32,
}

impl Default for AdcScale {
    fn default() -> Self {
        Self {
            bits: 12,
            reference_v: 3.3,
        }
    }
}

impl AdcScale {
    /// Highest count the converter can return.
    pub const fn max_counts(&self) -> u16 {
        ((1u32 << self.bits) - 1) as u16
    }

    pub fn volts_per_count(&self) -> f32 {
        self.reference_v / self.max_counts() as f32
    }

    pub fn to_volts(&self, counts: u16) -> f32 {
        counts as f32 * self.volts_per_count()
    }

    /// Nearest count for a voltage, clamped to the converter range.
    pub fn to_counts(&self, volts: f32) -> u16 {
        let counts = volts / self.volts_per_count() + 0.5;
        if counts <= 0.0 {
            0
        } else {
            (counts as u32).min(self.max_counts() as u32) as u16
        }
    }
}
