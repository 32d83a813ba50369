//! Live telemetry stream
//!
//! One line per accepted sample:
//!
//! ```text
//! <time_ms:.3>,<voltage_V:.4>,<hit:0|1>,<cumulative_hit_count>
//! ```

use core::fmt::{self, Display, Write};

use crate::record::SampleEvent;
use crate::time::since_origin_ms;

/// Longest line the crate ever sends over a [`SerialLink`] in one call.
pub const MAX_LINE_LEN: usize = 96;

/// Outbound text channel to the operator (serial port, stdout, pipe).
pub trait SerialLink {
    /// Send one line; the link appends the terminator.
    ///
    /// Returns `false` if the line was dropped (e.g. a full transmit buffer).
    fn send_line(&mut self, line: &str) -> bool;
}

/// Telemetry for one accepted sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryLine {
    /// Milliseconds since acquisition start
    pub time_ms: f64,
    pub voltage: f32,
    pub hit: bool,
    pub cumulative_hits: u32,
}

impl TelemetryLine {
    pub fn from_event(event: &SampleEvent, origin_us: u32) -> Self {
        Self {
            time_ms: since_origin_ms(event.timestamp_us, origin_us),
            voltage: event.voltage,
            hit: event.hit,
            cumulative_hits: event.cumulative_hits,
        }
    }

    /// Render into a fixed-size buffer, no allocation.
    pub fn render(&self) -> heapless::String<MAX_LINE_LEN> {
        let mut line = heapless::String::new();
        // A telemetry line is at most ~40 characters, well inside the buffer.
        let _ = write!(line, "{}", self);
        line
    }

    pub const fn header() -> &'static str {
        "time_ms,voltage_V,hit,total_hits"
    }
}

impl Display for TelemetryLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.3},{:.4},{},{}",
            self.time_ms, self.voltage, self.hit as u8, self.cumulative_hits
        )
    }
}
