//! Wraparound-safe arithmetic on the 32-bit microsecond counter
//!
//! The hardware timer is a free-running `u32` of microseconds, which wraps
//! roughly every 71.6 minutes. Every elapsed-time computation in the crate
//! goes through these helpers so that a wrap between two readings is harmless.

/// Microseconds per second.
pub const US_PER_SEC: f64 = 1_000_000.0;

/// Signed distance from `earlier` to `now`.
///
/// The unsigned difference is reinterpreted as `i32`, so a result is correct
/// as long as the two instants are less than ~35 minutes apart. A negative
/// value means `now` is actually before `earlier`.
#[inline]
pub const fn elapsed_us(now: u32, earlier: u32) -> i32 {
    now.wrapping_sub(earlier) as i32
}

/// Milliseconds from `origin` to `now` for display columns.
///
/// Unsigned, so an instant up to one full counter period (~71.6 minutes)
/// after `origin` is never shown as negative.
#[inline]
pub fn since_origin_ms(now: u32, origin: u32) -> f64 {
    now.wrapping_sub(origin) as f64 / 1000.0
}

/// Whether `now` is at or past `deadline`.
#[inline]
pub const fn has_reached(now: u32, deadline: u32) -> bool {
    elapsed_us(now, deadline) >= 0
}

/// Convert a duration in seconds to whole microseconds.
///
/// Negative and NaN inputs become zero; values beyond the counter range
/// saturate at `u32::MAX`.
#[inline]
pub fn secs_to_us(seconds: f32) -> u32 {
    (seconds as f64 * US_PER_SEC) as u32
}

/// Convert a microsecond timestamp to seconds for display.
#[inline]
pub fn us_to_secs(us: u32) -> f64 {
    us as f64 / US_PER_SEC
}
