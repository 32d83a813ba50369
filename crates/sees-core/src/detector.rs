//! Hysteresis + refractory hit classification
//!
//! A sample is a hit when the detector is armed, the voltage falls inside the
//! `[lower_enter, upper_limit]` window and at least `refractory_us` has passed
//! since the previous hit. After a hit the detector disarms and only re-arms
//! once the voltage drops below `lower_exit`, so one pulse yields one hit.

use serde::{Deserialize, Serialize};

use crate::time::elapsed_us;

/// Thresholds and timing for [`HitDetector`]. Voltages are in volts.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
    /// Arm-to-hit threshold (inclusive)
    pub lower_enter_v: f32,
    /// Re-arm threshold (exclusive)
    pub lower_exit_v: f32,
    /// Upper bound of the hit window (inclusive); larger pulses are ignored
    pub upper_limit_v: f32,
    /// Minimum time between accepted hits
    pub refractory_us: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            lower_enter_v: 0.30,
            lower_exit_v: 0.30,
            upper_limit_v: 0.80,
            refractory_us: 300,
        }
    }
}

/// Mutable detector state, owned by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorState {
    pub armed: bool,
    /// Timestamp of the last accepted hit; `None` before the first one
    pub last_hit_us: Option<u32>,
    pub cumulative_hits: u32,
}

impl Default for DetectorState {
    fn default() -> Self {
        Self {
            armed: true,
            last_hit_us: None,
            cumulative_hits: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HitDetector {
    config: DetectorConfig,
    state: DetectorState,
}

impl HitDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            state: DetectorState::default(),
        }
    }

    /// Classify one sample taken at `now_us`.
    pub fn evaluate(&mut self, voltage: f32, now_us: u32) -> bool {
        if !self.state.armed {
            if voltage < self.config.lower_exit_v {
                self.state.armed = true;
            }
            return false;
        }

        let in_window =
            voltage >= self.config.lower_enter_v && voltage <= self.config.upper_limit_v;
        if !in_window || !self.refractory_elapsed(now_us) {
            return false;
        }

        self.state.cumulative_hits = self.state.cumulative_hits.wrapping_add(1);
        self.state.last_hit_us = Some(now_us);
        self.state.armed = false;
        true
    }

    fn refractory_elapsed(&self, now_us: u32) -> bool {
        match self.state.last_hit_us {
            None => true,
            Some(last) => {
                let since = elapsed_us(now_us, last);
                since >= 0 && since as u32 >= self.config.refractory_us
            }
        }
    }

    pub fn state(&self) -> &DetectorState {
        &self.state
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn cumulative_hits(&self) -> u32 {
        self.state.cumulative_hits
    }

    pub fn is_armed(&self) -> bool {
        self.state.armed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn run(detector: &mut HitDetector, trace: &[(u32, f32)]) -> Vec<u32> {
        trace
            .iter()
            .filter(|(t, v)| detector.evaluate(*v, *t))
            .map(|(t, _)| *t)
            .collect()
    }

    #[test]
    fn test_end_to_end_trace() {
        let mut detector = HitDetector::new(DetectorConfig::default());
        let trace = [(0, 0.1), (100, 0.5), (200, 0.5), (300, 0.1), (50_000, 0.5)];

        assert_eq!(run(&mut detector, &trace), [100, 50_000]);
        assert_eq!(detector.cumulative_hits(), 2);
        assert!(!detector.is_armed());
    }

    #[test]
    fn test_refractory_counts_from_last_hit_not_rearm() {
        let mut detector = HitDetector::new(DetectorConfig::default());
        // Hit at 0, re-armed at 100, in-window again at 200 and 299 (still refractory),
        // first eligible sample at 300.
        let trace = [(0, 0.5), (100, 0.1), (200, 0.5), (299, 0.5), (300, 0.5)];

        assert_eq!(run(&mut detector, &trace), [0, 300]);
    }

    #[test]
    fn test_pulse_above_upper_limit_is_ignored() {
        let mut detector = HitDetector::new(DetectorConfig::default());
        assert!(!detector.evaluate(1.2, 0));
        assert!(detector.is_armed(), "out-of-window pulse must not disarm");
        assert!(detector.evaluate(0.80, 10), "upper limit is inclusive");
    }

    #[test]
    fn test_lower_enter_is_inclusive_and_exit_is_strict() {
        let mut detector = HitDetector::new(DetectorConfig::default());
        assert!(detector.evaluate(0.30, 0));
        assert!(!detector.evaluate(0.30, 1_000), "0.30 is not below the exit threshold");
        assert!(!detector.is_armed());
        assert!(!detector.evaluate(0.29, 2_000));
        assert!(detector.is_armed());
    }

    #[test]
    fn test_hysteresis_gap() {
        let config = DetectorConfig {
            lower_enter_v: 0.40,
            lower_exit_v: 0.20,
            ..DetectorConfig::default()
        };
        let mut detector = HitDetector::new(config);
        let trace = [(0, 0.45), (1_000, 0.30), (2_000, 0.45), (3_000, 0.15), (4_000, 0.45)];

        assert_eq!(run(&mut detector, &trace), [0, 4_000], "chatter between thresholds is ignored");
    }

    #[test]
    fn test_refractory_across_timer_wrap() {
        let mut detector = HitDetector::new(DetectorConfig::default());
        let before_wrap = u32::MAX - 99;

        assert!(detector.evaluate(0.5, before_wrap));
        assert!(!detector.evaluate(0.1, before_wrap + 50));
        assert!(!detector.evaluate(0.5, 100), "200 us elapsed across the wrap");
        assert!(detector.evaluate(0.5, 200), "300 us elapsed across the wrap");
    }

    #[test]
    fn test_cumulative_count_is_monotonic() {
        let mut detector = HitDetector::new(DetectorConfig::default());
        let mut previous = 0;
        for step in 0..2_000u32 {
            let voltage = if step % 7 < 3 { 0.55 } else { 0.05 };
            let hit = detector.evaluate(voltage, step * 100);
            let count = detector.cumulative_hits();
            assert_eq!(count, previous + hit as u32, "count moves by exactly one per hit");
            previous = count;
        }
        assert!(previous > 0);
    }
}
