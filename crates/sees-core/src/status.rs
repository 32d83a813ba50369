//! Status LED: slow heartbeat while running, fast blink after a fault

use embedded_hal::digital::OutputPin;

/// Half-period of the fault blink.
pub const FAULT_BLINK_MS: u32 = 100;

/// Blink pattern state, independent of any pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusIndicator {
    heartbeat_ms: u32,
    faulted: bool,
}

impl StatusIndicator {
    pub const fn new(heartbeat_ms: u32) -> Self {
        Self {
            heartbeat_ms,
            faulted: false,
        }
    }

    pub fn set_fault(&mut self) {
        self.faulted = true;
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    pub fn half_period_ms(&self) -> u32 {
        if self.faulted {
            FAULT_BLINK_MS
        } else {
            self.heartbeat_ms.max(1)
        }
    }

    /// LED level at `now_ms`. Starts lit.
    pub fn level(&self, now_ms: u32) -> bool {
        (now_ms / self.half_period_ms()) % 2 == 0
    }
}

/// Drives an output pin from a [`StatusIndicator`], writing only on changes.
pub struct StatusLed<P: OutputPin> {
    pin: P,
    indicator: StatusIndicator,
    lit: Option<bool>,
}

impl<P: OutputPin> StatusLed<P> {
    pub fn new(pin: P, heartbeat_ms: u32) -> Self {
        Self {
            pin,
            indicator: StatusIndicator::new(heartbeat_ms),
            lit: None,
        }
    }

    pub fn set_fault(&mut self) {
        self.indicator.set_fault();
    }

    pub fn indicator(&self) -> &StatusIndicator {
        &self.indicator
    }

    pub fn update(&mut self, now_ms: u32) -> Result<(), P::Error> {
        let level = self.indicator.level(now_ms);
        if self.lit == Some(level) {
            return Ok(());
        }

        if level {
            self.pin.set_high()?;
        } else {
            self.pin.set_low()?;
        }
        self.lit = Some(level);
        Ok(())
    }
}
