//! Detector front-end on an ADC1 channel

use esp_hal::Blocking;
use esp_hal::analog::adc::{Adc, AdcChannel, AdcPin, RegisterAccess};
use sees_core::adc::SampleSource;

/// One-shot conversions on a single pin.
///
/// A failed conversion repeats the previous reading so the sample schedule
/// never stalls.
pub struct AdcSource<'d, ADCI, PIN> {
    adc: Adc<'d, ADCI, Blocking>,
    pin: AdcPin<PIN, ADCI>,
    last: u16,
}

impl<'d, ADCI, PIN> AdcSource<'d, ADCI, PIN>
where
    ADCI: RegisterAccess + 'd,
    PIN: AdcChannel,
{
    pub fn new(adc: Adc<'d, ADCI, Blocking>, pin: AdcPin<PIN, ADCI>) -> Self {
        Self { adc, pin, last: 0 }
    }
}

impl<'d, ADCI, PIN> SampleSource for AdcSource<'d, ADCI, PIN>
where
    ADCI: RegisterAccess + 'd,
    PIN: AdcChannel,
{
    fn read_raw(&mut self) -> u16 {
        if let Ok(counts) = nb::block!(self.adc.read_oneshot(&mut self.pin)) {
            self.last = counts;
        }
        self.last
    }
}
