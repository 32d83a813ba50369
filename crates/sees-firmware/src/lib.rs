//! ESP32-S3 firmware-specific modules for the SEEs detector
//!
//! This crate contains hardware-specific code that cannot compile on desktop
//! targets: the ADC front-end, the USB serial tasks, SD card bring-up and the
//! hardware microsecond clock.

#![no_std]

pub mod adc_source;
pub mod hardware;
pub mod serial;
