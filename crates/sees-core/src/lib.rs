//! Hardware-independent core library for the SEEs particle detector
//!
//! This crate contains all platform-agnostic logic for the detector payload:
//! hit classification, the rolling record store, the fixed-rate acquisition
//! loop, snapshot ("snap") capture, artifact persistence and the operator
//! command surface.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both
//! embedded targets (ESP32-S3) and desktop hosts (for the simulator and tests).

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod acquisition;
pub mod adc;
pub mod command;
pub mod config;
pub mod detector;
pub mod error;
pub mod instrument;
pub mod link;
pub mod record;
pub mod ring_store;
pub mod sd_card;
pub mod snap;
pub mod status;
pub mod storage;
pub mod telemetry;
pub mod time;
