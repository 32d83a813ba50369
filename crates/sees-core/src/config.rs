use alloc::vec::Vec;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::adc::AdcScale;
use crate::detector::DetectorConfig;
use crate::error::{ConfigError, StorageError};
use crate::record::StorageMode;
use crate::storage::Storage;
use crate::time::US_PER_SEC;

/// Config blob in the storage root. 8.3-safe.
pub const CONFIG_FILE: &str = "SEES.CFG";

/// Upper bound on the encoded config size.
const CONFIG_MAX_BYTES: usize = 128;

/// Instrument settings, persisted as a postcard blob.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct SeesConfig {
    /// Time between samples
    pub sample_interval_us: u32,
    pub adc: AdcScale,
    pub detector: DetectorConfig,
    /// History the ring store should hold
    pub retention_secs: f32,
    pub storage_mode: StorageMode,
    /// Ring capacity in sparse mode
    pub sparse_hit_budget: u32,
    /// Snap half-width, also the post-trigger settle period
    pub snap_window_secs: f32,
    /// Status LED half-period while healthy
    pub heartbeat_ms: u32,
    /// Stream buffer file batch size, in lines
    pub flush_every: u32,
    /// Live stream state after boot
    pub stream_on_boot: bool,
    /// Persist snaps whose window held no records
    pub keep_empty_snaps: bool,
}

impl Default for SeesConfig {
    fn default() -> Self {
        Self {
            sample_interval_us: 100,
            adc: AdcScale::default(),
            detector: DetectorConfig::default(),
            retention_secs: 30.0,
            storage_mode: StorageMode::Dense,
            sparse_hit_budget: 30_000,
            snap_window_secs: 2.5,
            heartbeat_ms: 500,
            flush_every: 100,
            stream_on_boot: true,
            keep_empty_snaps: false,
        }
    }
}

impl SeesConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_interval_us == 0 {
            return Err(ConfigError::Invalid("sample interval is zero"));
        }
        if !(1..=16).contains(&self.adc.bits) {
            return Err(ConfigError::Invalid("ADC resolution must be 1..=16 bits"));
        }
        if !(self.adc.reference_v > 0.0) {
            return Err(ConfigError::Invalid("ADC reference must be positive"));
        }

        let d = &self.detector;
        if !(d.lower_exit_v <= d.lower_enter_v) {
            return Err(ConfigError::Invalid("lower exit threshold above lower enter"));
        }
        if !(d.lower_enter_v <= d.upper_limit_v) {
            return Err(ConfigError::Invalid("lower enter threshold above upper limit"));
        }

        if !(self.retention_secs > 0.0) {
            return Err(ConfigError::Invalid("retention must be positive"));
        }
        if self.sparse_hit_budget == 0 {
            return Err(ConfigError::Invalid("sparse hit budget is zero"));
        }
        if !(self.snap_window_secs > 0.0) {
            return Err(ConfigError::Invalid("snap window must be positive"));
        }
        Ok(())
    }

    pub fn sample_rate_hz(&self) -> f64 {
        US_PER_SEC / self.sample_interval_us.max(1) as f64
    }

    /// Ring capacity: retention x rate when dense, the hit budget when sparse.
    pub fn ring_capacity(&self) -> usize {
        match self.storage_mode {
            StorageMode::Dense => round(self.retention_secs as f64 * self.sample_rate_hz()),
            StorageMode::Sparse => self.sparse_hit_budget as usize,
        }
    }

    /// Most records a single snap may extract.
    pub fn snap_max_records(&self) -> usize {
        match self.storage_mode {
            // Both window bounds are inclusive, hence one extra sample.
            StorageMode::Dense => round(2.0 * self.snap_window_secs as f64 * self.sample_rate_hz()) + 1,
            StorageMode::Sparse => self.sparse_hit_budget as usize,
        }
    }

    pub fn to_postcard(&self) -> Result<Vec<u8>, ConfigError> {
        postcard::to_allocvec(self).map_err(|_| ConfigError::Encode)
    }

    /// Decode and validate a stored blob.
    pub fn from_postcard(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = postcard::from_bytes(bytes).map_err(|_| ConfigError::Decode)?;
        config.validate()?;
        Ok(config)
    }

    /// Read [`CONFIG_FILE`] from the storage root, falling back to defaults.
    pub fn load_or_default<S: Storage>(storage: &mut S) -> Self {
        let mut buf = [0u8; CONFIG_MAX_BYTES];
        let len = match storage.read_file("", CONFIG_FILE, &mut buf) {
            Ok(len) => len,
            Err(StorageError::NotFound) => {
                info!("No {} found; using default config", CONFIG_FILE);
                return Self::default();
            }
            Err(e) => {
                warn!("Could not read {} ({}); using default config", CONFIG_FILE, e);
                return Self::default();
            }
        };

        match Self::from_postcard(&buf[..len]) {
            Ok(config) => {
                info!("Loaded {}", CONFIG_FILE);
                config
            }
            Err(e) => {
                warn!("Ignoring {} ({}); using default config", CONFIG_FILE, e);
                Self::default()
            }
        }
    }

    pub fn save<S: Storage>(&self, storage: &mut S) -> Result<(), ConfigError> {
        self.validate()?;
        let bytes = self.to_postcard()?;
        storage
            .write_file("", CONFIG_FILE, &bytes)
            .and_then(|()| storage.flush())
            .map_err(|_| ConfigError::Encode)
    }
}

/// Nearest whole count; `f64::round` needs std.
fn round(value: f64) -> usize {
    (value + 0.5) as usize
}
