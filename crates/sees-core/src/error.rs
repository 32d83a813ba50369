//! Error types for the SEEs core
//!
//! Every failure in the core is an explicit value. Only [`StoreError`] is
//! fatal; the rest are reported by the caller and the poll loop continues.

use thiserror_no_std::Error;

/// Ring store allocation failures. Fatal to the acquisition subsystem.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    #[error("ring store capacity is zero")]
    ZeroCapacity,
    #[error("failed to allocate {requested_bytes} bytes for the ring store")]
    AllocationFailed { requested_bytes: usize },
}

/// Snap capture failures returned to the command handler.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureError {
    #[error("ring store has no records")]
    EmptyStore,
    #[error("snap {sequence} is still collecting post-trigger data")]
    InProgress { sequence: u32 },
    #[error("snap {sequence} reached no sink")]
    Undelivered { sequence: u32 },
    #[error("no memory for a {requested_bytes} byte snap extraction")]
    OutOfMemory { requested_bytes: usize },
}

/// Storage medium failures. Degraded, never fatal.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage medium unavailable")]
    Unavailable,
    #[error("file or directory not found")]
    NotFound,
    #[error("file name does not fit the medium")]
    NameTooLong,
    #[error("storage I/O failed: {0}")]
    Io(&'static str),
}

/// Configuration decode and validation failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("config blob could not be decoded")]
    Decode,
    #[error("config could not be encoded")]
    Encode,
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

