//! Durable storage boundary
//!
//! The platform supplies a [`Storage`] medium (FAT SD card on the device, a
//! directory on desktop hosts). Two writers sit on top of it:
//!
//! - [`SnapArchive`]: persists each snap as a standalone CSV artifact
//! - [`StreamRecorder`]: appends the live telemetry stream to a buffer file
//!   while streaming is switched on
//!
//! A missing or failing medium is never fatal: the writer marks itself
//! unavailable, logs a warning and the instrument carries on.

use alloc::string::String;

use core::fmt::Write;

use log::{debug, info, warn};

use crate::error::StorageError;
use crate::record::RecordShape;
use crate::snap::{Snap, SnapName, SnapSink};

/// Snap rows formatted per append, bounding the text buffer to a few KB.
pub const ARCHIVE_CHUNK_ROWS: usize = 128;

/// File-system primitives the core needs. Paths are a directory plus a name.
pub trait Storage {
    /// Whether `name` exists inside `dir` (`""` is the root).
    fn exists(&mut self, dir: &str, name: &str) -> bool;

    /// Create `dir` under the root. Succeeds if it already exists.
    fn create_dir(&mut self, dir: &str) -> Result<(), StorageError>;

    /// Create or truncate `dir/name` and write `contents`.
    fn write_file(&mut self, dir: &str, name: &str, contents: &[u8]) -> Result<(), StorageError>;

    /// Append `contents` to `dir/name`, creating it if needed.
    fn append_file(&mut self, dir: &str, name: &str, contents: &[u8]) -> Result<(), StorageError>;

    /// Read up to `buf.len()` bytes from the start of `dir/name`.
    fn read_file(&mut self, dir: &str, name: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Push buffered writes to the medium.
    fn flush(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}

impl<S: Storage + ?Sized> Storage for &mut S {
    fn exists(&mut self, dir: &str, name: &str) -> bool {
        (**self).exists(dir, name)
    }

    fn create_dir(&mut self, dir: &str) -> Result<(), StorageError> {
        (**self).create_dir(dir)
    }

    fn write_file(&mut self, dir: &str, name: &str, contents: &[u8]) -> Result<(), StorageError> {
        (**self).write_file(dir, name, contents)
    }

    fn append_file(&mut self, dir: &str, name: &str, contents: &[u8]) -> Result<(), StorageError> {
        (**self).append_file(dir, name, contents)
    }

    fn read_file(&mut self, dir: &str, name: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        (**self).read_file(dir, name, buf)
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        (**self).flush()
    }
}

/// How artifact file names are formed on a medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileNaming {
    /// `snap_<seq:05>_<trigger:010>.csv`, `stream_<n:05>.csv`
    Long,
    /// FAT 8.3: `SNP<seq:05>.CSV`, `STR<n:05>.CSV`
    Short,
}

impl FileNaming {
    pub fn snap_file<R: RecordShape>(self, snap: &Snap<R>) -> SnapName {
        let mut name = SnapName::new();
        // Both forms are well under the name capacity.
        let _ = match self {
            Self::Long => write!(name, "{}.csv", snap.identifier()),
            Self::Short => write!(name, "SNP{:05}.CSV", snap.sequence % 100_000),
        };
        name
    }

    pub fn stream_file(self, session: u32) -> SnapName {
        let mut name = SnapName::new();
        let _ = match self {
            Self::Long => write!(name, "stream_{:05}.csv", session),
            Self::Short => write!(name, "STR{:05}.CSV", session % 100_000),
        };
        name
    }
}

/// Persistence sink writing each snap as a CSV artifact.
pub struct SnapArchive<S: Storage> {
    storage: S,
    dir: &'static str,
    naming: FileNaming,
    available: bool,
    keep_empty: bool,
}

impl<S: Storage> SnapArchive<S> {
    pub fn new(storage: S, dir: &'static str, naming: FileNaming) -> Self {
        Self {
            storage,
            dir,
            naming,
            available: false,
            keep_empty: false,
        }
    }

    /// Also persist snaps whose window held no records.
    pub fn with_empty_snaps(mut self, keep_empty: bool) -> Self {
        self.keep_empty = keep_empty;
        self
    }

    /// Prepare the output directory. Returns whether the archive is usable.
    pub fn begin(&mut self) -> bool {
        match self.storage.create_dir(self.dir) {
            Ok(()) => {
                info!("Snap archive ready in '{}'", self.dir);
                self.available = true;
            }
            Err(e) => {
                warn!("Snap archive unavailable ({}); snaps will only be forwarded", e);
                self.available = false;
            }
        }
        self.available
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }
}

impl<R: RecordShape, S: Storage> SnapSink<R> for SnapArchive<S> {
    fn accepts_empty(&self) -> bool {
        self.keep_empty
    }

    fn deliver(&mut self, snap: &Snap<R>) -> Result<(), StorageError> {
        if !self.available {
            return Err(StorageError::Unavailable);
        }

        let name = self.naming.snap_file(snap);
        let mut chunk = String::new();

        // Header first, then the rows a chunk at a time.
        snap.write_header(&mut chunk)
            .map_err(|_| StorageError::Io("snap header formatting failed"))?;
        self.storage.write_file(self.dir, &name, chunk.as_bytes())?;

        let rows = snap.records.len();
        for start in (0..rows).step_by(ARCHIVE_CHUNK_ROWS) {
            chunk.clear();
            snap.write_rows(start..start + ARCHIVE_CHUNK_ROWS, &mut chunk)
                .map_err(|_| StorageError::Io("snap row formatting failed"))?;
            self.storage.append_file(self.dir, &name, chunk.as_bytes())?;
        }
        self.storage.flush()?;

        info!("Snap saved: {}/{}", self.dir, name);
        Ok(())
    }
}

/// Appends the telemetry stream to a buffer file in batches.
///
/// The recorder does not own the medium; it shares the one the
/// [`SnapArchive`] writes to, borrowed per call.
#[derive(Debug)]
pub struct StreamRecorder {
    dir: &'static str,
    naming: FileNaming,
    flush_every: u32,
    file: Option<SnapName>,
    pending: String,
    pending_lines: u32,
    sessions: u32,
}

impl StreamRecorder {
    pub fn new(dir: &'static str, naming: FileNaming, flush_every: u32) -> Self {
        Self {
            dir,
            naming,
            flush_every: flush_every.max(1),
            file: None,
            pending: String::new(),
            pending_lines: 0,
            sessions: 0,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.file.is_some()
    }

    pub fn current_file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    /// Open a fresh buffer file and write its header.
    pub fn start<S: Storage>(&mut self, storage: &mut S, header: &str) -> Result<(), StorageError> {
        self.stop(storage);

        let name = self.naming.stream_file(self.sessions);
        self.sessions = self.sessions.wrapping_add(1);

        let mut first = String::with_capacity(header.len() + 1);
        first.push_str(header);
        first.push('\n');
        storage.write_file(self.dir, &name, first.as_bytes())?;

        info!("Streaming to {}/{}", self.dir, name);
        self.file = Some(name);
        Ok(())
    }

    /// Queue one line; written out every `flush_every` lines.
    pub fn record<S: Storage>(&mut self, storage: &mut S, line: &str) {
        if self.file.is_none() {
            return;
        }

        self.pending.push_str(line);
        self.pending.push('\n');
        self.pending_lines += 1;

        if self.pending_lines >= self.flush_every {
            self.flush(storage);
        }
    }

    /// Write queued lines. A failure closes the recorder.
    pub fn flush<S: Storage>(&mut self, storage: &mut S) {
        let Some(name) = self.file.as_ref() else {
            return;
        };
        if self.pending.is_empty() {
            return;
        }

        let result = storage
            .append_file(self.dir, name, self.pending.as_bytes())
            .and_then(|()| storage.flush());

        match result {
            Ok(()) => debug!("Stream flushed {} lines", self.pending_lines),
            Err(e) => {
                warn!("Stream buffer file failed ({}); recording stopped", e);
                self.file = None;
            }
        }
        self.pending.clear();
        self.pending_lines = 0;
    }

    /// Flush and close the buffer file.
    pub fn stop<S: Storage>(&mut self, storage: &mut S) {
        self.flush(storage);
        if let Some(name) = self.file.take() {
            info!("Stream file {}/{} closed", self.dir, name);
        }
    }
}
