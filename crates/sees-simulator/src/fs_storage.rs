//! [`Storage`] backed by a host directory

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use sees_core::error::StorageError;
use sees_core::storage::Storage;

fn to_storage_error(e: io::Error) -> StorageError {
    match e.kind() {
        ErrorKind::NotFound => StorageError::NotFound,
        ErrorKind::PermissionDenied | ErrorKind::ReadOnlyFilesystem => StorageError::Unavailable,
        _ => StorageError::Io("host filesystem"),
    }
}

/// Files live under `root/<dir>/<name>`; `""` is the root itself.
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, dir: &str, name: &str) -> PathBuf {
        self.root.join(dir).join(name)
    }
}

impl Storage for FsStorage {
    fn exists(&mut self, dir: &str, name: &str) -> bool {
        self.path(dir, name).exists()
    }

    fn create_dir(&mut self, dir: &str) -> Result<(), StorageError> {
        fs::create_dir_all(self.root.join(dir)).map_err(to_storage_error)
    }

    fn write_file(&mut self, dir: &str, name: &str, contents: &[u8]) -> Result<(), StorageError> {
        fs::write(self.path(dir, name), contents).map_err(to_storage_error)
    }

    fn append_file(&mut self, dir: &str, name: &str, contents: &[u8]) -> Result<(), StorageError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(dir, name))
            .map_err(to_storage_error)?;
        file.write_all(contents).map_err(to_storage_error)
    }

    fn read_file(&mut self, dir: &str, name: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let file = File::open(self.path(dir, name)).map_err(to_storage_error)?;
        let mut total = 0;
        let mut limited = file.take(buf.len() as u64);
        loop {
            match limited.read(&mut buf[total..]) {
                Ok(0) => return Ok(total),
                Ok(n) => total += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(to_storage_error(e)),
            }
        }
    }
}
