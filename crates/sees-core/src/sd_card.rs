use embedded_sdmmc::{
    Directory, Error as SdmmcError, Mode, SdCard, SdCardError, TimeSource, Timestamp, VolumeIdx,
    VolumeManager,
};

use crate::error::StorageError;
use crate::storage::Storage;

type SdResult<R> = Result<R, SdmmcError<SdCardError>>;

type SdDirectory<'a, S, D, T> = Directory<'a, SdCard<S, D>, T, 4, 4, 1>;

/// FAT timestamps for files written before wall-clock time is known.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedTimeSource;

impl TimeSource for FixedTimeSource {
    fn get_timestamp(&self) -> Timestamp {
        Timestamp {
            year_since_1970: 55,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

impl From<SdmmcError<SdCardError>> for StorageError {
    fn from(e: SdmmcError<SdCardError>) -> Self {
        match e {
            SdmmcError::NotFound => StorageError::NotFound,
            SdmmcError::FilenameError(_) => StorageError::NameTooLong,
            SdmmcError::DeviceError(_) => StorageError::Unavailable,
            _ => StorageError::Io("sd card"),
        }
    }
}

/// [`Storage`] on the first FAT volume of an SD card. Names must be 8.3.
///
/// These operations are blocking and open/close the volume on every call, so
/// callers batch writes (see [`StreamRecorder`](crate::storage::StreamRecorder)).
pub struct SdCardStorage<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    volume_mgr: VolumeManager<SdCard<S, D>, T, 4, 4, 1>,
}

impl<S, D, T> SdCardStorage<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    pub fn new(sd_card: SdCard<S, D>, ts: T) -> Self {
        let volume_mgr = VolumeManager::new(sd_card, ts);

        Self { volume_mgr }
    }

    /// Run `op` inside `dir` (`""` is the root), closing every handle afterwards.
    fn in_dir<R>(
        &self,
        dir: &str,
        op: impl FnOnce(&SdDirectory<'_, S, D, T>) -> SdResult<R>,
    ) -> SdResult<R> {
        let volume0 = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let root_dir = volume0.open_root_dir()?;

        let result = if dir.is_empty() {
            op(&root_dir)
        } else {
            let sub_dir = root_dir.open_dir(dir)?;
            let result = op(&sub_dir);
            sub_dir.close()?;
            result
        };

        root_dir.close()?;
        volume0.close()?;
        result
    }

    fn write_with_mode(&self, dir: &str, name: &str, mode: Mode, contents: &[u8]) -> SdResult<()> {
        self.in_dir(dir, |d| {
            let file = d.open_file_in_dir(name, mode)?;
            file.write(contents)?;
            file.flush()?;
            file.close()
        })
    }
}

impl<S, D, T> Storage for SdCardStorage<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    fn exists(&mut self, dir: &str, name: &str) -> bool {
        self.in_dir(dir, |d| d.find_directory_entry(name).map(|_| ()))
            .is_ok()
    }

    fn create_dir(&mut self, dir: &str) -> Result<(), StorageError> {
        let result = self.in_dir("", |root| match root.make_dir_in_dir(dir) {
            Err(SdmmcError::DirAlreadyExists) => Ok(()),
            other => other,
        });
        Ok(result?)
    }

    fn write_file(&mut self, dir: &str, name: &str, contents: &[u8]) -> Result<(), StorageError> {
        Ok(self.write_with_mode(dir, name, Mode::ReadWriteCreateOrTruncate, contents)?)
    }

    fn append_file(&mut self, dir: &str, name: &str, contents: &[u8]) -> Result<(), StorageError> {
        Ok(self.write_with_mode(dir, name, Mode::ReadWriteCreateOrAppend, contents)?)
    }

    fn read_file(&mut self, dir: &str, name: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let read = self.in_dir(dir, |d| {
            let file = d.open_file_in_dir(name, Mode::ReadOnly)?;
            let mut total = 0;
            while total < buf.len() {
                let n = file.read(&mut buf[total..])?;
                if n == 0 {
                    break; // EOF
                }
                total += n;
            }
            file.close()?;
            Ok(total)
        });
        Ok(read?)
    }
}
