use crate::storage::{RangeOperation, Storage};
use crate::{IoSnafu, Result, UnsupportedSnafu, check_access_range};
use parking_lot::Mutex;
use snafu::ResultExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Storage backed by a file on disk.
///
/// The file handle is guarded by a mutex because seeking and reading are two
/// separate system calls. [`flush()`](Storage::flush) syncs file data to the
/// device.
pub struct FileStorage {
    file: Mutex<File>,
}

impl FileStorage {
    pub fn new(file: File) -> Self {
        Self {
            file: Mutex::new(file),
        }
    }

    /// Opens an existing file for reading and writing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .context(IoSnafu)?;

        Ok(Self::new(file))
    }

    pub fn into_inner(self) -> File {
        self.file.into_inner()
    }
}

impl std::fmt::Debug for FileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStorage").finish_non_exhaustive()
    }
}

impl Storage for FileStorage {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut file = self.file.lock();
        let size = file.metadata().context(IoSnafu)?.len();

        check_access_range(offset, buf.len() as u64, size)?;

        file.seek(SeekFrom::Start(offset)).context(IoSnafu)?;
        file.read_exact(buf).context(IoSnafu)
    }

    fn write(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut file = self.file.lock();
        let size = file.metadata().context(IoSnafu)?.len();

        check_access_range(offset, buf.len() as u64, size)?;

        file.seek(SeekFrom::Start(offset)).context(IoSnafu)?;
        file.write_all(buf).context(IoSnafu)
    }

    fn flush(&self) -> Result<()> {
        let mut file = self.file.lock();

        file.flush().context(IoSnafu)?;
        file.sync_data().context(IoSnafu)
    }

    fn size(&self) -> Result<u64> {
        Ok(self.file.lock().metadata().context(IoSnafu)?.len())
    }

    fn set_size(&self, size: u64) -> Result<()> {
        self.file.lock().set_len(size).context(IoSnafu)
    }

    fn operate_range(&self, operation: RangeOperation, offset: u64, size: u64) -> Result<()> {
        match operation {
            RangeOperation::FillZero => self.fill(offset, size, 0),
            RangeOperation::InvalidateCache => UnsupportedSnafu {
                operation: operation.name(),
            }
            .fail(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_storage(data: &[u8]) -> (tempfile::NamedTempFile, FileStorage) {
        let mut temp = tempfile::NamedTempFile::new().unwrap();
        temp.write_all(data).unwrap();
        temp.flush().unwrap();

        let storage = FileStorage::open(temp.path()).unwrap();
        (temp, storage)
    }

    #[test]
    fn reads_and_writes_in_place() {
        let (temp, storage) = temp_storage(&[0u8; 64]);

        storage.write(10, b"duplex").unwrap();
        storage.flush().unwrap();

        let mut buf = [0u8; 6];
        storage.read(10, &mut buf).unwrap();
        assert_eq!(&buf, b"duplex");
        assert_eq!(&std::fs::read(temp.path()).unwrap()[10..16], b"duplex");
    }

    #[test]
    fn bounds_follow_file_length() {
        let (_temp, storage) = temp_storage(&[0u8; 16]);

        assert_eq!(storage.size().unwrap(), 16);
        assert!(storage.write(15, &[1, 2]).unwrap_err().is_out_of_range());

        storage.set_size(32).unwrap();
        storage.write(15, &[1, 2]).unwrap();
        assert_eq!(storage.size().unwrap(), 32);
    }

    #[test]
    fn fill_zero_clears_range() {
        let (_temp, storage) = temp_storage(&[0xFFu8; 32]);

        storage
            .operate_range(RangeOperation::FillZero, 8, 8)
            .unwrap();

        let data = storage.read_vec(0, 32).unwrap();
        assert!(data[8..16].iter().all(|&b| b == 0));
        assert!(data[16..].iter().all(|&b| b == 0xFF));
    }
}
