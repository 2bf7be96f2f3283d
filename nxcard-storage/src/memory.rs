use crate::storage::{RangeOperation, Storage};
use crate::{Result, UnsupportedSnafu, check_access_range};
use parking_lot::RwLock;

/// Resizable storage that owns its bytes in memory.
#[derive(Default)]
pub struct MemoryStorage {
    data: RwLock<Vec<u8>>,
}

impl MemoryStorage {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Creates a zero-filled storage of `len` bytes.
    pub fn zeroed(len: usize) -> Self {
        Self::new(vec![0; len])
    }

    /// Returns a copy of the current contents.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data.into_inner()
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("len", &self.data.read().len())
            .finish()
    }
}

impl From<Vec<u8>> for MemoryStorage {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl Storage for MemoryStorage {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let data = self.data.read();

        check_access_range(offset, buf.len() as u64, data.len() as u64)?;

        let start = offset as usize;
        buf.copy_from_slice(&data[start..start + buf.len()]);

        Ok(())
    }

    fn write(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut data = self.data.write();

        check_access_range(offset, buf.len() as u64, data.len() as u64)?;

        let start = offset as usize;
        data[start..start + buf.len()].copy_from_slice(buf);

        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn set_size(&self, size: u64) -> Result<()> {
        self.data.write().resize(size as usize, 0);
        Ok(())
    }

    fn operate_range(&self, operation: RangeOperation, offset: u64, size: u64) -> Result<()> {
        match operation {
            RangeOperation::FillZero => {
                let mut data = self.data.write();

                check_access_range(offset, size, data.len() as u64)?;

                let start = offset as usize;
                data[start..start + size as usize].fill(0);

                Ok(())
            }
            // Nothing is cached, so there is nothing meaningful to invalidate.
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

    #[test]
    fn write_then_read() {
        let storage = MemoryStorage::zeroed(16);

        storage.write(4, &[1, 2, 3]).unwrap();

        let mut buf = [0u8; 5];
        storage.read(3, &mut buf).unwrap();
        assert_eq!(buf, [0, 1, 2, 3, 0]);
    }

    #[test]
    fn out_of_range_write_does_not_mutate() {
        let storage = MemoryStorage::new(vec![9u8; 8]);

        assert!(storage.write(6, &[0, 0, 0]).unwrap_err().is_out_of_range());
        assert_eq!(storage.to_vec(), vec![9u8; 8]);
    }

    #[test]
    fn set_size_grows_with_zeros_and_shrinks() {
        let storage = MemoryStorage::new(vec![1u8; 4]);

        storage.set_size(6).unwrap();
        assert_eq!(storage.to_vec(), vec![1, 1, 1, 1, 0, 0]);

        storage.set_size(2).unwrap();
        assert_eq!(storage.size().unwrap(), 2);
    }

    #[test]
    fn fill_spans_multiple_chunks() {
        let storage = MemoryStorage::zeroed(0x9000);

        storage.fill(0x10, 0x8800, 0x5A).unwrap();

        let data = storage.into_inner();
        assert!(data[..0x10].iter().all(|&b| b == 0));
        assert!(data[0x10..0x8810].iter().all(|&b| b == 0x5A));
        assert!(data[0x8810..].iter().all(|&b| b == 0));
    }

    #[test]
    fn invalidate_cache_is_unsupported() {
        let storage = MemoryStorage::zeroed(8);

        assert!(
            storage
                .operate_range(RangeOperation::InvalidateCache, 0, 8)
                .unwrap_err()
                .is_unsupported()
        );
    }
}
