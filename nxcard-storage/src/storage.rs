use crate::sub::SubStorage;
use crate::{Result, UnsupportedSnafu, check_access_range};
use std::cmp::min;
use std::sync::Arc;

/// Largest single write issued by [`Storage::fill()`].
const FILL_CHUNK_SIZE: u64 = 0x4000;

/// Device-level operations that only some storages implement.
///
/// See [`Storage::operate_range()`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum RangeOperation {
    /// Overwrite the range with zeros.
    FillZero,
    /// Drop any cached data for the range.
    InvalidateCache,
}

impl RangeOperation {
    /// Returns a short name used in error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::FillZero => "fill-zero",
            Self::InvalidateCache => "invalidate-cache",
        }
    }
}

/// A sized, offset-addressed byte resource.
///
/// Each call specifies its own offset, so there is no cursor to share and a
/// storage can be used from several threads at once. Implementations must
/// reject any access outside `[0, size)` with
/// [`StorageError::OutOfRange`](crate::StorageError::OutOfRange) before
/// touching the caller's buffer or the backing data.
///
/// Operations a backing cannot perform fail with
/// [`StorageError::Unsupported`](crate::StorageError::Unsupported); they never
/// succeed as a silent no-op.
pub trait Storage: Send + Sync {
    /// Fills `buf` with the bytes at `offset`.
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Writes `buf` at `offset`.
    fn write(&self, offset: u64, buf: &[u8]) -> Result<()>;

    /// Propagates a durability barrier to every backing resource this
    /// storage owns.
    fn flush(&self) -> Result<()>;

    /// Returns the logical length of the storage in bytes.
    fn size(&self) -> Result<u64>;

    /// Resizes the storage.
    ///
    /// Fixed-size storages (views, mirrored and encrypted storages) return
    /// [`StorageError::Unsupported`](crate::StorageError::Unsupported).
    fn set_size(&self, size: u64) -> Result<()> {
        let _ = size;
        UnsupportedSnafu {
            operation: "set_size",
        }
        .fail()
    }

    /// Performs a device-level `operation` on `[offset, offset + size)`.
    fn operate_range(&self, operation: RangeOperation, offset: u64, size: u64) -> Result<()> {
        let _ = (offset, size);
        UnsupportedSnafu {
            operation: operation.name(),
        }
        .fail()
    }

    /// Returns a bounded view of `len` bytes starting at `offset`.
    ///
    /// The bounds are checked against the current size of `self`. The view
    /// borrows `self` and never owns any bytes.
    fn slice(&self, offset: u64, len: u64) -> Result<SubStorage<&Self>>
    where
        Self: Sized,
    {
        SubStorage::new(self, offset, len)
    }

    /// Reads `len` bytes at `offset` into a new buffer.
    fn read_vec(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        // Check before allocating so a bogus length cannot trigger a huge allocation.
        check_access_range(offset, len as u64, self.size()?)?;

        let mut buf = vec![0u8; len];
        self.read(offset, &mut buf)?;

        Ok(buf)
    }

    /// Overwrites `[offset, offset + len)` with `value`.
    fn fill(&self, offset: u64, len: u64, value: u8) -> Result<()> {
        check_access_range(offset, len, self.size()?)?;

        let chunk = vec![value; min(len, FILL_CHUNK_SIZE) as usize];
        let end = offset + len;
        let mut pos = offset;

        while pos < end {
            let n = min(end - pos, chunk.len() as u64) as usize;
            self.write(pos, &chunk[..n])?;
            pos += n as u64;
        }

        Ok(())
    }
}

macro_rules! forward_storage {
    ($($ty:ty),* $(,)?) => {
        $(
            impl<S: Storage + ?Sized> Storage for $ty {
                fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
                    (**self).read(offset, buf)
                }

                fn write(&self, offset: u64, buf: &[u8]) -> Result<()> {
                    (**self).write(offset, buf)
                }

                fn flush(&self) -> Result<()> {
                    (**self).flush()
                }

                fn size(&self) -> Result<u64> {
                    (**self).size()
                }

                fn set_size(&self, size: u64) -> Result<()> {
                    (**self).set_size(size)
                }

                fn operate_range(
                    &self,
                    operation: RangeOperation,
                    offset: u64,
                    size: u64,
                ) -> Result<()> {
                    (**self).operate_range(operation, offset, size)
                }
            }
        )*
    };
}

forward_storage!(&S, Box<S>, Arc<S>);

/// Read-only storage over any byte container.
///
/// Reads are plain slice copies with no locking. Writes fail with
/// [`StorageError::Unsupported`](crate::StorageError::Unsupported).
///
/// This is the natural backing for memory-mapped images:
///
/// ```no_run
/// use nxcard_storage::{ReadOnlyStorage, Storage};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let image = ReadOnlyStorage::new(std::fs::read("game.xci")?);
/// println!("{} bytes", image.size()?);
/// # Ok(())
/// # }
/// ```
pub struct ReadOnlyStorage<R> {
    data: R,
}

impl<R: AsRef<[u8]>> ReadOnlyStorage<R> {
    pub fn new(data: R) -> Self {
        Self { data }
    }

    /// Returns the backing bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        self.data.as_ref()
    }

    pub fn into_inner(self) -> R {
        self.data
    }
}

impl<R: AsRef<[u8]>> std::fmt::Debug for ReadOnlyStorage<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadOnlyStorage")
            .field("len", &self.data.as_ref().len())
            .finish_non_exhaustive()
    }
}

impl<R: AsRef<[u8]> + Send + Sync> Storage for ReadOnlyStorage<R> {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let data = self.data.as_ref();

        check_access_range(offset, buf.len() as u64, data.len() as u64)?;

        let start = offset as usize;
        buf.copy_from_slice(&data[start..start + buf.len()]);

        Ok(())
    }

    fn write(&self, _offset: u64, _buf: &[u8]) -> Result<()> {
        UnsupportedSnafu { operation: "write" }.fail()
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.data.as_ref().len() as u64)
    }
}
