//! Bitmap-routed A/B mirrored storage.
//!
//! A duplex storage presents one logical byte range backed by two equally
//! sized copies. The logical range is divided into fixed-size blocks, and a
//! [`DuplexBitmap`] records, per block, which copy currently holds the data.
//! A committed save can then be switched atomically by writing the inactive
//! copy and flipping its bits in a new bitmap.
//!
//! This storage only follows the bitmap it was opened with; it never flips
//! bits itself.

use crate::storage::{RangeOperation, Storage};
use crate::{OutOfRangeSnafu, Result, StorageError, UnsupportedSnafu, check_access_range};
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use std::cmp::min;
use std::ops::Range;
use tracing::debug;

pub use self::bitmap::DuplexBitmap;

mod bitmap;

/// Byte written over the inactive copy by [`DuplexStorage::trim()`] unless
/// overridden with [`DuplexStorage::with_trim_fill()`].
pub const TRIM_FILL_VALUE: u8 = 0x00;

/// Errors when opening a [`DuplexStorage`].
#[derive(Debug, Snafu)]
#[snafu(module)]
#[non_exhaustive]
pub enum OpenError {
    #[snafu(display("block size must be non-zero"))]
    InvalidBlockSize,

    #[snafu(display("cannot get size of {storage} storage"))]
    GetSizeFailed {
        storage: &'static str,
        source: StorageError,
    },

    #[snafu(display("bitmap size {len:#x} is not a multiple of 4 bytes"))]
    MisalignedBitmap { len: u64 },

    #[snafu(display("cannot read duplex bitmap"))]
    ReadBitmapFailed { source: StorageError },

    #[snafu(display("bitmap covers {bits} blocks but the data spans {blocks} blocks"))]
    BitmapTooSmall { bits: usize, blocks: u64 },
}

/// One of the two mirrored copies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DuplexCopy {
    A,
    B,
}

impl DuplexCopy {
    fn from_bit(bit: bool) -> Self {
        if bit { Self::B } else { Self::A }
    }

    /// Returns the copy that is not `self`.
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

/// Portion of an access that falls in one block.
struct Chunk {
    copy: DuplexCopy,
    offset: u64,
    buf: Range<usize>,
}

/// Mirrored storage that routes each block to copy A or copy B.
///
/// The logical size equals the size of copy A. Every access is split at
/// block boundaries and each chunk goes to the copy selected by the bitmap
/// bit of its block. All chunks of an access are validated before any of
/// them is performed, so a failed access never partially reads or writes.
///
/// ```
/// use nxcard_storage::{DuplexBitmap, DuplexStorage, MemoryStorage, Storage};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bitmap = MemoryStorage::new(DuplexBitmap::from_bits([false, true]).to_bytes());
/// let a = MemoryStorage::new(vec![b'a'; 32]);
/// let b = MemoryStorage::new(vec![b'b'; 32]);
/// let duplex = DuplexStorage::new(&bitmap, &a, &b, 16)?;
///
/// let mut buf = [0u8; 4];
/// duplex.read(14, &mut buf)?;
/// assert_eq!(&buf, b"aabb");
/// # Ok(())
/// # }
/// ```
pub struct DuplexStorage<S> {
    bitmap_storage: S,
    data_a: S,
    data_b: S,
    bitmap: DuplexBitmap,
    block_size: u64,
    len: u64,
    trim_fill: u8,
}

impl<S: Storage> DuplexStorage<S> {
    /// Opens a duplex storage, reading the whole bitmap storage up front.
    ///
    /// The bitmap storage must be a whole number of 32-bit words and hold at
    /// least one bit per block of copy A.
    pub fn new(bitmap_storage: S, data_a: S, data_b: S, block_size: u64) -> Result<Self, OpenError> {
        use open_error::*;

        ensure!(block_size != 0, InvalidBlockSizeSnafu);

        let len = data_a
            .size()
            .context(GetSizeFailedSnafu { storage: "copy A" })?;
        let bitmap_len = bitmap_storage
            .size()
            .context(GetSizeFailedSnafu { storage: "bitmap" })?;
        ensure!(bitmap_len % 4 == 0, MisalignedBitmapSnafu { len: bitmap_len });

        let raw = bitmap_storage
            .read_vec(0, bitmap_len as usize)
            .context(ReadBitmapFailedSnafu)?;
        let bitmap = DuplexBitmap::from_bytes(&raw);

        let blocks = len.div_ceil(block_size);
        ensure!(
            bitmap.len() as u64 >= blocks,
            BitmapTooSmallSnafu {
                bits: bitmap.len(),
                blocks,
            }
        );

        debug!(block_size, len, bits = bitmap.len(), "opened duplex storage");

        Ok(Self {
            bitmap_storage,
            data_a,
            data_b,
            bitmap,
            block_size,
            len,
            trim_fill: TRIM_FILL_VALUE,
        })
    }

    /// Sets the byte written by [`trim()`](Self::trim).
    #[must_use]
    pub fn with_trim_fill(mut self, value: u8) -> Self {
        self.trim_fill = value;
        self
    }

    #[must_use]
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    #[must_use]
    pub fn bitmap(&self) -> &DuplexBitmap {
        &self.bitmap
    }

    /// Returns the copy holding the current data of `block`.
    #[must_use]
    pub fn active_copy(&self, block: u64) -> Option<DuplexCopy> {
        let index = usize::try_from(block).ok()?;
        self.bitmap.get(index).map(DuplexCopy::from_bit)
    }

    pub fn copy(&self, copy: DuplexCopy) -> &S {
        match copy {
            DuplexCopy::A => &self.data_a,
            DuplexCopy::B => &self.data_b,
        }
    }

    pub fn into_inner(self) -> (S, S, S) {
        (self.bitmap_storage, self.data_a, self.data_b)
    }

    /// Overwrites the inactive copy of every block with the trim fill byte.
    ///
    /// The active data is untouched, so the logical contents are unchanged.
    /// The last block is clamped to the logical size.
    pub fn trim(&self) -> Result<()> {
        let blocks = self.len.div_ceil(self.block_size);

        for block in 0..blocks {
            let start = block * self.block_size;
            let len = min(self.block_size, self.len - start);
            let inactive = self
                .active_copy(block)
                .context(OutOfRangeSnafu {
                    offset: start,
                    len,
                    size: self.len,
                })?
                .other();

            self.copy(inactive).fill(start, len, self.trim_fill)?;
        }

        debug!(blocks, fill = self.trim_fill, "trimmed duplex storage");

        Ok(())
    }

    /// Splits an access into per-block chunks, checking each against the
    /// logical size and the size of the copy it is routed to.
    fn plan(&self, offset: u64, len: usize) -> Result<Vec<Chunk>> {
        check_access_range(offset, len as u64, self.len)?;

        if len == 0 {
            return Ok(Vec::new());
        }

        let size_a = self.data_a.size()?;
        let size_b = self.data_b.size()?;
        let mut chunks = Vec::new();
        let mut done = 0;

        while done < len {
            let pos = offset + done as u64;
            let block = pos / self.block_size;
            let remaining_in_block = self.block_size - pos % self.block_size;
            let n = min((len - done) as u64, remaining_in_block) as usize;

            let copy = self.active_copy(block).context(OutOfRangeSnafu {
                offset: pos,
                len: n as u64,
                size: self.len,
            })?;
            let copy_size = match copy {
                DuplexCopy::A => size_a,
                DuplexCopy::B => size_b,
            };
            check_access_range(pos, n as u64, copy_size)?;

            chunks.push(Chunk {
                copy,
                offset: pos,
                buf: done..done + n,
            });
            done += n;
        }

        Ok(chunks)
    }
}

impl<S> std::fmt::Debug for DuplexStorage<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexStorage")
            .field("block_size", &self.block_size)
            .field("len", &self.len)
            .field("bitmap", &self.bitmap)
            .finish_non_exhaustive()
    }
}

impl<S: Storage> Storage for DuplexStorage<S> {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        for chunk in self.plan(offset, buf.len())? {
            self.copy(chunk.copy).read(chunk.offset, &mut buf[chunk.buf])?;
        }

        Ok(())
    }

    fn write(&self, offset: u64, buf: &[u8]) -> Result<()> {
        for chunk in self.plan(offset, buf.len())? {
            self.copy(chunk.copy).write(chunk.offset, &buf[chunk.buf])?;
        }

        Ok(())
    }

    /// Flushes the bitmap, then copy A, then copy B.
    ///
    /// All three are attempted; the first error is returned.
    fn flush(&self) -> Result<()> {
        let results = [
            self.bitmap_storage.flush(),
            self.data_a.flush(),
            self.data_b.flush(),
        ];

        results.into_iter().find_map(Result::err).map_or(Ok(()), Err)
    }

    fn size(&self) -> Result<u64> {
        Ok(self.len)
    }

    fn operate_range(&self, operation: RangeOperation, _offset: u64, _size: u64) -> Result<()> {
        UnsupportedSnafu {
            operation: operation.name(),
        }
        .fail()
    }
}
