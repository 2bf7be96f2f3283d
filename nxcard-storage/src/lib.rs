//! Composable random-access storages for game card images and save data.
//!
//! Every component in this crate is built on the [`Storage`] trait: a sized,
//! offset-addressed byte resource that can be read, written, flushed and
//! sliced into bounded sub-views without copying.
//!
//! # Features
//!
//! - Owned backings: [`MemoryStorage`], [`ReadOnlyStorage`] (any
//!   `AsRef<[u8]>`, e.g. a memory map) and [`FileStorage`]
//! - Zero-copy sub-range views via [`Storage::slice()`] and [`SubStorage`]
//! - AES-128-XTS sector encryption via [`XtsStorage`]
//! - Bitmap-routed A/B mirrored save storage via [`DuplexStorage`]
//!
//! All storages are `Send + Sync`; positional access means there is no shared
//! cursor. No cross-call atomicity is provided: callers that write
//! overlapping ranges from several threads must serialize those writes.
//!
//! # Example
//!
//! ```
//! use nxcard_storage::{MemoryStorage, Storage};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = MemoryStorage::new(vec![0u8; 0x100]);
//! let view = storage.slice(0x40, 0x20)?;
//!
//! view.write(0, b"hello")?;
//!
//! let mut buf = [0u8; 5];
//! storage.read(0x40, &mut buf)?;
//! assert_eq!(&buf, b"hello");
//! # Ok(())
//! # }
//! ```

use snafu::Snafu;

pub use self::duplex::{DuplexBitmap, DuplexCopy, DuplexStorage};
pub use self::file::FileStorage;
pub use self::memory::MemoryStorage;
pub use self::storage::{RangeOperation, ReadOnlyStorage, Storage};
pub use self::sub::SubStorage;
pub use self::xts::XtsStorage;

pub mod duplex;
pub mod file;
pub mod memory;
pub mod storage;
pub mod sub;
pub mod xts;

/// Errors shared by every [`Storage`] operation.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum StorageError {
    #[snafu(display(
        "access of {len} bytes at offset {offset:#x} is outside storage of {size:#x} bytes"
    ))]
    OutOfRange { offset: u64, len: u64, size: u64 },

    #[snafu(display("{operation} is not supported by this storage"))]
    Unsupported { operation: &'static str },

    #[snafu(display("i/o failed"))]
    Io { source: std::io::Error },
}

impl StorageError {
    /// Returns `true` if this error is [`StorageError::OutOfRange`].
    #[must_use]
    pub fn is_out_of_range(&self) -> bool {
        matches!(self, Self::OutOfRange { .. })
    }

    /// Returns `true` if this error is [`StorageError::Unsupported`].
    #[must_use]
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

type Result<T, E = StorageError> = std::result::Result<T, E>;

/// Checks that `[offset, offset + len)` lies within `[0, size)`.
///
/// An empty access is valid at any offset up to and including `size`.
pub(crate) fn check_access_range(offset: u64, len: u64, size: u64) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => OutOfRangeSnafu { offset, len, size }.fail(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_range_accepts_exact_end() {
        assert!(check_access_range(0, 16, 16).is_ok());
        assert!(check_access_range(16, 0, 16).is_ok());
    }

    #[test]
    fn access_range_rejects_overflow() {
        assert!(check_access_range(1, 16, 16).unwrap_err().is_out_of_range());
        assert!(check_access_range(u64::MAX, 2, u64::MAX).is_err());
        assert!(check_access_range(17, 0, 16).is_err());
    }
}
