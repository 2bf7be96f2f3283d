use crate::storage::{RangeOperation, Storage};
use crate::{Result, UnsupportedSnafu, check_access_range};

/// A bounded `[offset, offset + len)` view into a parent storage.
///
/// The parent is held by value, so `S` is usually a reference (as returned by
/// [`Storage::slice()`]) or a shared pointer such as [`Arc`](std::sync::Arc).
/// A view never owns bytes and its size is fixed at creation.
///
/// Slices compose: `parent.slice(a, b)?.slice(c, d)?` addresses the same bytes
/// as `parent.slice(a + c, d)?`.
#[derive(Clone)]
pub struct SubStorage<S> {
    base: S,
    offset: u64,
    len: u64,
}

impl<S: Storage> SubStorage<S> {
    /// Creates a view of `len` bytes at `offset` within `base`.
    ///
    /// Fails with [`StorageError::OutOfRange`](crate::StorageError::OutOfRange)
    /// if the range does not fit inside the current size of `base`.
    pub fn new(base: S, offset: u64, len: u64) -> Result<Self> {
        check_access_range(offset, len, base.size()?)?;

        Ok(Self { base, offset, len })
    }

    /// Returns the offset of this view within its parent.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns the length of this view.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns a reference to the parent storage.
    pub fn base(&self) -> &S {
        &self.base
    }

    pub fn into_inner(self) -> S {
        self.base
    }
}

impl<S> std::fmt::Debug for SubStorage<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubStorage")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl<S: Storage> Storage for SubStorage<S> {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_access_range(offset, buf.len() as u64, self.len)?;
        self.base.read(self.offset + offset, buf)
    }

    fn write(&self, offset: u64, buf: &[u8]) -> Result<()> {
        check_access_range(offset, buf.len() as u64, self.len)?;
        self.base.write(self.offset + offset, buf)
    }

    fn flush(&self) -> Result<()> {
        self.base.flush()
    }

    fn size(&self) -> Result<u64> {
        Ok(self.len)
    }

    fn set_size(&self, _size: u64) -> Result<()> {
        UnsupportedSnafu {
            operation: "set_size",
        }
        .fail()
    }

    fn operate_range(&self, operation: RangeOperation, offset: u64, size: u64) -> Result<()> {
        check_access_range(offset, size, self.len)?;
        self.base
            .operate_range(operation, self.offset + offset, size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStorage;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| i as u8).collect()
    }

    #[test]
    fn reads_are_relative_to_view() {
        let parent = MemoryStorage::new(pattern(64));
        let view = parent.slice(16, 8).unwrap();
        let mut buf = [0u8; 8];

        view.read(0, &mut buf).unwrap();

        assert_eq!(buf, [16, 17, 18, 19, 20, 21, 22, 23]);
    }

    #[test]
    fn writes_land_in_parent() {
        let parent = MemoryStorage::new(vec![0u8; 32]);
        let view = parent.slice(8, 8).unwrap();

        view.write(2, &[0xEE, 0xFF]).unwrap();

        assert_eq!(&parent.to_vec()[8..12], &[0, 0, 0xEE, 0xFF]);
    }

    #[test]
    fn creation_checks_parent_bounds() {
        let parent = MemoryStorage::new(vec![0u8; 32]);

        assert!(parent.slice(0, 32).is_ok());
        assert!(parent.slice(32, 0).is_ok());
        assert!(parent.slice(31, 2).unwrap_err().is_out_of_range());
    }

    #[test]
    fn access_beyond_view_is_rejected_even_inside_parent() {
        let parent = MemoryStorage::new(pattern(64));
        let view = parent.slice(0, 16).unwrap();
        let mut buf = [0xAAu8; 4];

        assert!(view.read(14, &mut buf).unwrap_err().is_out_of_range());
        assert_eq!(buf, [0xAA; 4]);
        assert!(view.write(16, &[1]).unwrap_err().is_out_of_range());
        assert_eq!(parent.to_vec(), pattern(64));
    }

    #[test]
    fn nested_slice_matches_direct_slice() {
        let parent = MemoryStorage::new(pattern(128));
        let outer = parent.slice(10, 50).unwrap();
        let nested = outer.slice(5, 20).unwrap();
        let direct = parent.slice(15, 20).unwrap();

        assert_eq!(nested.read_vec(0, 20).unwrap(), direct.read_vec(0, 20).unwrap());
        assert!(outer.slice(40, 11).unwrap_err().is_out_of_range());
    }

    #[test]
    fn resize_is_unsupported() {
        let parent = MemoryStorage::new(vec![0u8; 32]);
        let view = parent.slice(0, 16).unwrap();

        assert!(view.set_size(8).unwrap_err().is_unsupported());
    }

    #[test]
    fn operate_range_translates_offset() {
        let parent = MemoryStorage::new(vec![0xFFu8; 32]);
        let view = parent.slice(8, 16).unwrap();

        view.operate_range(RangeOperation::FillZero, 4, 4).unwrap();

        let data = parent.to_vec();
        assert!(data[12..16].iter().all(|&b| b == 0));
        assert!(data[..12].iter().chain(&data[16..]).all(|&b| b == 0xFF));
        assert!(
            view.operate_range(RangeOperation::FillZero, 12, 8)
                .unwrap_err()
                .is_out_of_range()
        );
    }
}
