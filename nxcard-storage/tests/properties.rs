//! Property-based tests for storage bounds, slicing and duplex routing.

use nxcard_storage::{DuplexBitmap, DuplexStorage, MemoryStorage, Storage};
use proptest::prelude::*;

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

/// Expected logical byte at `pos` given the per-block bits.
fn model_byte(a: &[u8], b: &[u8], bits: &[bool], block_size: usize, pos: usize) -> u8 {
    if bits[pos / block_size] { b[pos] } else { a[pos] }
}

fn duplex_parts(
    bits: &[bool],
    block_size: usize,
) -> (MemoryStorage, MemoryStorage, MemoryStorage, usize) {
    let len = bits.len() * block_size;
    let bitmap = MemoryStorage::new(DuplexBitmap::from_bits(bits.iter().copied()).to_bytes());

    (
        bitmap,
        MemoryStorage::new(pattern(len, 1)),
        MemoryStorage::new(pattern(len, 2)),
        len,
    )
}

proptest! {
    #[test]
    fn prop_out_of_range_never_mutates(
        size in 0usize..256,
        offset in 0u64..300,
        len in 1usize..64,
    ) {
        let storage = MemoryStorage::new(pattern(size, 7));
        let mut buf = vec![0x5A; len];

        let read = storage.read(offset, &mut buf);
        let write = storage.write(offset, &vec![0u8; len]);

        if offset + len as u64 > size as u64 {
            prop_assert!(read.unwrap_err().is_out_of_range());
            prop_assert!(write.unwrap_err().is_out_of_range());
            prop_assert!(buf.iter().all(|&b| b == 0x5A));
            prop_assert_eq!(storage.to_vec(), pattern(size, 7));
        } else {
            prop_assert!(read.is_ok());
            prop_assert!(write.is_ok());
        }
    }

    #[test]
    fn prop_nested_slices_compose(
        a in 0u64..64,
        b in 0u64..64,
        c in 0u64..64,
        d in 0u64..64,
    ) {
        let parent = MemoryStorage::new(pattern(256, 3));
        let outer = parent.slice(a, b + c + d).unwrap();
        let nested = outer.slice(c, d).unwrap();
        let direct = parent.slice(a + c, d).unwrap();

        prop_assert_eq!(
            nested.read_vec(0, d as usize).unwrap(),
            direct.read_vec(0, d as usize).unwrap()
        );
    }

    #[test]
    fn prop_duplex_read_matches_model(
        bits in prop::collection::vec(any::<bool>(), 1..24),
        block_size in 1usize..40,
        start in 0usize..1000,
        len in 0usize..200,
    ) {
        let (bitmap, a, b, size) = duplex_parts(&bits, block_size);
        let duplex = DuplexStorage::new(&bitmap, &a, &b, block_size as u64).unwrap();
        let offset = start % (size + 1);
        let len = len.min(size - offset);

        let data = duplex.read_vec(offset as u64, len).unwrap();
        let (raw_a, raw_b) = (a.to_vec(), b.to_vec());

        for (i, &byte) in data.iter().enumerate() {
            prop_assert_eq!(byte, model_byte(&raw_a, &raw_b, &bits, block_size, offset + i));
        }
    }

    #[test]
    fn prop_duplex_write_leaves_inactive_copy_alone(
        bits in prop::collection::vec(any::<bool>(), 1..24),
        block_size in 1usize..40,
        start in 0usize..1000,
        len in 0usize..200,
        value in any::<u8>(),
    ) {
        let (bitmap, a, b, size) = duplex_parts(&bits, block_size);
        let duplex = DuplexStorage::new(&bitmap, &a, &b, block_size as u64).unwrap();
        let offset = start % (size + 1);
        let len = len.min(size - offset);
        let (before_a, before_b) = (a.to_vec(), b.to_vec());

        duplex.write(offset as u64, &vec![value; len]).unwrap();

        prop_assert!(duplex.read_vec(offset as u64, len).unwrap().iter().all(|&x| x == value));

        let (after_a, after_b) = (a.to_vec(), b.to_vec());
        for pos in 0..size {
            let written = (offset..offset + len).contains(&pos);
            let active_b = bits[pos / block_size];

            if !written || active_b {
                prop_assert_eq!(after_a[pos], before_a[pos]);
            }
            if !written || !active_b {
                prop_assert_eq!(after_b[pos], before_b[pos]);
            }
        }
    }

    #[test]
    fn prop_trim_preserves_logical_contents(
        bits in prop::collection::vec(any::<bool>(), 1..24),
        block_size in 1usize..40,
        fill in any::<u8>(),
    ) {
        let (bitmap, a, b, size) = duplex_parts(&bits, block_size);
        let duplex = DuplexStorage::new(&bitmap, &a, &b, block_size as u64)
            .unwrap()
            .with_trim_fill(fill);
        let before = duplex.read_vec(0, size).unwrap();

        duplex.trim().unwrap();

        prop_assert_eq!(duplex.read_vec(0, size).unwrap(), before);

        let (raw_a, raw_b) = (a.to_vec(), b.to_vec());
        for pos in 0..size {
            let inactive = if bits[pos / block_size] { raw_a[pos] } else { raw_b[pos] };
            prop_assert_eq!(inactive, fill);
        }
    }
}
