use crate::storage::{RangeOperation, Storage};
use crate::{Result, StorageError, UnsupportedSnafu, check_access_range};
use aes::Aes128;
use aes::cipher::KeyInit;
use aes::cipher::generic_array::GenericArray;
use snafu::{ResultExt, Snafu, ensure};
use std::cmp::min;
use xts_mode::{Xts128, get_tweak_default};

/// Smallest sector XTS can process (one AES block).
const MIN_SECTOR_SIZE: usize = 16;

/// Errors when creating an [`XtsStorage`].
#[derive(Debug, Snafu)]
#[snafu(module)]
#[non_exhaustive]
pub enum OpenError {
    #[snafu(display("sector size {sector_size} is smaller than one AES block"))]
    InvalidSectorSize { sector_size: usize },

    #[snafu(display("cannot get size of base storage"))]
    GetSizeFailed { source: StorageError },

    #[snafu(display("base storage of {size} bytes is not a whole number of {sector_size}-byte sectors"))]
    MisalignedBase { size: u64, sector_size: usize },
}

/// Byte order used to turn a sector index into an XTS tweak.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TweakOrder {
    /// Sector index stored big-endian, as used by Nintendo content.
    #[default]
    BigEndian,
    /// Sector index stored little-endian (IEEE 1619 data unit sequence number).
    LittleEndian,
}

impl TweakOrder {
    fn tweak(self, sector: u128) -> [u8; 16] {
        match self {
            Self::BigEndian => sector.to_be_bytes(),
            Self::LittleEndian => get_tweak_default(sector),
        }
    }
}

/// AES-128-XTS encrypted storage over a base storage.
///
/// The base holds ciphertext; this storage exposes plaintext of the same
/// size. Reads decrypt whole sectors into a scratch buffer and copy out the
/// requested part. Writes read, decrypt, patch, re-encrypt and write back each
/// touched sector, so unaligned access is supported.
pub struct XtsStorage<S> {
    base: S,
    cipher: Xts128<Aes128>,
    sector_size: usize,
    first_sector: u128,
    tweak_order: TweakOrder,
    len: u64,
}

impl<S: Storage> XtsStorage<S> {
    /// Creates an XTS storage whose first sector has index 0.
    ///
    /// `data_key` encrypts the data, `tweak_key` encrypts the tweak.
    pub fn new(
        base: S,
        data_key: &[u8; 16],
        tweak_key: &[u8; 16],
        sector_size: usize,
    ) -> Result<Self, OpenError> {
        Self::with_first_sector(base, data_key, tweak_key, sector_size, 0)
    }

    /// Creates an XTS storage whose first sector has index `first_sector`.
    pub fn with_first_sector(
        base: S,
        data_key: &[u8; 16],
        tweak_key: &[u8; 16],
        sector_size: usize,
        first_sector: u128,
    ) -> Result<Self, OpenError> {
        ensure!(
            sector_size >= MIN_SECTOR_SIZE,
            open_error::InvalidSectorSizeSnafu { sector_size }
        );

        let len = base.size().context(open_error::GetSizeFailedSnafu)?;

        ensure!(
            len % sector_size as u64 == 0,
            open_error::MisalignedBaseSnafu {
                size: len,
                sector_size
            }
        );

        let cipher_1 = Aes128::new(GenericArray::from_slice(data_key));
        let cipher_2 = Aes128::new(GenericArray::from_slice(tweak_key));

        Ok(Self {
            base,
            cipher: Xts128::<Aes128>::new(cipher_1, cipher_2),
            sector_size,
            first_sector,
            tweak_order: TweakOrder::default(),
            len,
        })
    }

    /// Sets how sector indices are encoded into tweaks.
    #[must_use]
    pub fn with_tweak_order(mut self, tweak_order: TweakOrder) -> Self {
        self.tweak_order = tweak_order;
        self
    }

    #[must_use]
    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    /// Returns a reference to the ciphertext storage.
    pub fn base(&self) -> &S {
        &self.base
    }

    fn tweak(&self, sector: u64) -> [u8; 16] {
        self.tweak_order.tweak(self.first_sector + sector as u128)
    }
}

impl<S> std::fmt::Debug for XtsStorage<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XtsStorage")
            .field("sector_size", &self.sector_size)
            .field("first_sector", &self.first_sector)
            .field("tweak_order", &self.tweak_order)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl<S: Storage> Storage for XtsStorage<S> {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_access_range(offset, buf.len() as u64, self.len)?;

        let sector_size = self.sector_size as u64;
        let mut scratch = vec![0u8; self.sector_size];
        let mut copied = 0;
        let mut pos = offset;

        while copied < buf.len() {
            let sector = pos / sector_size;
            let offset_in_sector = (pos % sector_size) as usize;

            self.base.read(sector * sector_size, &mut scratch)?;
            self.cipher.decrypt_sector(&mut scratch, self.tweak(sector));

            let n = min(self.sector_size - offset_in_sector, buf.len() - copied);

            buf[copied..copied + n]
                .copy_from_slice(&scratch[offset_in_sector..offset_in_sector + n]);

            copied += n;
            pos += n as u64;
        }

        Ok(())
    }

    fn write(&self, offset: u64, buf: &[u8]) -> Result<()> {
        check_access_range(offset, buf.len() as u64, self.len)?;

        let sector_size = self.sector_size as u64;
        let mut scratch = vec![0u8; self.sector_size];
        let mut written = 0;
        let mut pos = offset;

        while written < buf.len() {
            let sector = pos / sector_size;
            let sector_start = sector * sector_size;
            let offset_in_sector = (pos % sector_size) as usize;
            let n = min(self.sector_size - offset_in_sector, buf.len() - written);
            let tweak = self.tweak(sector);

            // Partial sectors keep the plaintext around the patched bytes.
            if n != self.sector_size {
                self.base.read(sector_start, &mut scratch)?;
                self.cipher.decrypt_sector(&mut scratch, tweak);
            }

            scratch[offset_in_sector..offset_in_sector + n]
                .copy_from_slice(&buf[written..written + n]);

            self.cipher.encrypt_sector(&mut scratch, tweak);
            self.base.write(sector_start, &scratch)?;

            written += n;
            pos += n as u64;
        }

        Ok(())
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

        match operation {
            RangeOperation::InvalidateCache => self.base.operate_range(operation, offset, size),
            // Zeroed ciphertext does not decrypt to zeroed plaintext.
            RangeOperation::FillZero => UnsupportedSnafu {
                operation: operation.name(),
            }
            .fail(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStorage;

    struct Vector {
        data_key: [u8; 16],
        tweak_key: [u8; 16],
        sector: u128,
        plain: &'static [u8],
        cipher: &'static [u8],
    }

    const KEY_FF: [u8; 16] = [
        0xFF, 0xFE, 0xFD, 0xFC, 0xFB, 0xFA, 0xF9, 0xF8, 0xF7, 0xF6, 0xF5, 0xF4, 0xF3, 0xF2, 0xF1,
        0xF0,
    ];
    const KEY_BF: [u8; 16] = [
        0xBF, 0xBE, 0xBD, 0xBC, 0xBB, 0xBA, 0xB9, 0xB8, 0xB7, 0xB6, 0xB5, 0xB4, 0xB3, 0xB2, 0xB1,
        0xB0,
    ];

    fn vectors() -> [Vector; 3] {
        [
            Vector {
                data_key: [0; 16],
                tweak_key: [0; 16],
                sector: 0,
                plain: &[0; 32],
                cipher: &[
                    0x91, 0x7C, 0xF6, 0x9E, 0xBD, 0x68, 0xB2, 0xEC, 0x9B, 0x9F, 0xE9, 0xA3, 0xEA,
                    0xDD, 0xA6, 0x92, 0xCD, 0x43, 0xD2, 0xF5, 0x95, 0x98, 0xED, 0x85, 0x8C, 0x02,
                    0xC2, 0x65, 0x2F, 0xBF, 0x92, 0x2E,
                ],
            },
            Vector {
                data_key: [0x11; 16],
                tweak_key: [0x22; 16],
                sector: 0x3333333333,
                plain: &[0x44; 32],
                cipher: &[
                    0x44, 0xBE, 0xC8, 0x2F, 0xFB, 0x76, 0xAE, 0xFD, 0xFB, 0xC9, 0x6D, 0xFE, 0x61,
                    0xE1, 0x92, 0xCC, 0xFA, 0x22, 0x13, 0x67, 0x7C, 0x8F, 0x4F, 0xD6, 0xE4, 0xF1,
                    0x8F, 0x7E, 0xBB, 0x69, 0x38, 0x2F,
                ],
            },
            Vector {
                data_key: KEY_FF,
                tweak_key: KEY_BF,
                sector: 0x123456789A,
                plain: &[
                    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C,
                    0x0D, 0x0E, 0x0F, 0x10,
                ],
                cipher: &[
                    0x9E, 0x61, 0x71, 0x58, 0x09, 0xA7, 0x4B, 0x7E, 0x0E, 0xF0, 0x33, 0xCD, 0x86,
                    0x18, 0x14, 0x04, 0xC2,
                ],
            },
        ]
    }

    fn open<'a>(vector: &Vector, base: &'a MemoryStorage) -> XtsStorage<&'a MemoryStorage> {
        XtsStorage::with_first_sector(
            base,
            &vector.data_key,
            &vector.tweak_key,
            vector.plain.len(),
            vector.sector,
        )
        .unwrap()
    }

    #[test]
    fn decrypts_known_vectors() {
        for vector in vectors() {
            let base = MemoryStorage::new(vector.cipher.to_vec());
            let xts = open(&vector, &base);

            assert_eq!(xts.read_vec(0, vector.plain.len()).unwrap(), vector.plain);
        }
    }

    #[test]
    fn encrypts_known_vectors() {
        for vector in vectors() {
            let base = MemoryStorage::zeroed(vector.cipher.len());
            let xts = open(&vector, &base);

            xts.write(0, vector.plain).unwrap();

            assert_eq!(base.to_vec(), vector.cipher);
        }
    }

    #[test]
    fn unaligned_write_round_trips_across_sectors() {
        let base = MemoryStorage::zeroed(0x80);
        let xts = XtsStorage::new(&base, &[1; 16], &[2; 16], 0x20).unwrap();
        let payload: Vec<u8> = (0..0x30).map(|i| i as u8 ^ 0xA5).collect();

        xts.write(0x1B, &payload).unwrap();

        assert_eq!(xts.read_vec(0x1B, payload.len()).unwrap(), payload);
        assert_ne!(&base.to_vec()[0x1B..0x4B], payload.as_slice());
        // Sector 3 was never touched.
        assert!(base.to_vec()[0x60..].iter().all(|&b| b == 0));
    }

    #[test]
    fn tweak_order_changes_ciphertext() {
        let be = MemoryStorage::zeroed(0x20);
        let le = MemoryStorage::zeroed(0x20);

        XtsStorage::with_first_sector(&be, &[3; 16], &[4; 16], 0x20, 5)
            .unwrap()
            .write(0, &[0x42; 0x20])
            .unwrap();
        XtsStorage::with_first_sector(&le, &[3; 16], &[4; 16], 0x20, 5)
            .unwrap()
            .with_tweak_order(TweakOrder::LittleEndian)
            .write(0, &[0x42; 0x20])
            .unwrap();

        assert_ne!(be.to_vec(), le.to_vec());
    }

    #[test]
    fn rejects_bad_geometry() {
        let base = MemoryStorage::zeroed(0x30);

        assert!(matches!(
            XtsStorage::new(&base, &[0; 16], &[0; 16], 8),
            Err(OpenError::InvalidSectorSize { sector_size: 8 })
        ));
        assert!(matches!(
            XtsStorage::new(&base, &[0; 16], &[0; 16], 0x20),
            Err(OpenError::MisalignedBase { size: 0x30, .. })
        ));
    }

    #[test]
    fn fill_zero_is_unsupported() {
        let base = MemoryStorage::zeroed(0x20);
        let xts = XtsStorage::new(&base, &[0; 16], &[0; 16], 0x20).unwrap();

        assert!(
            xts.operate_range(RangeOperation::FillZero, 0, 0x20)
                .unwrap_err()
                .is_unsupported()
        );
        assert!(xts.set_size(0x40).unwrap_err().is_unsupported());
    }
}
