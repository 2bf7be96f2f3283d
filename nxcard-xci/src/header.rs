use std::fmt;

use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, KeyIvInit};
use zerocopy::{
    FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout, Unaligned,
    byteorder::little_endian::{U32, U64},
};

/// `"HEAD"` read as a little-endian `u32`.
pub const HEADER_MAGIC: u32 = 0x44414548;

/// Size of the RSA-2048 signature that opens the header.
pub const SIGNATURE_SIZE: usize = 0x100;

/// Size of the AES-CBC encrypted tail of the header.
pub const ENCRYPTED_HEADER_SIZE: usize = 0x70;

#[derive(Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct CardHeaderRaw {
    pub signature: [u8; SIGNATURE_SIZE],             // 0x000 - RSA-2048 over 0x100..0x200
    pub magic: U32,                                  // 0x100 - "HEAD"
    pub rom_area_start_page: U32,                    // 0x104
    pub backup_area_start_page: U32,                 // 0x108
    pub key_index: u8,                               // 0x10C - KEK index << 4 | title key dec index
    pub card_size: u8,                               // 0x10D
    pub header_version: u8,                          // 0x10E
    pub flags: u8,                                   // 0x10F
    pub package_id: U64,                             // 0x110
    pub valid_data_end_page: U64,                    // 0x118
    pub iv: [u8; 0x10],                              // 0x120 - stored byte-reversed
    pub root_partition_offset: U64,                  // 0x130
    pub root_partition_header_size: U64,             // 0x138
    pub root_partition_header_hash: [u8; 0x20],      // 0x140
    pub initial_data_hash: [u8; 0x20],               // 0x160
    pub sel_sec: U32,                                // 0x180
    pub sel_t1_key: U32,                             // 0x184
    pub sel_key: U32,                                // 0x188
    pub lim_area_page: U32,                          // 0x18C
    pub encrypted_data: [u8; ENCRYPTED_HEADER_SIZE], // 0x190
                                                     // 0x200 - end of header
}

impl CardHeaderRaw {
    pub const SIZE: usize = size_of::<Self>();

    /// Returns the RSA-signed half of the header (`0x100..0x200`).
    #[must_use]
    pub fn signed_data(&self) -> &[u8] {
        &self.as_bytes()[SIGNATURE_SIZE..]
    }
}

#[derive(Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct ExtendedHeaderRaw {
    pub fw_version: U64,           // 0x00
    pub acc_ctrl1: U32,            // 0x08 - clock rate
    pub wait1_time_read: U32,      // 0x0C
    pub wait2_time_read: U32,      // 0x10
    pub wait1_time_write: U32,     // 0x14
    pub wait2_time_write: U32,     // 0x18
    pub fw_mode: U32,              // 0x1C
    pub upp_version: U32,          // 0x20
    pub compatibility_type: u8,    // 0x24
    pub reserved_0x25: [u8; 3],    // 0x25
    pub upp_hash: [u8; 8],         // 0x28
    pub upp_id: U64,               // 0x30
    pub reserved_0x38: [u8; 0x38], // 0x38
                                   // 0x70 - end of encrypted header
}

/// Decrypted tail of the card header.
///
/// Only available when the header key is known.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtendedHeader {
    pub fw_version: u64,
    pub clock_rate: ClockRate,
    pub wait1_time_read: u32,
    pub wait2_time_read: u32,
    pub wait1_time_write: u32,
    pub wait2_time_write: u32,
    pub fw_mode: u32,
    /// Version of the update partition.
    pub upp_version: u32,
    pub compatibility_type: u8,
    /// Truncated hash of the update partition.
    pub upp_hash: [u8; 8],
    /// Title ID of the update partition.
    pub upp_id: u64,
}

impl ExtendedHeader {
    /// Decrypts `encrypted` with AES-128-CBC and decodes the result.
    ///
    /// `iv` must already be in cipher order (i.e. reversed from how it is
    /// stored in the header).
    pub fn decrypt(
        encrypted: &[u8; ENCRYPTED_HEADER_SIZE],
        key: &[u8; 16],
        iv: &[u8; 16],
    ) -> Self {
        let mut raw = ExtendedHeaderRaw::new_zeroed();
        raw.as_mut_bytes().copy_from_slice(encrypted);

        let mut decryptor = cbc::Decryptor::<Aes128>::new(&(*key).into(), &(*iv).into());

        for block in raw.as_mut_bytes().chunks_exact_mut(16) {
            decryptor.decrypt_block_mut(GenericArray::from_mut_slice(block));
        }

        Self::from_raw(&raw)
    }

    #[must_use]
    pub fn from_raw(raw: &ExtendedHeaderRaw) -> Self {
        Self {
            fw_version: raw.fw_version.get(),
            clock_rate: ClockRate::from_raw(raw.acc_ctrl1.get()),
            wait1_time_read: raw.wait1_time_read.get(),
            wait2_time_read: raw.wait2_time_read.get(),
            wait1_time_write: raw.wait1_time_write.get(),
            wait2_time_write: raw.wait2_time_write.get(),
            fw_mode: raw.fw_mode.get(),
            upp_version: raw.upp_version.get(),
            compatibility_type: raw.compatibility_type,
            upp_hash: raw.upp_hash,
            upp_id: raw.upp_id.get(),
        }
    }
}

/// Capacity class of a game card.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CardSize {
    Gb1,
    Gb2,
    Gb4,
    Gb8,
    Gb16,
    Gb32,
    Unknown(u8),
}

impl CardSize {
    #[must_use]
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            0xFA => Self::Gb1,
            0xF8 => Self::Gb2,
            0xF0 => Self::Gb4,
            0xE0 => Self::Gb8,
            0xE1 => Self::Gb16,
            0xE2 => Self::Gb32,
            v => Self::Unknown(v),
        }
    }

    #[must_use]
    pub const fn raw(self) -> u8 {
        match self {
            Self::Gb1 => 0xFA,
            Self::Gb2 => 0xF8,
            Self::Gb4 => 0xF0,
            Self::Gb8 => 0xE0,
            Self::Gb16 => 0xE1,
            Self::Gb32 => 0xE2,
            Self::Unknown(v) => v,
        }
    }

    /// Returns a human-readable capacity such as `"4 GB"`.
    #[must_use]
    pub const fn capacity_name(self) -> &'static str {
        match self {
            Self::Gb1 => "1 GB",
            Self::Gb2 => "2 GB",
            Self::Gb4 => "4 GB",
            Self::Gb8 => "8 GB",
            Self::Gb16 => "16 GB",
            Self::Gb32 => "32 GB",
            Self::Unknown(_) => "Unknown",
        }
    }
}

impl fmt::Display for CardSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(v) => write!(f, "Unknown ({v:#04X})"),
            v => f.write_str(v.capacity_name()),
        }
    }
}

/// Bus clock the card is accessed at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClockRate {
    Mhz25,
    Mhz50,
    Unknown(u32),
}

impl ClockRate {
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            0xA10011 => Self::Mhz25,
            0xA10010 => Self::Mhz50,
            v => Self::Unknown(v),
        }
    }

    #[must_use]
    pub const fn raw(self) -> u32 {
        match self {
            Self::Mhz25 => 0xA10011,
            Self::Mhz50 => 0xA10010,
            Self::Unknown(v) => v,
        }
    }
}

impl fmt::Display for ClockRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mhz25 => f.write_str("25 MHz"),
            Self::Mhz50 => f.write_str("50 MHz"),
            Self::Unknown(v) => write!(f, "Unknown ({v:#08X})"),
        }
    }
}

bitflags::bitflags! {
    /// Card attribute flags. Unknown bits are retained.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct CardAttribute: u8 {
        const AUTO_BOOT = 0x01;
        const HISTORY_ERASE = 0x02;
        const REPAIR_TOOL = 0x04;
        const DIFFERENT_REGION_CUP_TO_TERRA_DEVICE = 0x08;
        const DIFFERENT_REGION_CUP_TO_GLOBAL_DEVICE = 0x10;
        const HAS_CA10_CERTIFICATE = 0x80;
    }
}

impl fmt::Display for CardAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "(none)");
        }

        let mut first = true;
        let mut write_flag = |name: &dyn fmt::Display| -> fmt::Result {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{name}")
        };

        for (name, _) in self.iter_names() {
            write_flag(&name)?;
        }

        let unknown = self.bits() & !Self::all().bits();
        if unknown != 0 {
            write_flag(&format!("Unknown ({unknown:#04X})"))?;
        }

        Ok(())
    }
}
