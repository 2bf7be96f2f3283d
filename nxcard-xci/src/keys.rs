//! Key material used to verify and decrypt card headers.

use rsa::{BigUint, RsaPublicKey};
use snafu::{ResultExt, Snafu};
use std::io::BufRead;

/// Number of game card title key KEK slots.
pub const GC_TITLE_KEY_KEK_COUNT: usize = 0x10;

/// Errors when loading a [`KeySet`].
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum LoadError {
    #[snafu(display("cannot read key file"))]
    Io { source: std::io::Error },

    #[snafu(display("invalid value for key '{name}' on line {line}"))]
    InvalidKey {
        name: String,
        line: usize,
        source: hex::FromHexError,
    },
}

/// Keys needed to decrypt card headers and unwrap title keys.
///
/// A key that is all zeros is treated as absent.
#[derive(Clone, Default)]
pub struct KeySet {
    pub xci_header_key: [u8; 16],
    pub gc_title_key_keks: [[u8; 16]; GC_TITLE_KEY_KEK_COUNT],
}

impl KeySet {
    /// Returns the header key, or `None` if it is absent.
    #[must_use]
    pub fn header_key(&self) -> Option<&[u8; 16]> {
        present(&self.xci_header_key)
    }

    /// Returns the title key KEK at `index`, or `None` if the slot is out of
    /// range or absent.
    #[must_use]
    pub fn title_key_kek(&self, index: usize) -> Option<&[u8; 16]> {
        self.gc_title_key_keks.get(index).and_then(present)
    }

    /// Parses keys from `name = hex` lines.
    ///
    /// Blank lines, lines starting with `;` or `#`, lines without `=` and
    /// unknown key names are skipped. Recognized names are
    /// `xci_header_key` and `gc_title_key_kek_XX` where `XX` is a hex slot
    /// index.
    ///
    /// ```
    /// use nxcard_xci::keys::KeySet;
    ///
    /// let text = "xci_header_key = 000102030405060708090a0b0c0d0e0f\n";
    /// let keys = KeySet::load(text.as_bytes()).unwrap();
    /// assert_eq!(keys.header_key().unwrap()[15], 0x0F);
    /// ```
    pub fn load(reader: impl BufRead) -> Result<Self, LoadError> {
        let mut keys = Self::default();

        for (index, line) in reader.lines().enumerate() {
            let line = line.context(IoSnafu)?;
            let line = line.trim();

            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            let Some((name, value)) = line.split_once('=') else {
                continue;
            };

            let name = name.trim().to_ascii_lowercase();
            let Some(slot) = keys.slot_mut(&name) else {
                continue;
            };

            hex::decode_to_slice(value.trim(), slot).context(InvalidKeySnafu {
                name,
                line: index + 1,
            })?;
        }

        Ok(keys)
    }

    fn slot_mut(&mut self, name: &str) -> Option<&mut [u8; 16]> {
        if name == "xci_header_key" {
            return Some(&mut self.xci_header_key);
        }

        let index = name.strip_prefix("gc_title_key_kek_")?;
        let index = usize::from_str_radix(index, 16).ok()?;

        self.gc_title_key_keks.get_mut(index)
    }
}

impl std::fmt::Debug for KeySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keks: Vec<usize> = (0..GC_TITLE_KEY_KEK_COUNT)
            .filter(|&i| self.title_key_kek(i).is_some())
            .collect();

        f.debug_struct("KeySet")
            .field("has_header_key", &self.header_key().is_some())
            .field("title_key_keks", &keks)
            .finish()
    }
}

fn present(key: &[u8; 16]) -> Option<&[u8; 16]> {
    key.iter().any(|&b| b != 0).then_some(key)
}

/// Modulus of the RSA-2048 key that signs retail card headers.
pub const XCI_HEADER_MODULUS: [u8; 0x100] = [
    0x98, 0xC7, 0x26, 0xB6, 0x0D, 0x0A, 0x50, 0xA7, 0x39, 0x21, 0x0A, 0xE3, 0x2F, 0xE4, 0x3E, 0x2E,
    0x5B, 0xA2, 0x86, 0x75, 0xAA, 0x5C, 0xEE, 0x34, 0xF1, 0xA3, 0x3A, 0x7E, 0xBD, 0x90, 0x4E, 0xF7,
    0x8D, 0xFA, 0x17, 0xAA, 0x6B, 0xC6, 0x36, 0x6D, 0x4C, 0x9A, 0x6D, 0x57, 0x2F, 0x80, 0xA2, 0xBC,
    0x38, 0x4D, 0xDA, 0x99, 0xA1, 0xD8, 0xC3, 0xE2, 0x99, 0x79, 0x36, 0x71, 0x90, 0x20, 0x25, 0x9D,
    0x4D, 0x11, 0xB8, 0x2E, 0x63, 0x6B, 0x5A, 0xFA, 0x1E, 0x9C, 0x04, 0xD1, 0xC5, 0xF0, 0x9C, 0xB1,
    0x0F, 0xB8, 0xC1, 0x7B, 0xBF, 0xE8, 0xB0, 0xD2, 0x2B, 0x47, 0x01, 0x22, 0x6B, 0x23, 0xC9, 0xD0,
    0xBC, 0xEB, 0x75, 0x6E, 0x41, 0x7D, 0x4C, 0x26, 0xA4, 0x73, 0x21, 0xB4, 0xF0, 0x14, 0xE5, 0xD9,
    0x8D, 0xB3, 0x64, 0xEE, 0xA8, 0xFA, 0x84, 0x1B, 0xB8, 0xB8, 0x7C, 0x88, 0x6B, 0xEF, 0xCC, 0x97,
    0x04, 0x04, 0x9A, 0x67, 0x2F, 0xDF, 0xEC, 0x0D, 0xB2, 0x5F, 0xB5, 0xB2, 0xBD, 0xB5, 0x4B, 0xDE,
    0x0E, 0x88, 0xA3, 0xBA, 0xD1, 0xB4, 0xE0, 0x91, 0x81, 0xA7, 0x84, 0xEB, 0x77, 0x85, 0x8B, 0xEF,
    0xA5, 0xE3, 0x27, 0xB2, 0xF2, 0x82, 0x2B, 0x29, 0xF1, 0x75, 0x2D, 0xCE, 0xCC, 0xAE, 0x9B, 0x8D,
    0xED, 0x5C, 0xF1, 0x8E, 0xDB, 0x9A, 0xD7, 0xAF, 0x42, 0x14, 0x52, 0xCD, 0xE3, 0xC5, 0xDD, 0xCE,
    0x08, 0x12, 0x17, 0xD0, 0x7F, 0x1A, 0xAA, 0x1F, 0x7D, 0xE0, 0x93, 0x54, 0xC8, 0xBC, 0x73, 0x8A,
    0xCB, 0xAD, 0x6E, 0x93, 0xE2, 0x19, 0x72, 0x6B, 0xD3, 0x45, 0xF8, 0x73, 0x3D, 0x2B, 0x6A, 0x55,
    0xD2, 0x3A, 0x8B, 0xB0, 0x8A, 0x42, 0xE3, 0x3D, 0xF1, 0x92, 0x23, 0x42, 0x2E, 0xBA, 0xCC, 0x9C,
    0x9A, 0xC1, 0xDD, 0x62, 0x86, 0x9C, 0x2E, 0xE1, 0x2D, 0x6F, 0x62, 0x67, 0x51, 0x08, 0x0E, 0xCF,
];

/// Returns the public key that verifies retail card header signatures.
pub fn xci_header_public_key() -> Result<RsaPublicKey, rsa::errors::Error> {
    RsaPublicKey::new(
        BigUint::from_bytes_be(&XCI_HEADER_MODULUS),
        BigUint::from(65537u32),
    )
}
