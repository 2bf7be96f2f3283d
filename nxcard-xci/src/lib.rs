//! A library for parsing and verifying Nintendo Switch game card (XCI)
//! headers.
//!
//! A card image optionally starts with a 4 KiB key area holding the card
//! initial data, followed by the card header. The header is RSA-signed and
//! partially AES-CBC encrypted; the initial data wraps a title key with
//! AES-CCM.
//!
//! # Features
//!
//! - Decode every plaintext header field
//! - Verify the header signature, the root partition header hash and the
//!   initial data hash, each recorded as a [`Validity`]
//! - Decrypt the extended header when the header key is known
//! - Unwrap the title key when the matching KEK is known
//!
//! Only a bad header magic aborts parsing. Missing keys leave the dependent
//! fields empty and failed checks are reported as [`Validity::Invalid`], so
//! any image can be inspected.
//!
//! # Example
//!
//! ```no_run
//! use nxcard_storage::ReadOnlyStorage;
//! use nxcard_xci::XciHeader;
//! use nxcard_xci::keys::KeySet;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let image = ReadOnlyStorage::new(std::fs::read("game.xci")?);
//! let keys = KeySet::load(std::io::BufReader::new(std::fs::File::open("prod.keys")?))?;
//! let header = XciHeader::read(&image, Some(&keys))?;
//!
//! println!("Package ID: {:016X}", header.package_id());
//! println!("Signature: {}", header.signature_validity());
//!
//! if let Some(ext) = header.extended_header() {
//!     println!("Update partition version: {}", ext.upp_version);
//! }
//! # Ok(())
//! # }
//! ```

use self::header::{
    CardAttribute, CardHeaderRaw, CardSize, ExtendedHeader, HEADER_MAGIC, SIGNATURE_SIZE,
};
use self::initial_data::{CardInitialDataRaw, InitialData, decrypt_title_key};
use self::keys::KeySet;
use nxcard_storage::{Storage, StorageError, SubStorage};
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha2::{Digest, Sha256};
use snafu::{ResultExt, Snafu, ensure};
use std::fmt;
use tracing::{debug, warn};
use zerocopy::{FromZeros, IntoBytes};

pub use self::initial_data::TitleKeyError;

use read_error::*;

pub mod header;
pub mod initial_data;
pub mod keys;

/// Size of the key area that may precede the card header.
const KEY_AREA_SIZE: u64 = 0x1000;

/// Where the header magic sits when a key area precedes the header.
const KEY_AREA_PROBE_OFFSET: u64 = KEY_AREA_SIZE + SIGNATURE_SIZE as u64;

/// Outcome of an integrity check that does not abort parsing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Validity {
    /// The check could not be performed.
    #[default]
    Unchecked,
    Invalid,
    Valid,
}

impl Validity {
    fn from_match(matched: bool) -> Self {
        if matched { Self::Valid } else { Self::Invalid }
    }

    #[must_use]
    pub const fn is_valid(self) -> bool {
        matches!(self, Self::Valid)
    }
}

impl fmt::Display for Validity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unchecked => "Unchecked",
            Self::Invalid => "Invalid",
            Self::Valid => "Valid",
        })
    }
}

/// Partitions of a game card file system.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PartitionType {
    Update,
    Normal,
    Secure,
    Logo,
    Root,
}

impl PartitionType {
    pub const ALL: [Self; 5] = [
        Self::Update,
        Self::Normal,
        Self::Secure,
        Self::Logo,
        Self::Root,
    ];

    /// Returns the name of the partition inside the root partition.
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Normal => "normal",
            Self::Secure => "secure",
            Self::Logo => "logo",
            Self::Root => "root",
        }
    }
}

impl fmt::Display for PartitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// A parsed and verified game card header.
///
/// Built in one pass by [`XciHeader::read()`] and immutable afterwards.
#[must_use]
pub struct XciHeader {
    signature: [u8; SIGNATURE_SIZE],
    rom_area_start_page: u32,
    backup_area_start_page: u32,
    kek_index: u8,
    title_key_dec_index: u8,
    card_size: CardSize,
    header_version: u8,
    attributes: CardAttribute,
    package_id: u64,
    valid_data_end_page: u64,
    iv: [u8; 16],
    root_partition_offset: u64,
    root_partition_header_size: u64,
    root_partition_header_hash: [u8; 32],
    initial_data_hash: [u8; 32],
    sel_sec: u32,
    sel_t1_key: u32,
    sel_key: u32,
    lim_area_page: u32,
    extended_header: Option<ExtendedHeader>,
    image_hash: [u8; 32],
    signature_validity: Validity,
    partition_header_validity: Validity,
    initial_data_validity: Validity,
    initial_data: Option<InitialData>,
}

impl fmt::Debug for XciHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XciHeader")
            .field("package_id", &self.package_id)
            .field("card_size", &self.card_size)
            .field("kek_index", &self.kek_index)
            .field("signature_validity", &self.signature_validity)
            .field("partition_header_validity", &self.partition_header_validity)
            .field("initial_data_validity", &self.initial_data_validity)
            .field("is_header_decrypted", &self.is_header_decrypted())
            .field("initial_data", &self.initial_data)
            .finish_non_exhaustive()
    }
}

impl XciHeader {
    /// Reads and verifies the card header in `storage`.
    ///
    /// `storage` may hold the key area followed by the header, or start
    /// directly with the header. Keys are optional: without a header key the
    /// extended header is `None`, and without a matching KEK the title key is
    /// `None`.
    ///
    /// # Errors
    ///
    /// Fails with [`ReadError::InvalidContainer`] if the header magic is
    /// wrong, and with a storage error if a required region cannot be read.
    /// Hash and signature mismatches are not errors.
    pub fn read<S: Storage>(storage: &S, keys: Option<&KeySet>) -> Result<Self, ReadError> {
        let public_key = keys::xci_header_public_key().context(LoadPublicKeyFailedSnafu)?;

        Self::read_with_public_key(storage, keys, &public_key)
    }

    /// Like [`read()`](Self::read), but verifies the signature with
    /// `public_key` instead of the retail header key.
    pub fn read_with_public_key<S: Storage>(
        storage: &S,
        keys: Option<&KeySet>,
        public_key: &RsaPublicKey,
    ) -> Result<Self, ReadError> {
        let (key_area, body) = split_storage(storage)?;
        let initial_data = key_area.as_ref().map(read_initial_data).transpose()?;

        // Check the magic before anything else so a short or foreign body is
        // always reported as an invalid container.
        let mut magic = [0u8; 4];
        body.read(SIGNATURE_SIZE as u64, &mut magic)
            .context(ReadFailedSnafu {
                region: "header magic",
            })?;
        let magic = u32::from_le_bytes(magic);
        ensure!(magic == HEADER_MAGIC, InvalidContainerSnafu { magic });

        let mut raw = CardHeaderRaw::new_zeroed();
        body.read(0, raw.as_mut_bytes()).context(ReadFailedSnafu {
            region: "card header",
        })?;

        let image_hash: [u8; 32] = Sha256::digest(raw.signed_data()).into();
        let signature_validity = Validity::from_match(
            public_key
                .verify(Pkcs1v15Sign::new::<Sha256>(), &image_hash, &raw.signature)
                .is_ok(),
        );
        if signature_validity == Validity::Invalid {
            warn!("card header signature is invalid");
        }

        let kek_index = raw.key_index >> 4;
        let mut iv = raw.iv;
        iv.reverse();

        let extended_header = keys
            .and_then(KeySet::header_key)
            .map(|key| ExtendedHeader::decrypt(&raw.encrypted_data, key, &iv));
        if extended_header.is_none() {
            debug!("no header key, extended header left encrypted");
        }

        let root_partition_offset = raw.root_partition_offset.get();
        let root_partition_header_size = raw.root_partition_header_size.get();
        let partition_header_validity = check_partition_header(
            &body,
            root_partition_offset,
            root_partition_header_size,
            &raw.root_partition_header_hash,
            extended_header.as_ref().map_or(0, |h| h.compatibility_type),
        )?;

        let initial_data_validity = match &initial_data {
            Some(data) => {
                let hash: [u8; 32] = Sha256::digest(data.as_bytes()).into();
                let validity = Validity::from_match(hash == raw.initial_data_hash);
                if validity == Validity::Invalid {
                    warn!("card initial data hash mismatch");
                }
                validity
            }
            None => Validity::Unchecked,
        };

        let initial_data = initial_data.map(|data| {
            let title_key = keys.and_then(|keys| unwrap_title_key(&data, kek_index, keys));
            InitialData::new(data, title_key)
        });

        Ok(Self {
            signature: raw.signature,
            rom_area_start_page: raw.rom_area_start_page.get(),
            backup_area_start_page: raw.backup_area_start_page.get(),
            kek_index,
            title_key_dec_index: raw.key_index & 7,
            card_size: CardSize::from_raw(raw.card_size),
            header_version: raw.header_version,
            attributes: CardAttribute::from_bits_retain(raw.flags),
            package_id: raw.package_id.get(),
            valid_data_end_page: raw.valid_data_end_page.get(),
            iv,
            root_partition_offset,
            root_partition_header_size,
            root_partition_header_hash: raw.root_partition_header_hash,
            initial_data_hash: raw.initial_data_hash,
            sel_sec: raw.sel_sec.get(),
            sel_t1_key: raw.sel_t1_key.get(),
            sel_key: raw.sel_key.get(),
            lim_area_page: raw.lim_area_page.get(),
            extended_header,
            image_hash,
            signature_validity,
            partition_header_validity,
            initial_data_validity,
            initial_data,
        })
    }

    /// Returns the RSA-2048 signature over the second half of the header.
    #[must_use]
    pub fn signature(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.signature
    }

    #[must_use]
    pub const fn rom_area_start_page(&self) -> u32 {
        self.rom_area_start_page
    }

    #[must_use]
    pub const fn backup_area_start_page(&self) -> u32 {
        self.backup_area_start_page
    }

    /// Returns the index of the title key KEK.
    #[must_use]
    pub const fn kek_index(&self) -> u8 {
        self.kek_index
    }

    #[must_use]
    pub const fn title_key_dec_index(&self) -> u8 {
        self.title_key_dec_index
    }

    #[must_use]
    pub const fn card_size(&self) -> CardSize {
        self.card_size
    }

    #[must_use]
    pub const fn header_version(&self) -> u8 {
        self.header_version
    }

    #[must_use]
    pub const fn attributes(&self) -> CardAttribute {
        self.attributes
    }

    #[must_use]
    pub const fn package_id(&self) -> u64 {
        self.package_id
    }

    #[must_use]
    pub const fn valid_data_end_page(&self) -> u64 {
        self.valid_data_end_page
    }

    /// Returns the extended header IV in cipher order.
    #[must_use]
    pub const fn iv(&self) -> &[u8; 16] {
        &self.iv
    }

    /// Returns the offset of the root partition header within the header
    /// body.
    #[must_use]
    pub const fn root_partition_offset(&self) -> u64 {
        self.root_partition_offset
    }

    #[must_use]
    pub const fn root_partition_header_size(&self) -> u64 {
        self.root_partition_header_size
    }

    #[must_use]
    pub const fn root_partition_header_hash(&self) -> &[u8; 32] {
        &self.root_partition_header_hash
    }

    #[must_use]
    pub const fn initial_data_hash(&self) -> &[u8; 32] {
        &self.initial_data_hash
    }

    #[must_use]
    pub const fn sel_sec(&self) -> u32 {
        self.sel_sec
    }

    #[must_use]
    pub const fn sel_t1_key(&self) -> u32 {
        self.sel_t1_key
    }

    #[must_use]
    pub const fn sel_key(&self) -> u32 {
        self.sel_key
    }

    #[must_use]
    pub const fn lim_area_page(&self) -> u32 {
        self.lim_area_page
    }

    /// Returns the decrypted extended header, if the header key was known.
    #[must_use]
    pub fn extended_header(&self) -> Option<&ExtendedHeader> {
        self.extended_header.as_ref()
    }

    #[must_use]
    pub fn is_header_decrypted(&self) -> bool {
        self.extended_header.is_some()
    }

    /// Returns the SHA-256 of the signed half of the header.
    #[must_use]
    pub const fn image_hash(&self) -> &[u8; 32] {
        &self.image_hash
    }

    #[must_use]
    pub const fn signature_validity(&self) -> Validity {
        self.signature_validity
    }

    #[must_use]
    pub const fn partition_header_validity(&self) -> Validity {
        self.partition_header_validity
    }

    /// Returns [`Validity::Unchecked`] when the image has no key area.
    #[must_use]
    pub const fn initial_data_validity(&self) -> Validity {
        self.initial_data_validity
    }

    /// Returns the card initial data, if the image has a key area.
    #[must_use]
    pub fn initial_data(&self) -> Option<&InitialData> {
        self.initial_data.as_ref()
    }

    /// Returns the unwrapped title key, if any.
    #[must_use]
    pub fn title_key(&self) -> Option<&[u8; 16]> {
        self.initial_data.as_ref().and_then(InitialData::title_key)
    }
}

/// Splits a card image into the optional key area and the header body.
fn split_storage<S: Storage>(
    storage: &S,
) -> Result<(Option<SubStorage<&S>>, SubStorage<&S>), ReadError> {
    let size = storage.size().context(GetSizeFailedSnafu)?;

    if size >= KEY_AREA_PROBE_OFFSET + 4 {
        let mut magic = [0u8; 4];
        storage
            .read(KEY_AREA_PROBE_OFFSET, &mut magic)
            .context(ReadFailedSnafu {
                region: "key area probe",
            })?;

        if u32::from_le_bytes(magic) == HEADER_MAGIC {
            debug!(size, "card image starts with a key area");

            let key_area = storage.slice(0, KEY_AREA_SIZE).context(SliceFailedSnafu)?;
            let body = storage
                .slice(KEY_AREA_SIZE, size - KEY_AREA_SIZE)
                .context(SliceFailedSnafu)?;

            return Ok((Some(key_area), body));
        }
    }

    let body = storage.slice(0, size).context(SliceFailedSnafu)?;

    Ok((None, body))
}

fn read_initial_data<S: Storage>(key_area: &S) -> Result<CardInitialDataRaw, ReadError> {
    let mut raw = CardInitialDataRaw::new_zeroed();

    key_area
        .read(0, raw.as_mut_bytes())
        .context(ReadFailedSnafu {
            region: "card initial data",
        })?;

    Ok(raw)
}

/// Hashes the root partition header, salted with the compatibility type when
/// it is non-zero.
fn check_partition_header<S: Storage>(
    body: &S,
    offset: u64,
    size: u64,
    expected: &[u8; 32],
    compatibility_type: u8,
) -> Result<Validity, ReadError> {
    let Ok(len) = usize::try_from(size) else {
        warn!(offset, size, "root partition header size is not addressable");
        return Ok(Validity::Invalid);
    };

    let data = match body.read_vec(offset, len) {
        Ok(v) => v,
        Err(e) if e.is_out_of_range() => {
            warn!(offset, size, "root partition header is outside the card image");
            return Ok(Validity::Invalid);
        }
        Err(e) => {
            return Err(e).context(ReadFailedSnafu {
                region: "root partition header",
            });
        }
    };

    let mut hasher = Sha256::new();
    hasher.update(&data);
    if compatibility_type != 0 {
        hasher.update([compatibility_type]);
    }
    let actual: [u8; 32] = hasher.finalize().into();

    let validity = Validity::from_match(actual == *expected);
    if validity == Validity::Invalid {
        warn!(offset, size, "root partition header hash mismatch");
    }

    Ok(validity)
}

fn unwrap_title_key(data: &CardInitialDataRaw, kek_index: u8, keys: &KeySet) -> Option<[u8; 16]> {
    match decrypt_title_key(data.as_bytes(), kek_index.into(), keys) {
        Ok(key) => Some(key),
        Err(e) if e.is_precondition_violation() => {
            debug!(kek_index, error = %e, "title key not unwrapped");
            None
        }
        Err(e) => {
            warn!(kek_index, error = %e, "title key unwrap failed");
            None
        }
    }
}

/// Errors when reading an [`XciHeader`].
#[derive(Debug, Snafu)]
#[snafu(module)]
#[non_exhaustive]
pub enum ReadError {
    #[snafu(display("cannot get size of card image"))]
    GetSizeFailed { source: StorageError },

    #[snafu(display("cannot split card image"))]
    SliceFailed { source: StorageError },

    #[snafu(display("cannot read {region}"))]
    ReadFailed {
        region: &'static str,
        source: StorageError,
    },

    #[snafu(display("invalid card header magic {magic:#010x}"))]
    InvalidContainer { magic: u32 },

    #[snafu(display("cannot load header signing key"))]
    LoadPublicKeyFailed { source: rsa::errors::Error },
}
