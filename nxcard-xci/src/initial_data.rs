use crate::keys::{GC_TITLE_KEY_KEK_COUNT, KeySet};
use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, KeyInit};
use ccm::Ccm;
use ccm::aead::AeadInPlace;
use ccm::aead::consts::{U12, U16};
use snafu::{OptionExt, Snafu, ensure};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// AES-128-CCM with a 16-byte tag and a 12-byte nonce.
type TitleKeyCipher = Ccm<Aes128, U16, U12>;

/// Errors when unwrapping the title key from card initial data.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum TitleKeyError {
    #[snafu(display("initial data is {len} bytes, expected {}", CardInitialDataRaw::SIZE))]
    InvalidInitialDataLength { len: usize },

    #[snafu(display("KEK index {kek_index} is out of range"))]
    KekIndexOutOfRange { kek_index: usize },

    #[snafu(display("title key KEK {kek_index} is not present"))]
    KekNotPresent { kek_index: usize },

    #[snafu(display("initial data padding is not filled with zero"))]
    NotFilledWithZero,

    #[snafu(display("title key authentication failed with KEK {kek_index}"))]
    KekIndexMismatch { kek_index: usize },
}

impl TitleKeyError {
    /// Returns `true` if the unwrap was not applicable to its inputs, as
    /// opposed to the record failing an integrity or authentication check.
    #[must_use]
    pub fn is_precondition_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidInitialDataLength { .. }
                | Self::KekIndexOutOfRange { .. }
                | Self::KekNotPresent { .. }
        )
    }
}

#[derive(Debug, Clone, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct CardInitialDataRaw {
    pub package_id: [u8; 8],   // 0x00 - with reserved, the ECB-wrapped key source
    pub reserved: [u8; 8],     // 0x08
    pub auth_data: [u8; 0x10], // 0x10 - CCM ciphertext of the title key
    pub auth_mac: [u8; 0x10],  // 0x20 - CCM tag
    pub auth_nonce: [u8; 0xC], // 0x30
    pub padding: [u8; 0x1C4],  // 0x3C - must be zero
                               // 0x200 - end of record
}

impl CardInitialDataRaw {
    pub const SIZE: usize = size_of::<Self>();

    /// Returns the encrypted block that the title key KEK unwraps into the
    /// CCM key.
    #[must_use]
    pub fn key_source(&self) -> &[u8] {
        &self.as_bytes()[..0x10]
    }
}

/// Card initial data from the key area, plus the title key when it could be
/// unwrapped.
#[derive(Clone)]
pub struct InitialData {
    raw: CardInitialDataRaw,
    title_key: Option<[u8; 16]>,
}

impl InitialData {
    pub(crate) fn new(raw: CardInitialDataRaw, title_key: Option<[u8; 16]>) -> Self {
        Self { raw, title_key }
    }

    #[must_use]
    pub fn package_id(&self) -> &[u8; 8] {
        &self.raw.package_id
    }

    #[must_use]
    pub fn auth_data(&self) -> &[u8; 0x10] {
        &self.raw.auth_data
    }

    #[must_use]
    pub fn auth_mac(&self) -> &[u8; 0x10] {
        &self.raw.auth_mac
    }

    #[must_use]
    pub fn auth_nonce(&self) -> &[u8; 0xC] {
        &self.raw.auth_nonce
    }

    /// Returns the decrypted title key.
    #[must_use]
    pub fn title_key(&self) -> Option<&[u8; 16]> {
        self.title_key.as_ref()
    }

    /// Returns the whole 0x200-byte record as stored on the card.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.raw.as_bytes()
    }

    #[must_use]
    pub fn raw(&self) -> &CardInitialDataRaw {
        &self.raw
    }
}

impl std::fmt::Debug for InitialData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitialData")
            .field("package_id", &hex::encode(self.raw.package_id))
            .field("has_title_key", &self.title_key.is_some())
            .finish_non_exhaustive()
    }
}

/// Unwraps the title key from a raw card initial data record.
///
/// The KEK at `kek_index` decrypts the first block of the record (AES-ECB)
/// into a CCM key, which then authenticates and decrypts the auth data into
/// the title key. The result depends only on the inputs.
pub fn decrypt_title_key(
    initial_data: &[u8],
    kek_index: usize,
    keys: &KeySet,
) -> Result<[u8; 16], TitleKeyError> {
    let len = initial_data.len();
    ensure!(
        len == CardInitialDataRaw::SIZE,
        InvalidInitialDataLengthSnafu { len }
    );
    ensure!(
        kek_index < GC_TITLE_KEY_KEK_COUNT,
        KekIndexOutOfRangeSnafu { kek_index }
    );

    let kek = keys
        .title_key_kek(kek_index)
        .context(KekNotPresentSnafu { kek_index })?;
    let data = CardInitialDataRaw::ref_from_bytes(initial_data)
        .map_err(|_| InvalidInitialDataLengthSnafu { len }.build())?;

    let mut key = GenericArray::clone_from_slice(data.key_source());
    Aes128::new(GenericArray::from_slice(kek)).decrypt_block(&mut key);

    ensure!(data.padding.iter().all(|&b| b == 0), NotFilledWithZeroSnafu);

    let mut title_key = data.auth_data;
    TitleKeyCipher::new(&key)
        .decrypt_in_place_detached(
            GenericArray::from_slice(&data.auth_nonce),
            &[],
            &mut title_key,
            GenericArray::from_slice(&data.auth_mac),
        )
        .map_err(|_| KekIndexMismatchSnafu { kek_index }.build())?;

    Ok(title_key)
}
