//! Library for inspecting game card images and maintaining duplex save
//! storages.
//!
//! This crate glues the storage and header crates to files on disk: card
//! images are memory-mapped, key files are located and parsed, and the
//! three files of a duplex storage are opened and trimmed.
//!
//! # Example
//!
//! ```no_run
//! use nxcard_util::{load_keys, open_image};
//!
//! let keys = load_keys(None).expect("failed to load keys");
//! let image = unsafe { open_image("game.xci".as_ref(), keys.as_ref()) }.expect("failed to open image");
//! println!("Package ID: {:016X}", image.header.package_id());
//! ```

use nxcard_storage::duplex::{self, DuplexStorage};
use nxcard_storage::{FileStorage, ReadOnlyStorage, Storage, StorageError};
use nxcard_xci::XciHeader;
use nxcard_xci::keys::{self, KeySet};
use snafu::{ResultExt, Snafu};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Errors that can occur when opening a card image from disk.
#[derive(Debug, Snafu)]
pub enum OpenImageError {
    #[snafu(display("failed to open file"))]
    OpenFile { source: std::io::Error },

    #[snafu(display("failed to memory map file"))]
    MmapFile { source: std::io::Error },

    #[snafu(display("failed to parse card header"))]
    ParseHeader { source: nxcard_xci::ReadError },
}

/// Errors that can occur when loading a key file.
#[derive(Debug, Snafu)]
pub enum LoadKeysError {
    #[snafu(display("failed to open key file '{}'", path.display()))]
    OpenKeyFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to parse key file '{}'", path.display()))]
    ParseKeyFile {
        path: PathBuf,
        source: keys::LoadError,
    },
}

/// Errors that can occur when trimming a duplex storage.
#[derive(Debug, Snafu)]
pub enum TrimDuplexError {
    #[snafu(display("failed to open '{}'", path.display()))]
    OpenStorage {
        path: PathBuf,
        source: StorageError,
    },

    #[snafu(display("failed to open duplex storage"))]
    OpenDuplex { source: duplex::OpenError },

    #[snafu(display("failed to trim duplex storage"))]
    Trim { source: StorageError },

    #[snafu(display("failed to flush duplex storage"))]
    Flush { source: StorageError },
}

/// A memory-mapped card image and its parsed header.
#[derive(Debug)]
pub struct CardImage {
    pub storage: ReadOnlyStorage<memmap2::Mmap>,
    pub header: XciHeader,
}

/// Opens a card image from disk using a memory-mapped read.
///
/// # Safety
///
/// This function uses `unsafe` internally to create a memory map. The caller
/// must ensure the file is not modified or truncated while the returned
/// [`CardImage`] is in use.
pub unsafe fn open_image(path: &Path, keys: Option<&KeySet>) -> Result<CardImage, OpenImageError> {
    let file = File::open(path).context(OpenFileSnafu)?;
    let raw = unsafe { memmap2::Mmap::map(&file).context(MmapFileSnafu)? };
    let storage = ReadOnlyStorage::new(raw);
    let header = XciHeader::read(&storage, keys).context(ParseHeaderSnafu)?;

    Ok(CardImage { storage, header })
}

/// Returns `$HOME/.switch/prod.keys`.
#[must_use]
pub fn default_key_path() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    Some(PathBuf::from(home).join(".switch").join("prod.keys"))
}

/// Loads keys from `path`, or from [`default_key_path()`] when `path` is
/// `None`.
///
/// A missing default key file is not an error and yields `Ok(None)`; an
/// explicitly given file must exist.
pub fn load_keys(path: Option<&Path>) -> Result<Option<KeySet>, LoadKeysError> {
    let path = match path {
        Some(v) => v.to_path_buf(),
        None => match default_key_path() {
            Some(v) if v.is_file() => v,
            _ => {
                debug!("no key file found, continuing without keys");
                return Ok(None);
            }
        },
    };

    let file = File::open(&path).context(OpenKeyFileSnafu { path: &path })?;
    let keys = KeySet::load(BufReader::new(file)).context(ParseKeyFileSnafu { path: &path })?;

    info!(path = %path.display(), "loaded keys");

    Ok(Some(keys))
}

/// Scrubs the inactive copy of a duplex storage kept in three files.
///
/// Returns the number of blocks that were trimmed.
pub fn trim_duplex(
    bitmap: &Path,
    data_a: &Path,
    data_b: &Path,
    block_size: u64,
    fill: u8,
) -> Result<u64, TrimDuplexError> {
    let open = |path: &Path| FileStorage::open(path).context(OpenStorageSnafu { path });

    let storage = DuplexStorage::new(open(bitmap)?, open(data_a)?, open(data_b)?, block_size)
        .context(OpenDuplexSnafu)?
        .with_trim_fill(fill);

    storage.trim().context(TrimSnafu)?;
    storage.flush().context(FlushSnafu)?;

    let blocks = storage.size().context(TrimSnafu)?.div_ceil(block_size);
    info!(blocks, block_size, "trimmed duplex storage");

    Ok(blocks)
}
