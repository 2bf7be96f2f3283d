use nxcard_storage::DuplexBitmap;
use nxcard_util::{LoadKeysError, OpenImageError, TrimDuplexError, load_keys, open_image, trim_duplex};
use nxcard_xci::{ReadError, Validity};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

fn temp_file(data: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(data).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn load_keys_from_explicit_path() {
    let file = temp_file(b"xci_header_key = 0102030405060708090a0b0c0d0e0f10\n");

    let keys = load_keys(Some(file.path())).unwrap().unwrap();

    assert_eq!(keys.header_key().unwrap()[0], 0x01);
}

#[test]
fn explicit_missing_key_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prod.keys");

    let err = load_keys(Some(&path)).unwrap_err();

    assert!(matches!(err, LoadKeysError::OpenKeyFile { .. }));
}

#[test]
fn malformed_key_file_names_the_file() {
    let file = temp_file(b"xci_header_key = zz\n");

    let err = load_keys(Some(file.path())).unwrap_err();

    assert!(matches!(err, LoadKeysError::ParseKeyFile { ref path, .. } if path == file.path()));
}

#[test]
fn open_image_parses_header_without_keys() {
    let mut body = vec![0u8; 0x200];
    body[0x100..0x104].copy_from_slice(b"HEAD");
    body[0x10D] = 0xE1;
    let file = temp_file(&body);

    let image = unsafe { open_image(file.path(), None) }.unwrap();

    assert_eq!(image.header.card_size().capacity_name(), "16 GB");
    assert_eq!(image.header.signature_validity(), Validity::Invalid);
    assert!(image.header.extended_header().is_none());
}

#[test]
fn open_image_rejects_foreign_files() {
    let file = temp_file(&[0x7F; 0x400]);

    let err = unsafe { open_image(file.path(), None) }.unwrap_err();

    assert!(matches!(
        err,
        OpenImageError::ParseHeader {
            source: ReadError::InvalidContainer { .. }
        }
    ));
}

#[test]
fn open_image_reports_missing_file() {
    let err = unsafe { open_image(Path::new("/nonexistent/game.xci"), None) }.unwrap_err();

    assert!(matches!(err, OpenImageError::OpenFile { .. }));
}

#[test]
fn trim_duplex_scrubs_inactive_blocks_on_disk() {
    let bitmap = temp_file(&DuplexBitmap::from_bits([false, true]).to_bytes());
    let data_a = temp_file(&[0xAA; 32]);
    let data_b = temp_file(&[0xBB; 32]);

    let blocks = trim_duplex(bitmap.path(), data_a.path(), data_b.path(), 16, 0xEE).unwrap();

    let a = std::fs::read(data_a.path()).unwrap();
    let b = std::fs::read(data_b.path()).unwrap();
    assert_eq!(blocks, 2);
    assert!(a[..16].iter().all(|&x| x == 0xAA));
    assert!(a[16..].iter().all(|&x| x == 0xEE));
    assert!(b[..16].iter().all(|&x| x == 0xEE));
    assert!(b[16..].iter().all(|&x| x == 0xBB));
}

#[test]
fn trim_duplex_validates_bitmap_size() {
    let bitmap = temp_file(&[0]);
    let data_a = temp_file(&[0; 0x100]);
    let data_b = temp_file(&[0; 0x100]);

    let err = trim_duplex(bitmap.path(), data_a.path(), data_b.path(), 16, 0).unwrap_err();

    assert!(matches!(err, TrimDuplexError::OpenDuplex { .. }));
}
