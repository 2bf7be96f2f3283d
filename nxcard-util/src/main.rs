mod cli;

use clap::Parser;
use cli::{Cli, Command};
use nxcard_xci::XciHeader;
use snafu::{ResultExt, Snafu};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Top-level application errors for nxcard-util.
#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to load keys"))]
    LoadKeys {
        source: nxcard_util::LoadKeysError,
    },

    #[snafu(display("failed to open card image '{}'", path.display()))]
    OpenImage {
        path: PathBuf,
        source: nxcard_util::OpenImageError,
    },

    #[snafu(display("failed to trim duplex storage"))]
    TrimDuplex {
        source: nxcard_util::TrimDuplexError,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[snafu::report]
fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    match cli.command {
        Command::Info { xci_path, keys } => cmd_info(&xci_path, keys.as_deref()),
        Command::DuplexTrim {
            bitmap,
            data_a,
            data_b,
            block_size,
            fill,
        } => cmd_duplex_trim(&bitmap, &data_a, &data_b, block_size, fill),
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn cmd_info(path: &Path, key_path: Option<&Path>) -> Result<()> {
    let keys = nxcard_util::load_keys(key_path).context(LoadKeysSnafu)?;
    let image = unsafe { nxcard_util::open_image(path, keys.as_ref()).context(OpenImageSnafu { path })? };
    let header = &image.header;

    println!("XCI: {}", path.display());
    println!();
    print_header(header);

    if let Some(ext) = header.extended_header() {
        println!();
        println!("Extended Header:");
        println!("  FW Version:       0x{:016X}", ext.fw_version);
        println!("  Clock Rate:       {}", ext.clock_rate);
        println!("  Wait Read:        {} / {}", ext.wait1_time_read, ext.wait2_time_read);
        println!("  Wait Write:       {} / {}", ext.wait1_time_write, ext.wait2_time_write);
        println!("  FW Mode:          0x{:08X}", ext.fw_mode);
        println!("  Update Version:   {}", ext.upp_version);
        println!("  Compat Type:      {}", ext.compatibility_type);
        println!("  Update Hash:      {}", hex::encode_upper(ext.upp_hash));
        println!("  Update ID:        {:016X}", ext.upp_id);
    }

    if let Some(data) = header.initial_data() {
        println!();
        println!("Initial Data ({}):", header.initial_data_validity());
        println!("  Package ID:       {}", hex::encode_upper(data.package_id()));
        println!("  Auth Data:        {}", hex::encode_upper(data.auth_data()));
        println!("  Auth MAC:         {}", hex::encode_upper(data.auth_mac()));
        println!("  Auth Nonce:       {}", hex::encode_upper(data.auth_nonce()));
        match data.title_key() {
            Some(key) => println!("  Title Key:        {}", hex::encode_upper(key)),
            None => println!("  Title Key:        (unavailable)"),
        }
    }

    Ok(())
}

fn print_header(header: &XciHeader) {
    println!("Signature:          {}", header.signature_validity());
    println!("Package ID:         {:016X}", header.package_id());
    println!(
        "Card Size:          {} (0x{:02X})",
        header.card_size(),
        header.card_size().raw()
    );
    println!("Header Version:     {}", header.header_version());
    println!("Attributes:         {}", header.attributes());
    println!("KEK Index:          {}", header.kek_index());
    println!("Title Key Index:    {}", header.title_key_dec_index());
    println!("ROM Area Start:     0x{:X}", header.rom_area_start_page());
    println!("Backup Area Start:  0x{:X}", header.backup_area_start_page());
    println!("Valid Data End:     0x{:X}", header.valid_data_end_page());
    println!("Limit Area:         0x{:X}", header.lim_area_page());
    println!(
        "Selectors:          sec={} t1_key={} key={}",
        header.sel_sec(),
        header.sel_t1_key(),
        header.sel_key()
    );
    println!("IV:                 {}", hex::encode_upper(header.iv()));
    println!("Image Hash:         {}", hex::encode_upper(header.image_hash()));
    println!(
        "Root Partition:     offset 0x{:X}, {} bytes ({})",
        header.root_partition_offset(),
        header.root_partition_header_size(),
        header.partition_header_validity()
    );
}

fn cmd_duplex_trim(
    bitmap: &Path,
    data_a: &Path,
    data_b: &Path,
    block_size: u64,
    fill: u8,
) -> Result<()> {
    let blocks = nxcard_util::trim_duplex(bitmap, data_a, data_b, block_size, fill)
        .context(TrimDuplexSnafu)?;

    println!("Trimmed {blocks} blocks of {block_size} bytes.");

    Ok(())
}
