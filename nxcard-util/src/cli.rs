use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "nxcard-util")]
#[command(about = "Game card image and duplex save storage utility", long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Display information about a card image
    Info {
        /// Path to the XCI file
        #[arg(value_name = "XCI_FILE")]
        xci_path: PathBuf,

        /// Key file (defaults to ~/.switch/prod.keys when present)
        #[arg(short, long, value_name = "FILE")]
        keys: Option<PathBuf>,
    },

    /// Scrub the inactive copy of a duplex storage
    DuplexTrim {
        /// Bitmap file
        #[arg(long, value_name = "FILE")]
        bitmap: PathBuf,

        /// Copy A data file
        #[arg(long, value_name = "FILE")]
        data_a: PathBuf,

        /// Copy B data file
        #[arg(long, value_name = "FILE")]
        data_b: PathBuf,

        /// Block size in bytes
        #[arg(long, value_name = "BYTES", value_parser = clap::value_parser!(u64).range(1..))]
        block_size: u64,

        /// Fill byte written over inactive blocks
        #[arg(long, value_name = "BYTE", default_value_t = nxcard_storage::duplex::TRIM_FILL_VALUE)]
        fill: u8,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_info_with_keys() {
        let cli = Cli::try_parse_from(["nxcard-util", "-v", "info", "game.xci", "--keys", "k"]).unwrap();

        assert_eq!(cli.verbose, 1);
        assert!(matches!(
            cli.command,
            Command::Info { ref xci_path, keys: Some(_) } if xci_path == &PathBuf::from("game.xci")
        ));
    }

    #[test]
    fn parses_duplex_trim_with_default_fill() {
        let cli = Cli::try_parse_from([
            "nxcard-util",
            "duplex-trim",
            "--bitmap",
            "bitmap.bin",
            "--data-a",
            "a.bin",
            "--data-b",
            "b.bin",
            "--block-size",
            "16384",
        ])
        .unwrap();

        match cli.command {
            Command::DuplexTrim { block_size, fill, .. } => {
                assert_eq!(block_size, 0x4000);
                assert_eq!(fill, 0);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_zero_block_size() {
        let result = Cli::try_parse_from([
            "nxcard-util",
            "duplex-trim",
            "--bitmap",
            "b",
            "--data-a",
            "a",
            "--data-b",
            "b",
            "--block-size",
            "0",
        ]);

        assert!(result.is_err());
    }
}
