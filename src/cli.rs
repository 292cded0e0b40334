//! CLI argument parsing

use crate::programmers;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use updiprog_core::config::parse_number;

/// Parse a byte count given in hex or decimal
fn parse_len(s: &str) -> Result<usize, String> {
    parse_number(s).map(|n| n as usize)
}

/// Generate dynamic help text for the programmer argument
fn programmer_help() -> String {
    format!(
        "Programmer to use [available: {}]",
        programmers::programmer_names_short()
    )
}

#[derive(Parser)]
#[command(name = "updiprog")]
#[command(author, version, about = "Single-wire UPDI programmer", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Device description file (TOML). Defaults to the ATtiny817 memory map
    #[arg(long, global = true)]
    pub device: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Erase, blank-check, program and verify an Intel-HEX image
    Flash {
        /// Programmer to use
        #[arg(short, long, help = programmer_help())]
        programmer: String,

        /// Intel-HEX file to write
        input: PathBuf,

        /// Skip the verify pass
        #[arg(long)]
        no_verify: bool,

        /// Don't write the fuse bytes of the image
        #[arg(long)]
        no_fuses: bool,
    },

    /// Erase the whole chip
    Erase {
        /// Programmer to use
        #[arg(short, long, help = programmer_help())]
        programmer: String,
    },

    /// Check that the flash is erased
    BlankCheck {
        /// Programmer to use
        #[arg(short, long, help = programmer_help())]
        programmer: String,
    },

    /// Compare flash contents with an Intel-HEX image
    Verify {
        /// Programmer to use
        #[arg(short, long, help = programmer_help())]
        programmer: String,

        /// Intel-HEX file to verify against
        input: PathBuf,
    },

    /// Read flash contents to an Intel-HEX file
    Read {
        /// Programmer to use
        #[arg(short, long, help = programmer_help())]
        programmer: String,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Number of bytes to read (hex or decimal, default: whole flash)
        #[arg(long, value_parser = parse_len)]
        length: Option<usize>,
    },

    /// Show the device signature and fuses
    Info {
        /// Programmer to use
        #[arg(short, long, help = programmer_help())]
        programmer: String,
    },

    /// Write only the fuse bytes of an Intel-HEX image
    Fuses {
        /// Programmer to use
        #[arg(short, long, help = programmer_help())]
        programmer: String,

        /// Intel-HEX file with a fuse segment
        input: PathBuf,
    },

    /// List supported programmers
    ListProgrammers,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flash() {
        let cli = Cli::try_parse_from([
            "updiprog",
            "-vv",
            "flash",
            "-p",
            "dummy",
            "--no-verify",
            "fw.hex",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Flash {
                programmer,
                input,
                no_verify,
                no_fuses,
            } => {
                assert_eq!(programmer, "dummy");
                assert_eq!(input, PathBuf::from("fw.hex"));
                assert!(no_verify);
                assert!(!no_fuses);
            }
            _ => panic!("expected flash"),
        }
    }

    #[test]
    fn test_parse_read_length() {
        let cli = Cli::try_parse_from([
            "updiprog",
            "read",
            "-p",
            "dummy",
            "-o",
            "dump.hex",
            "--length",
            "0x400",
            "--device",
            "tiny.toml",
        ])
        .unwrap();
        assert_eq!(cli.device, Some(PathBuf::from("tiny.toml")));
        match cli.command {
            Commands::Read { length, .. } => assert_eq!(length, Some(1024)),
            _ => panic!("expected read"),
        }
    }

    #[test]
    fn test_programmer_required() {
        assert!(Cli::try_parse_from(["updiprog", "erase"]).is_err());
    }
}
