use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Serial port of the device (overrides the config file; found by USB ID
    /// when neither names one)
    #[arg(short, long, value_name = "PORT")]
    pub port: Option<String>,

    /// Baud rate; the USB link ignores it but some hosts insist on one
    #[arg(short, long, value_name = "BAUD")]
    pub baud_rate: Option<u32>,

    /// How long to wait for response bytes, in milliseconds
    #[arg(short, long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List serial ports
    Ports,
    /// Set pin directions (1 = input)
    Io {
        #[arg(value_parser = parse_byte)]
        mask: u8,
    },
    /// Drive the output pins
    Set {
        #[arg(value_parser = parse_byte)]
        value: u8,
    },
    /// Sample the input pins, then drive the output pins
    Get {
        #[arg(value_parser = parse_byte, default_value = "0")]
        value: u8,
    },
    /// Read the status latch
    Status,
    /// Clear the status latch
    Clear,
    /// Reset the JTAG TAP and read its IDCODE
    Idcode,
    /// Erase, program and verify a MachXO2 from a JEDEC fuse file
    Program {
        #[arg(value_name = "FILE.jed")]
        file: PathBuf,
    },
    /// Send raw command bytes
    Raw {
        #[arg(value_parser = parse_byte, required = true)]
        bytes: Vec<u8>,
        /// Number of response bytes to wait for
        #[arg(short, long, default_value_t = 0)]
        read: usize,
    },
}

/// Parse a byte written in decimal, `0x` hex or `0b` binary.
pub fn parse_byte(s: &str) -> Result<u8, String> {
    let s = s.trim().replace('_', "");
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16)
    } else if let Some(bin) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
        u8::from_str_radix(bin, 2)
    } else {
        s.parse()
    };
    parsed.map_err(|e| format!("`{s}` is not a byte: {e}"))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn bytes_accept_prefixes() {
        assert_eq!(parse_byte("42"), Ok(42));
        assert_eq!(parse_byte("0x3f"), Ok(0x3f));
        assert_eq!(parse_byte("0b000_111"), Ok(0b111));
        assert!(parse_byte("0x100").is_err());
        assert!(parse_byte("pins").is_err());
    }

    #[test]
    fn raw_takes_bytes_and_read_count() {
        let cli = Cli::try_parse_from(["shifty", "-p", "/dev/ttyACM0", "raw", "0x21", "--read", "1"])
            .unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(
            cli.command,
            Command::Raw {
                bytes: vec![0x21],
                read: 1
            }
        );
    }

    #[test]
    fn program_takes_a_fuse_file() {
        let cli = Cli::try_parse_from(["shifty", "program", "blinky.jed"]).unwrap();
        assert_eq!(cli.port, None);
        assert_eq!(
            cli.command,
            Command::Program {
                file: PathBuf::from("blinky.jed")
            }
        );
        assert!(Cli::try_parse_from(["shifty", "program"]).is_err());
    }

    #[test]
    fn get_defaults_to_driving_zero() {
        let cli = Cli::try_parse_from(["shifty", "-vv", "get"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.command, Command::Get { value: 0 });
    }
}
