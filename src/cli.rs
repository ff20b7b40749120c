use std::num::ParseIntError;
use std::path::PathBuf;

use structopt::StructOpt;

#[derive(StructOpt, Debug)]
pub enum Command {
    /// List connected CP2102N serial bridges
    Ports,
    /// Flash a firmware image through the STM32 ROM bootloader
    Flash(FlashOpts),
    /// Talk to the NVM flash through the application protocol
    Nvm(NvmCommand),
}

#[derive(StructOpt, Debug)]
pub struct FlashOpts {
    /// The firmware image (.bin) to flash
    #[structopt(required = true)]
    pub firmware: PathBuf,

    /// Load address of the image, hexadecimal
    #[structopt(
        long = "base-addr",
        default_value = "0x08000000",
        parse(try_from_str = parse_hex_u32)
    )]
    pub base_addr: u32,
}

#[derive(StructOpt, Debug)]
pub enum NvmCommand {
    /// Dump an NVM section to a hexdump file
    Read(NvmReadOpts),
    /// Unlock NVM writes for one write operation
    WriteEnable,
    /// Lock NVM writes
    WriteDisable,
}

#[derive(StructOpt, Debug)]
pub struct NvmReadOpts {
    /// Start address of the section, hexadecimal
    #[structopt(required = true, parse(try_from_str = parse_hex_u32))]
    pub address: u32,

    /// Number of bytes to read
    #[structopt(required = true)]
    pub length: usize,

    /// The file to save the hexdump to (.txt)
    #[structopt(required = true)]
    pub output: PathBuf,

    /// Request size for the chunked read
    #[structopt(long = "chunk-size", default_value = "256")]
    pub chunk_size: usize,
}

#[derive(StructOpt, Debug)]
pub struct Opts {
    #[structopt(subcommand)]
    pub command: Command,

    /// The serial device to connect to; autodetected when omitted
    #[structopt(env = "SERIAL_PORT", short = "p", long = "port")]
    pub serial_port: Option<String>,

    /// The serial baud rate
    #[structopt(
        env = "BAUD_RATE",
        short = "b",
        long = "baud-rate",
        default_value = "115200"
    )]
    pub baud_rate: u32,
}

/// Accepts `0x`-prefixed or bare hexadecimal values.
fn parse_hex_u32(input: &str) -> Result<u32, ParseIntError> {
    let digits = input
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    u32::from_str_radix(digits, 16)
}
