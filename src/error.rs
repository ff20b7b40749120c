use std::fmt;
use std::io;

use thiserror::Error;

use crate::frame::Opcode;

/// The bootloader exchange that expected an ACK.
///
/// ACK failures carry the step they happened at so that a partially
/// programmed device can be diagnosed from the error alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    ExtendedErase,
    GlobalErase,
    WriteMemory,
    Address,
    Data,
    Go,
    GoAddress,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::ExtendedErase => "Extended Erase command",
            Step::GlobalErase => "Global Erase",
            Step::WriteMemory => "Write Memory command",
            Step::Address => "Address",
            Step::Data => "Data block",
            Step::Go => "Go command",
            Step::GoAddress => "Go address",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// The OS refused the device name or the device is absent
    #[error("failed to open serial port {0}: {1}")]
    PortOpen(String, #[source] serialport::Error),

    #[error("serial port is closed")]
    PortClosed,

    #[error("serial device error: {0}")]
    Serial(#[from] serialport::Error),

    /// An I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("timed out waiting for {wanted} bytes (received {got})")]
    Timeout { wanted: usize, got: usize },

    /// The bootloader answered the 0x7F probe with something other than ACK,
    /// or stayed silent
    #[error("bootloader sync failed, expected ACK 0x79, got {0:02X?}")]
    SyncFailed(Option<u8>),

    #[error("{step} not ACKed (got 0x{got:02X})")]
    NotAcked { step: Step, got: u8 },

    #[error("malformed frame: {0}")]
    BadFrame(&'static str),

    #[error("frame CRC mismatch (got 0x{received:04X}, calculated 0x{calculated:04X})")]
    CrcMismatch { received: u16, calculated: u16 },

    #[error("unexpected response opcode: {0}")]
    UnexpectedOpcode(Opcode),

    #[error("write block of {0} bytes exceeds the 256 byte page limit")]
    BlockTooLarge(usize),

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}
