//! Driver for the STM32 ROM UART bootloader and the firmware flashing flow
//! built on top of it.
//!
//! The target lands in the ROM bootloader when NRST is released while BOOT0
//! is held high. BOOT0 is operator-controlled; NRST is pulsed through the
//! RTS line, which is AC-coupled to the pin with a 100 nF cap.

use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use num_enum::IntoPrimitive;

use crate::checksum::xor_sum;
use crate::error::Step;
use crate::serial::SerialPort;
use crate::Error;

/// Single-byte bootloader responses.
pub const ACK: u8 = 0x79;
pub const NACK: u8 = 0x1F;

/// Auto-baud synchronization byte.
const SYNC: u8 = 0x7F;

/// Largest block the Write Memory command accepts.
pub const MAX_BLOCK_SIZE: usize = 256;

/// Default load address of a firmware image (start of internal flash).
pub const DEFAULT_BASE_ADDR: u32 = 0x0800_0000;

/// Deadline for every ACK read.
const ACK_TIMEOUT: Duration = Duration::from_secs(1);

/// Delay after releasing NRST before the target is responsive.
const SETTLE_DELAY: Duration = Duration::from_millis(50);

/// The bootloader commands the flashing flow uses. Each goes on the wire as
/// `[cmd, cmd ^ 0xFF]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[repr(u8)]
enum Command {
    /// Jumps to application code at a given address.
    Go = 0x21,
    /// Writes up to 256 bytes starting at a given address.
    WriteMemory = 0x31,
    /// Erases flash pages using two-byte addressing mode.
    ExtendedErase = 0x44,
}

/// Holds NRST low for `duration`, then releases it.
///
/// Callers wait out their own settling delay after the release.
pub fn pulse_nrst<P: SerialPort>(port: &mut P, duration: Duration) -> Result<(), Error> {
    debug!("pulsing NRST for {:?}", duration);
    port.set_rts(false)?; // NRST asserted (low)
    thread::sleep(duration);
    port.set_rts(true)?; // NRST released
    Ok(())
}

/// Stop-and-wait client for the ROM bootloader. ACK failures surface
/// immediately with the step that failed; there are no retries.
pub struct Bootloader<P> {
    port: P,
}

impl<P: SerialPort> Bootloader<P> {
    pub fn new(port: P) -> Self {
        Bootloader { port }
    }

    /// Consumes the client and hands the port back.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Pulses NRST and performs the auto-baud sync handshake.
    ///
    /// Fails with `SyncFailed` when the target answers with anything other
    /// than ACK, or not at all. Commonly cured by raising BOOT0 and
    /// retrying.
    pub fn enter_bootloader(&mut self) -> Result<(), Error> {
        pulse_nrst(&mut self.port, Duration::from_millis(20))?;
        thread::sleep(SETTLE_DELAY);

        debug!("sending auto-baud sync byte");
        self.port.write_all(&[SYNC])?;

        let mut response = [0u8; 1];
        match self.port.read_exact(&mut response, ACK_TIMEOUT) {
            Ok(()) if response[0] == ACK => {
                debug!("bootloader synchronized");
                Ok(())
            }
            Ok(()) => Err(Error::SyncFailed(Some(response[0]))),
            Err(Error::Timeout { .. }) => Err(Error::SyncFailed(None)),
            Err(e) => Err(e),
        }
    }

    /// Erases the entire flash with the Extended Erase global selector.
    pub fn mass_erase(&mut self) -> Result<(), Error> {
        info!("performing global flash erase");
        self.send_command(Command::ExtendedErase, Step::ExtendedErase)?;

        // 0xFFFF selects global erase; its XOR reduction is 0x00.
        self.send_with_checksum(&[0xFF, 0xFF], Step::GlobalErase)
    }

    /// Writes `data` to `addr`. Blocks are limited to 256 bytes.
    pub fn write_block(&mut self, addr: u32, data: &[u8]) -> Result<(), Error> {
        if data.len() > MAX_BLOCK_SIZE {
            return Err(Error::BlockTooLarge(data.len()));
        }
        if data.is_empty() {
            warn!("empty write block, doing nothing");
            return Ok(());
        }

        debug!("writing {} bytes at {:#010x}", data.len(), addr);
        self.send_command(Command::WriteMemory, Step::WriteMemory)?;
        self.send_with_checksum(&addr.to_be_bytes(), Step::Address)?;

        let mut block = Vec::with_capacity(data.len() + 1);
        block.push((data.len() - 1) as u8);
        block.extend_from_slice(data);
        self.send_with_checksum(&block, Step::Data)
    }

    /// Jumps to the application at `addr`.
    pub fn go(&mut self, addr: u32) -> Result<(), Error> {
        info!("starting application at {:#010x}", addr);
        self.send_command(Command::Go, Step::Go)?;
        self.send_with_checksum(&addr.to_be_bytes(), Step::GoAddress)
    }

    /// Sends `[cmd, cmd ^ 0xFF]` and waits for the ACK.
    fn send_command(&mut self, cmd: Command, step: Step) -> Result<(), Error> {
        let byte = u8::from(cmd);
        debug!("sending command {:?}: [{:02X}, {:02X}]", cmd, byte, !byte);
        self.port.write_all(&[byte, !byte])?;
        self.read_ack(step)
    }

    /// Sends `data` followed by its XOR checksum and waits for the ACK.
    fn send_with_checksum(&mut self, data: &[u8], step: Step) -> Result<(), Error> {
        let mut buf = Vec::with_capacity(data.len() + 1);
        buf.extend_from_slice(data);
        buf.push(xor_sum(data));
        self.port.write_all(&buf)?;
        self.read_ack(step)
    }

    fn read_ack(&mut self, step: Step) -> Result<(), Error> {
        let mut byte = [0u8; 1];
        self.port.read_exact(&mut byte, ACK_TIMEOUT)?;

        if byte[0] != ACK {
            if byte[0] == NACK {
                debug!("{} rejected with NACK", step);
            }
            return Err(Error::NotAcked {
                step,
                got: byte[0],
            });
        }

        Ok(())
    }
}

/// Flashes the image at `image_path` onto the target: reset into the
/// bootloader, global erase, program in 256-byte pages, then jump to the
/// image at `base_addr`.
///
/// Any failure aborts the flow with the original error and leaves the
/// device in whatever state the failing step produced; a full retry is
/// required afterwards.
pub fn flash_image<P: SerialPort>(
    port: &mut P,
    image_path: &Path,
    base_addr: u32,
) -> Result<(), Error> {
    let image = fs::read(image_path)?;
    info!(
        "flashing {} byte image from {} at {:#010x}",
        image.len(),
        image_path.display(),
        base_addr
    );

    pulse_nrst(port, Duration::from_millis(50))?;
    thread::sleep(SETTLE_DELAY);

    let mut boot = Bootloader::new(&mut *port);
    boot.enter_bootloader()?;
    boot.mass_erase()?;

    for (index, page) in image.chunks(MAX_BLOCK_SIZE).enumerate() {
        let addr = base_addr + (index * MAX_BLOCK_SIZE) as u32;
        boot.write_block(addr, page)?;
    }

    boot.go(base_addr)
}
