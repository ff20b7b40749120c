//! Client for the NVM NOR-flash protocol served by the running firmware.

use std::time::Duration;

use byteorder::{BigEndian, WriteBytesExt};
use log::{debug, info};

use crate::frame::{self, Opcode};
use crate::serial::SerialPort;
use crate::Error;

/// Default request size for chunked section reads.
pub const DEFAULT_CHUNK_SIZE: usize = 256;

/// Deadline for a complete response frame.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Highest address reachable with the protocol's 24-bit addressing.
const MAX_ADDR: u32 = 0x00FF_FFFF;

/// Stop-and-wait client for the framed application protocol. Every request
/// flushes the input buffer first to isolate it from stale device output.
pub struct NvmClient<P> {
    port: P,
}

impl<P: SerialPort> NvmClient<P> {
    pub fn new(port: P) -> Self {
        NvmClient { port }
    }

    /// Consumes the client and hands the port back.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Unlocks flash writes for exactly one write operation.
    pub fn write_enable(&mut self) -> Result<(), Error> {
        info!("enabling NVM writes");
        self.transact(Opcode::WriteEnable, &[], Opcode::Ack)?;
        Ok(())
    }

    /// Locks flash writes again.
    pub fn write_disable(&mut self) -> Result<(), Error> {
        info!("disabling NVM writes");
        self.transact(Opcode::WriteDisable, &[], Opcode::Ack)?;
        Ok(())
    }

    /// Reads `length` bytes starting at `start_addr`, splitting the range
    /// into requests of at most `chunk_size` bytes and returning the
    /// reassembled buffer.
    pub fn read_section(
        &mut self,
        start_addr: u32,
        length: usize,
        chunk_size: usize,
    ) -> Result<Vec<u8>, Error> {
        if chunk_size == 0 {
            return Err(Error::InvalidArgument("chunk size must be non-zero"));
        }
        if chunk_size > std::u16::MAX as usize {
            return Err(Error::InvalidArgument(
                "chunk size exceeds the 16-bit length field",
            ));
        }
        if start_addr as u64 + length as u64 > MAX_ADDR as u64 + 1 {
            return Err(Error::InvalidArgument(
                "read range exceeds 24-bit addressing",
            ));
        }

        info!(
            "reading {} bytes at {:#08x} in chunks of {}",
            length, start_addr, chunk_size
        );

        let mut data = Vec::with_capacity(length);
        let mut offset = 0;

        while offset < length {
            let size = chunk_size.min(length - offset);

            let mut request = Vec::with_capacity(5);
            request.write_u24::<BigEndian>(start_addr + offset as u32)?;
            request.write_u16::<BigEndian>(size as u16)?;

            let chunk = self.transact(Opcode::ReadData, &request, Opcode::Data)?;
            data.extend_from_slice(&chunk);
            offset += size;
        }

        Ok(data)
    }

    /// One stop-and-wait exchange: flush stale input, send the request,
    /// read and validate the response frame.
    fn transact(
        &mut self,
        cmd: Opcode,
        payload: &[u8],
        expected: Opcode,
    ) -> Result<Vec<u8>, Error> {
        self.port.reset_input_buffer()?;
        self.port.write_all(&frame::build(cmd, payload))?;

        let raw = frame::read_frame(&mut self.port, RESPONSE_TIMEOUT)?;
        let (opcode, body) = frame::parse(&raw)?;
        if opcode != expected {
            return Err(Error::UnexpectedOpcode(opcode));
        }

        debug!("{} answered with {} payload bytes", cmd, body.len());
        Ok(body.to_vec())
    }
}
