//! Serial transport for the two device protocols.
//!
//! `Port` wraps a `serialport` handle with the read/write discipline the
//! protocol engines need; the `SerialPort` trait is the seam the engines are
//! written against, so tests can substitute a scripted fake device.

use std::io::{self, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use log::debug;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPortSettings, StopBits};

use crate::Error;

/// Sleep between polls while waiting for bytes to arrive.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Byte-stream transport with the modem-control lines the flashing flow
/// needs for NRST.
pub trait SerialPort {
    /// Reads exactly `buf.len()` bytes, accumulating partial reads, or fails
    /// with `Timeout` once `timeout` elapses.
    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), Error>;

    /// Writes every byte of `data` and flushes the OS buffer.
    fn write_all(&mut self, data: &[u8]) -> Result<(), Error>;

    fn set_rts(&mut self, level: bool) -> Result<(), Error>;

    fn set_dtr(&mut self, level: bool) -> Result<(), Error>;

    /// Discards any pending bytes in the OS receive buffer.
    fn reset_input_buffer(&mut self) -> Result<(), Error>;

    /// Discards any bytes the OS has not transmitted yet.
    fn reset_output_buffer(&mut self) -> Result<(), Error>;

    fn bytes_waiting(&mut self) -> Result<usize, Error>;
}

impl<T: SerialPort + ?Sized> SerialPort for &mut T {
    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), Error> {
        (**self).read_exact(buf, timeout)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), Error> {
        (**self).write_all(data)
    }

    fn set_rts(&mut self, level: bool) -> Result<(), Error> {
        (**self).set_rts(level)
    }

    fn set_dtr(&mut self, level: bool) -> Result<(), Error> {
        (**self).set_dtr(level)
    }

    fn reset_input_buffer(&mut self) -> Result<(), Error> {
        (**self).reset_input_buffer()
    }

    fn reset_output_buffer(&mut self) -> Result<(), Error> {
        (**self).reset_output_buffer()
    }

    fn bytes_waiting(&mut self) -> Result<usize, Error> {
        (**self).bytes_waiting()
    }
}

/// A serial port opened with the settings one of the device protocols
/// expects: 8 data bits, 1 stop bit, no flow control, even or no parity.
pub struct Port {
    name: String,
    inner: Option<Box<dyn serialport::SerialPort>>,
}

impl Port {
    /// Opens `name` at `baud` with the given parity and byte timeout.
    ///
    /// DTR and RTS are deasserted and both OS buffers are cleared before the
    /// port is handed to a protocol engine. Parity and baud are fixed for
    /// the lifetime of the port; the bootloader path and the NVM path each
    /// open their own.
    pub fn open(name: &str, baud: u32, parity: Parity, timeout: Duration) -> Result<Port, Error> {
        debug!("opening serial port {} at {} baud", name, baud);

        let settings = SerialPortSettings {
            baud_rate: baud,
            data_bits: DataBits::Eight,
            flow_control: FlowControl::None,
            parity,
            stop_bits: StopBits::One,
            timeout,
        };

        let mut inner = serialport::open_with_settings(name, &settings)
            .map_err(|e| Error::PortOpen(name.to_string(), e))?;

        inner.write_data_terminal_ready(false)?;
        inner.write_request_to_send(false)?;
        inner.clear(ClearBuffer::All)?;

        Ok(Port {
            name: name.to_string(),
            inner: Some(inner),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    /// Closes the port. A second close is a no-op.
    pub fn close(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            debug!("closing serial port {}", self.name);
            // RTS is wired to NRST; neither line may stay asserted.
            let _ = inner.write_request_to_send(false);
            let _ = inner.write_data_terminal_ready(false);
        }
    }

    fn port(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>, Error> {
        self.inner.as_mut().ok_or(Error::PortClosed)
    }
}

impl Drop for Port {
    fn drop(&mut self) {
        self.close();
    }
}

impl SerialPort for Port {
    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), Error> {
        let port = self.port()?;
        let deadline = Instant::now() + timeout;
        let mut filled = 0;

        loop {
            if filled == buf.len() {
                return Ok(());
            }

            let waiting = port.bytes_to_read()? as usize;
            if waiting > 0 {
                let end = buf.len().min(filled + waiting);
                match port.read(&mut buf[filled..end]) {
                    Ok(n) if n > 0 => {
                        filled += n;
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) if is_transient(&e) => {}
                    Err(e) => return Err(e.into()),
                }
            }

            if Instant::now() >= deadline {
                return Err(Error::Timeout {
                    wanted: buf.len(),
                    got: filled,
                });
            }

            thread::sleep(POLL_INTERVAL);
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), Error> {
        let port = self.port()?;
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> Result<(), Error> {
        self.port()?.write_request_to_send(level)?;
        Ok(())
    }

    fn set_dtr(&mut self, level: bool) -> Result<(), Error> {
        self.port()?.write_data_terminal_ready(level)?;
        Ok(())
    }

    fn reset_input_buffer(&mut self) -> Result<(), Error> {
        self.port()?.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn reset_output_buffer(&mut self) -> Result<(), Error> {
        self.port()?.clear(ClearBuffer::Output)?;
        Ok(())
    }

    fn bytes_waiting(&mut self) -> Result<usize, Error> {
        Ok(self.port()?.bytes_to_read()? as usize)
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
