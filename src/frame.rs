//! Framed binary transport for the NVM application protocol.
//!
//! Layout: `SOF | CMD | LEN (u16 BE) | PAYLOAD | CRC-16/CCITT (u16 BE)`,
//! where LEN counts payload bytes and the CRC covers every preceding byte.

use std::fmt;
use std::time::{Duration, Instant};

use log::trace;

use crate::checksum::crc16_ccitt;
use crate::serial::SerialPort;
use crate::Error;

/// Start-of-frame marker.
pub const SOF: u8 = 0x7E;

/// Framing overhead around the payload: SOF + CMD + LEN + CRC.
pub const OVERHEAD: usize = 6;

/// Application protocol opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Ack,
    Nack,
    WriteEnable,
    WriteDisable,
    /// Defined by the device firmware; no host-side caller yet.
    Write,
    ReadData,
    Data,
    Unknown(u8),
}

impl From<u8> for Opcode {
    fn from(value: u8) -> Self {
        match value {
            0x06 => Opcode::Ack,
            0x07 => Opcode::Nack,
            0x10 => Opcode::WriteEnable,
            0x11 => Opcode::WriteDisable,
            0x12 => Opcode::Write,
            0x20 => Opcode::ReadData,
            0x21 => Opcode::Data,
            other => Opcode::Unknown(other),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(opcode: Opcode) -> Self {
        match opcode {
            Opcode::Ack => 0x06,
            Opcode::Nack => 0x07,
            Opcode::WriteEnable => 0x10,
            Opcode::WriteDisable => 0x11,
            Opcode::Write => 0x12,
            Opcode::ReadData => 0x20,
            Opcode::Data => 0x21,
            Opcode::Unknown(other) => other,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::Unknown(value) => write!(f, "unknown opcode 0x{:02X}", value),
            other => write!(f, "{:?} (0x{:02X})", other, u8::from(*other)),
        }
    }
}

/// Builds a frame carrying `payload` for `cmd`.
pub fn build(cmd: Opcode, payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() <= std::u16::MAX as usize);

    let mut frame = Vec::with_capacity(payload.len() + OVERHEAD);
    frame.push(SOF);
    frame.push(cmd.into());
    frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    frame.extend_from_slice(payload);

    let crc = crc16_ccitt(&frame);
    frame.extend_from_slice(&crc.to_be_bytes());
    frame
}

/// Reads one complete frame from `port`.
///
/// Synchronizes on the SOF marker (discarding noise), then reads the header
/// and exactly the declared payload plus CRC. The deadline covers the whole
/// call, not each read.
pub fn read_frame<P: SerialPort>(port: &mut P, timeout: Duration) -> Result<Vec<u8>, Error> {
    let deadline = Instant::now() + timeout;

    loop {
        if Instant::now() >= deadline {
            return Err(Error::Timeout { wanted: 1, got: 0 });
        }

        let mut byte = [0u8; 1];
        port.read_exact(&mut byte, remaining(deadline))?;
        if byte[0] == SOF {
            break;
        }
        trace!("discarding 0x{:02X} while waiting for SOF", byte[0]);
    }

    let mut header = [0u8; 3];
    port.read_exact(&mut header, remaining(deadline))?;
    let length = u16::from_be_bytes([header[1], header[2]]) as usize;

    let mut rest = vec![0u8; length + 2];
    port.read_exact(&mut rest, remaining(deadline))?;

    let mut frame = Vec::with_capacity(OVERHEAD + length);
    frame.push(SOF);
    frame.extend_from_slice(&header);
    frame.extend_from_slice(&rest);
    Ok(frame)
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

/// Splits a raw frame into its opcode and payload after validating the
/// layout and the trailing CRC.
pub fn parse(frame: &[u8]) -> Result<(Opcode, &[u8]), Error> {
    if frame.len() < OVERHEAD {
        return Err(Error::BadFrame("frame shorter than minimum"));
    }
    if frame[0] != SOF {
        return Err(Error::BadFrame("missing start-of-frame marker"));
    }

    let cmd = Opcode::from(frame[1]);
    let length = u16::from_be_bytes([frame[2], frame[3]]) as usize;
    let total = OVERHEAD + length;
    if frame.len() < total {
        return Err(Error::BadFrame("truncated payload"));
    }

    let body = &frame[..4 + length];
    let received = u16::from_be_bytes([frame[4 + length], frame[5 + length]]);
    let calculated = crc16_ccitt(body);
    if received != calculated {
        return Err(Error::CrcMismatch {
            received,
            calculated,
        });
    }

    Ok((cmd, &frame[4..4 + length]))
}

#[cfg(test)]
mod tests {
    use assert_hex::*;
    use hex_literal::hex;

    use super::*;
    use crate::serial::mock::ScriptedPort;

    const ALL_OPCODES: [Opcode; 8] = [
        Opcode::Ack,
        Opcode::Nack,
        Opcode::WriteEnable,
        Opcode::WriteDisable,
        Opcode::Write,
        Opcode::ReadData,
        Opcode::Data,
        Opcode::Unknown(0x5A),
    ];

    #[test]
    fn it_should_build_a_write_enable_frame() {
        assert_eq_hex!(build(Opcode::WriteEnable, &[]), hex!("7E 10 00 00 27 8C"));
    }

    #[test]
    fn it_should_build_an_ack_frame() {
        assert_eq_hex!(build(Opcode::Ack, &[]), hex!("7E 06 00 00 D6 4F"));
    }

    #[test]
    fn it_should_round_trip_every_opcode() {
        let payload = hex!("00 11 22 33 44");

        for cmd in ALL_OPCODES.iter().copied() {
            let frame = build(cmd, &payload);
            let (parsed, body) = parse(&frame).unwrap();

            assert_eq!(parsed, cmd);
            assert_eq_hex!(body, &payload[..]);
        }
    }

    #[test]
    fn it_should_round_trip_empty_payloads() {
        let frame = build(Opcode::WriteDisable, &[]);
        let (parsed, body) = parse(&frame).unwrap();

        assert_eq!(parsed, Opcode::WriteDisable);
        assert!(body.is_empty());
    }

    #[test]
    fn it_should_size_read_requests_exactly() {
        let frame = build(Opcode::ReadData, &hex!("00 10 00 01 00"));

        assert_eq!(frame.len(), 9);
        assert_eq!(u16::from_be_bytes([frame[2], frame[3]]), 5);
    }

    #[test]
    fn it_should_reject_single_byte_corruption() {
        let frame = build(Opcode::Data, &hex!("DE AD BE EF"));

        for offset in 0..frame.len() {
            let mut corrupted = frame.clone();
            corrupted[offset] ^= 0x01;

            match parse(&corrupted) {
                Err(Error::CrcMismatch { .. }) | Err(Error::BadFrame(_)) => {}
                other => panic!("corruption at offset {} not detected: {:?}", offset, other),
            }
        }
    }

    #[test]
    fn it_should_reject_short_frames() {
        match parse(&hex!("7E 06 00")) {
            Err(Error::BadFrame(_)) => {}
            other => panic!("expected BadFrame, got {:?}", other),
        }
    }

    #[test]
    fn it_should_reject_a_missing_sof() {
        match parse(&hex!("00 06 00 00 D6 4F")) {
            Err(Error::BadFrame(_)) => {}
            other => panic!("expected BadFrame, got {:?}", other),
        }
    }

    #[test]
    fn it_should_reject_truncated_payloads() {
        let mut frame = build(Opcode::Data, &hex!("01 02 03 04"));
        frame.truncate(frame.len() - 3);

        match parse(&frame) {
            Err(Error::BadFrame(_)) => {}
            other => panic!("expected BadFrame, got {:?}", other),
        }
    }

    #[test]
    fn it_should_sync_past_leading_noise() {
        let mut port = ScriptedPort::new();
        port.respond(&hex!("00 FF 55"));
        port.respond(&build(Opcode::Ack, &[]));

        let frame = read_frame(&mut port, Duration::from_secs(1)).unwrap();

        assert_eq_hex!(frame, hex!("7E 06 00 00 D6 4F"));
    }

    #[test]
    fn it_should_read_a_frame_with_payload() {
        let mut port = ScriptedPort::new();
        let sent = build(Opcode::Data, &hex!("CA FE"));
        port.respond(&sent);

        let frame = read_frame(&mut port, Duration::from_secs(1)).unwrap();
        let (cmd, body) = parse(&frame).unwrap();

        assert_eq!(cmd, Opcode::Data);
        assert_eq_hex!(body, &hex!("CA FE")[..]);
    }

    #[test]
    fn it_should_time_out_on_a_silent_line() {
        let mut port = ScriptedPort::new();

        match read_frame(&mut port, Duration::from_secs(1)) {
            Err(Error::Timeout { .. }) => {}
            other => panic!("expected Timeout, got {:?}", other),
        }
    }
}
