use std::time::{Duration, Instant};

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{AdbError, Result};
use crate::transport::Transport;

pub const MAX_ADB_DATA: usize = 4096;
const HEADER_LEN: usize = 24;

const fn cmd_id(b: [u8; 4]) -> u32 {
    (b[0] as u32) | ((b[1] as u32) << 8) | ((b[2] as u32) << 16) | ((b[3] as u32) << 24)
}

pub const A_SYNC: u32 = cmd_id(*b"SYNC");
pub const A_CNXN: u32 = cmd_id(*b"CNXN");
pub const A_AUTH: u32 = cmd_id(*b"AUTH");
pub const A_OPEN: u32 = cmd_id(*b"OPEN");
pub const A_OKAY: u32 = cmd_id(*b"OKAY");
pub const A_CLSE: u32 = cmd_id(*b"CLSE");
pub const A_WRTE: u32 = cmd_id(*b"WRTE");

pub const AUTH_TOKEN: u32 = 1;
pub const AUTH_SIGNATURE: u32 = 2;
pub const AUTH_RSAPUBLICKEY: u32 = 3;

pub const CONNECT_VERSION: u32 = 0x0100_0000;
pub const CONNECT_MAX_DATA: u32 = MAX_ADB_DATA as u32;

fn command_name(cmd: u32) -> &'static str {
    match cmd {
        A_SYNC => "SYNC",
        A_CNXN => "CNXN",
        A_AUTH => "AUTH",
        A_OPEN => "OPEN",
        A_OKAY => "OKAY",
        A_CLSE => "CLSE",
        A_WRTE => "WRTE",
        _ => "????",
    }
}

fn is_known_command(cmd: u32) -> bool {
    matches!(cmd, A_SYNC | A_CNXN | A_AUTH | A_OPEN | A_OKAY | A_CLSE | A_WRTE)
}

#[derive(Debug, Clone)]
pub struct AdbMessage {
    pub cmd: u32,
    pub arg0: u32,
    pub arg1: u32,
    pub payload: Vec<u8>,
}

impl AdbMessage {
    pub fn new(cmd: u32, arg0: u32, arg1: u32, payload: Vec<u8>) -> Self {
        AdbMessage { cmd, arg0, arg1, payload }
    }

    fn checksum(data: &[u8]) -> u32 {
        data.iter().fold(0u32, |acc, &b| acc.wrapping_add(b as u32))
    }

    fn encode_header(&self) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        LittleEndian::write_u32(&mut header[0..4], self.cmd);
        LittleEndian::write_u32(&mut header[4..8], self.arg0);
        LittleEndian::write_u32(&mut header[8..12], self.arg1);
        LittleEndian::write_u32(&mut header[12..16], self.payload.len() as u32);
        LittleEndian::write_u32(&mut header[16..20], Self::checksum(&self.payload));
        LittleEndian::write_u32(&mut header[20..24], self.cmd ^ 0xFFFF_FFFF);
        header
    }

    pub fn write(&self, transport: &mut dyn Transport) -> Result<()> {
        let header = self.encode_header();
        log::trace!("-> {} arg0={:#x} arg1={:#x} len={}", command_name(self.cmd), self.arg0, self.arg1, self.payload.len());
        crate::transport::write_all(transport, &header)?;
        if !self.payload.is_empty() {
            crate::transport::write_all(transport, &self.payload)?;
        }
        Ok(())
    }

    /// Reads one message, retrying internally on a per-read timeout until
    /// `overall_timeout` elapses. `per_read_timeout` is applied to each
    /// individual bulk read (the transport's own timeout knob); callers
    /// that want "block until a command I care about shows up, tolerating
    /// the occasional stray packet" pass a generous overall timeout.
    pub fn read(
        transport: &mut dyn Transport,
        per_read_timeout: Duration,
        overall_timeout: Duration,
    ) -> Result<Self> {
        transport.set_timeout(per_read_timeout);
        let deadline = Instant::now() + overall_timeout;

        let mut header = [0u8; HEADER_LEN];
        loop {
            match crate::transport::read_exact(transport, &mut header) {
                Ok(()) => break,
                Err(AdbError::ReadTimeout(_)) if Instant::now() < deadline => continue,
                Err(e) => return Err(e),
            }
        }

        let cmd = LittleEndian::read_u32(&header[0..4]);
        let arg0 = LittleEndian::read_u32(&header[4..8]);
        let arg1 = LittleEndian::read_u32(&header[8..12]);
        let data_length = LittleEndian::read_u32(&header[12..16]) as usize;
        let data_checksum = LittleEndian::read_u32(&header[16..20]);
        let magic = LittleEndian::read_u32(&header[20..24]);

        if magic != cmd ^ 0xFFFF_FFFF {
            return Err(AdbError::InvalidMagic { cmd, magic });
        }
        if !is_known_command(cmd) {
            return Err(AdbError::InvalidCommand(cmd));
        }

        let mut payload = vec![0u8; data_length];
        if data_length > 0 {
            crate::transport::read_exact(transport, &mut payload)?;
        }

        let actual = Self::checksum(&payload);
        if actual != data_checksum {
            return Err(AdbError::InvalidChecksum { expected: data_checksum, actual });
        }

        log::trace!("<- {} arg0={:#x} arg1={:#x} len={}", command_name(cmd), arg0, arg1, payload.len());
        Ok(AdbMessage { cmd, arg0, arg1, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tests::LoopbackTransport;

    #[test]
    fn header_round_trips_through_the_wire() {
        let mut link = LoopbackTransport::new();
        let msg = AdbMessage::new(A_OPEN, 7, 0, b"shell:echo hi".to_vec());
        msg.write(link.writer()).unwrap();
        let read_back = AdbMessage::read(link.reader(), Duration::from_millis(50), Duration::from_millis(50)).unwrap();
        assert_eq!(read_back.cmd, A_OPEN);
        assert_eq!(read_back.arg0, 7);
        assert_eq!(read_back.payload, b"shell:echo hi");
    }

    #[test]
    fn magic_must_complement_command() {
        let mut link = LoopbackTransport::new();
        let mut header = [0u8; HEADER_LEN];
        LittleEndian::write_u32(&mut header[0..4], A_OKAY);
        LittleEndian::write_u32(&mut header[20..24], A_OKAY); // wrong: should be !A_OKAY
        link.inject(&header);
        let err = AdbMessage::read(link.reader(), Duration::from_millis(50), Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, AdbError::InvalidMagic { .. }));
    }

    #[test]
    fn unknown_command_with_self_consistent_magic_is_rejected() {
        let mut link = LoopbackTransport::new();
        let bogus_cmd = 0x4142_4344u32; // "DCBA", not one of the seven known codes
        let mut header = [0u8; HEADER_LEN];
        LittleEndian::write_u32(&mut header[0..4], bogus_cmd);
        LittleEndian::write_u32(&mut header[20..24], bogus_cmd ^ 0xFFFF_FFFF);
        link.inject(&header);
        let err = AdbMessage::read(link.reader(), Duration::from_millis(50), Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, AdbError::InvalidCommand(cmd) if cmd == bogus_cmd));
    }

    #[test]
    fn empty_payload_checksums_to_zero() {
        assert_eq!(AdbMessage::checksum(&[]), 0);
    }

    #[test]
    fn single_byte_corruption_is_detected() {
        let mut link = LoopbackTransport::new();
        let msg = AdbMessage::new(A_WRTE, 1, 1, vec![1, 2, 3, 4]);
        msg.write(link.writer()).unwrap();
        link.corrupt_last_payload_byte();
        let err = AdbMessage::read(link.reader(), Duration::from_millis(50), Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, AdbError::InvalidChecksum { .. }));
    }
}
