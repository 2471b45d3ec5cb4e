//! The Fastboot protocol: no ADB framing at all, just ASCII commands and
//! always-64-byte replies sent directly over the transport's bulk
//! endpoints. Lives entirely beside the ADB layers above; a device is
//! either in ADB mode or fastboot mode, never both at once.

use std::fs;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use crate::error::{AdbError, Result};
use crate::progress::Progress;
use crate::transport::Transport;

/// Known fastboot vendor ids, useful as an optional discovery filter.
/// Not required for protocol correctness.
pub const VENDOR_IDS: &[u16] = &[
    0x18D1, 0x0451, 0x0502, 0x0FCE, 0x05C6, 0x22B8, 0x0955, 0x413C, 0x2314, 0x0BB4, 0x8087,
];

enum Reply {
    Okay(String),
    Data(usize),
    Fail(String),
    Info(String),
}

fn parse_reply(buf: &[u8]) -> Result<Reply> {
    if buf.len() < 4 {
        return Err(AdbError::FastbootInvalidResponse(buf.to_vec()));
    }
    let (header, rest) = buf.split_at(4);
    let text = String::from_utf8_lossy(rest).trim_end_matches('\0').to_string();
    match header {
        b"OKAY" => Ok(Reply::Okay(text)),
        b"FAIL" => Ok(Reply::Fail(text)),
        b"INFO" => Ok(Reply::Info(text)),
        b"DATA" => {
            let size = usize::from_str_radix(text.trim(), 16)
                .map_err(|_| AdbError::FastbootInvalidResponse(buf.to_vec()))?;
            Ok(Reply::Data(size))
        }
        _ => Err(AdbError::FastbootInvalidResponse(buf.to_vec())),
    }
}

pub struct FastbootClient {
    transport: Box<dyn Transport>,
    chunk_bytes: usize,
}

impl FastbootClient {
    pub fn new(transport: Box<dyn Transport>, chunk_kb: u32) -> Self {
        FastbootClient { transport, chunk_bytes: chunk_kb as usize * 1024 }
    }

    fn send_command(&mut self, command: &str, arg: Option<&str>) -> Result<()> {
        let full = match arg {
            Some(a) => format!("{command}:{a}"),
            None => command.to_string(),
        };
        self.transport.set_timeout(Duration::from_millis(10_000));
        crate::transport::write_all(self.transport.as_mut(), full.as_bytes())
    }

    /// Reads 64-byte replies until a terminal one (`OKAY` or, when awaiting
    /// a transfer, `DATA`) arrives, invoking `info_cb` for every `INFO` in
    /// between - `INFO` frames never surface through the return value.
    fn accept_responses(&mut self, expect_data: bool, info_cb: &mut dyn FnMut(&str)) -> Result<String> {
        loop {
            let mut buf = [0u8; 64];
            let n = self.transport.bulk_read(&mut buf)?;
            match parse_reply(&buf[..n])? {
                Reply::Info(message) => info_cb(&message),
                Reply::Okay(message) => {
                    if expect_data {
                        return Err(AdbError::FastbootStateMismatch { expected: "DATA", got: "OKAY".into() });
                    }
                    return Ok(message);
                }
                Reply::Data(size) => {
                    if !expect_data {
                        return Err(AdbError::FastbootStateMismatch { expected: "OKAY", got: "DATA".into() });
                    }
                    return Ok(format!("{size:08x}"));
                }
                Reply::Fail(message) => return Err(AdbError::FastbootRemoteFailure(message)),
            }
        }
    }

    fn write_chunked(&mut self, mut data: &[u8], mut progress: Option<Progress>, mut cb: Option<&mut dyn FnMut(u64, u64)>) -> Result<()> {
        self.transport.set_timeout(Duration::from_millis(30_000));
        while !data.is_empty() {
            let take = data.len().min(self.chunk_bytes);
            let (chunk, rest) = data.split_at(take);
            self.transport.bulk_write(chunk)?;
            data = rest;
            if let Some(p) = progress.as_mut() {
                p.advance(take as u64);
                if let Some(cb) = cb.as_deref_mut() {
                    cb(p.current, p.total);
                }
            }
        }
        Ok(())
    }

    pub fn getvar(&mut self, name: &str) -> Result<String> {
        self.send_command("getvar", Some(name))?;
        self.accept_responses(false, &mut |_| {})
    }

    pub fn download(&mut self, data: &[u8], mut on_progress: Option<&mut dyn FnMut(u64, u64)>) -> Result<()> {
        self.send_command("download", Some(&format!("{:08x}", data.len())))?;
        let accepted_hex = self.accept_responses(true, &mut |_| {})?;
        let accepted = usize::from_str_radix(&accepted_hex, 16).unwrap_or(0);
        if accepted != data.len() {
            return Err(AdbError::FastbootTransferError(format!(
                "device refused to download {} bytes (accepted {accepted})",
                data.len()
            )));
        }
        let progress = Progress::new(data.len() as u64);
        self.write_chunked(data, Some(progress), on_progress.as_deref_mut())?;
        self.accept_responses(false, &mut |_| {})?;
        Ok(())
    }

    pub fn flash(&mut self, partition: &str) -> Result<()> {
        self.send_command("flash", Some(partition))?;
        self.accept_responses(false, &mut |_| {})?;
        Ok(())
    }

    pub fn flash_from_file(&mut self, partition: &str, path: &Path, mut on_progress: Option<&mut dyn FnMut(u64, u64)>) -> Result<()> {
        let mut file = fs::File::open(path).map_err(AdbError::TransportIo)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data).map_err(AdbError::TransportIo)?;
        self.download(&data, on_progress.as_deref_mut())?;
        self.flash(partition)
    }

    pub fn erase(&mut self, partition: &str) -> Result<()> {
        self.send_command("erase", Some(partition))?;
        self.accept_responses(false, &mut |_| {})?;
        Ok(())
    }

    pub fn oem(&mut self, command: &str) -> Result<String> {
        self.send_command("oem", Some(command))?;
        self.accept_responses(false, &mut |_| {})
    }

    pub fn continue_boot(&mut self) -> Result<()> {
        self.send_command("continue", None)?;
        self.accept_responses(false, &mut |_| {})?;
        Ok(())
    }

    pub fn reboot(&mut self) -> Result<()> {
        self.send_command("reboot", None)?;
        self.accept_responses(false, &mut |_| {})?;
        Ok(())
    }

    pub fn reboot_bootloader(&mut self) -> Result<()> {
        self.send_command("reboot-bootloader", None)?;
        self.accept_responses(false, &mut |_| {})?;
        Ok(())
    }
}
