//! The `sync:` sub-protocol used for file transfer and directory listing.
//! Runs entirely inside one `AdbStream` opened against the `sync:` service;
//! every command below is just a framing convention layered on top of the
//! ordinary WRTE/OKAY stream primitives.

use std::io::{Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use byteorder::{ByteOrder, LittleEndian};

use crate::adb::AdbStream;
use crate::error::{AdbError, Result};
use crate::progress::Progress;

pub const MAX_PUSH_DATA: usize = 2048;

const fn id(b: [u8; 4]) -> u32 {
    (b[0] as u32) | ((b[1] as u32) << 8) | ((b[2] as u32) << 16) | ((b[3] as u32) << 24)
}

const ID_STAT: u32 = id(*b"STAT");
const ID_LIST: u32 = id(*b"LIST");
const ID_SEND: u32 = id(*b"SEND");
const ID_RECV: u32 = id(*b"RECV");
const ID_DENT: u32 = id(*b"DENT");
const ID_DONE: u32 = id(*b"DONE");
const ID_DATA: u32 = id(*b"DATA");
const ID_OKAY: u32 = id(*b"OKAY");
const ID_FAIL: u32 = id(*b"FAIL");
const ID_QUIT: u32 = id(*b"QUIT");

pub const DEFAULT_PUSH_MODE: u32 = 0o100777; // S_IFREG | 0777

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub mode: u32,
    pub size: u32,
    pub mtime: u32,
}

/// Wraps an `AdbStream` open on `sync:`, owning the send/recv buffering the
/// original protocol relies on: outgoing frames coalesce into a single
/// 4 KiB ADB write (one WRTE/OKAY round trip instead of one per filesync
/// frame), and any read implicitly flushes whatever is pending first.
pub struct FilesyncConnection<'a> {
    stream: AdbStream<'a>,
    send_buffer: Vec<u8>,
    recv_buffer: std::collections::VecDeque<u8>,
}

impl<'a> FilesyncConnection<'a> {
    pub fn new(stream: AdbStream<'a>) -> Self {
        FilesyncConnection { stream, send_buffer: Vec::with_capacity(crate::adb::message::MAX_ADB_DATA), recv_buffer: Default::default() }
    }

    fn can_add_to_send_buffer(&self, extra: usize) -> bool {
        self.send_buffer.len() + extra < crate::adb::message::MAX_ADB_DATA
    }

    fn send_frame(&mut self, frame_id: u32, arg: u32, payload: &[u8]) -> Result<()> {
        let needed = 8 + payload.len();
        if !self.send_buffer.is_empty() && !self.can_add_to_send_buffer(needed) {
            self.flush_send()?;
        }
        let mut header = [0u8; 8];
        LittleEndian::write_u32(&mut header[0..4], frame_id);
        LittleEndian::write_u32(&mut header[4..8], arg);
        self.send_buffer.extend_from_slice(&header);
        self.send_buffer.extend_from_slice(payload);
        if !self.can_add_to_send_buffer(0) {
            self.flush_send()?;
        }
        Ok(())
    }

    fn flush_send(&mut self) -> Result<()> {
        if self.send_buffer.is_empty() {
            return Ok(());
        }
        let buf = std::mem::take(&mut self.send_buffer);
        self.stream.write(&buf)
    }

    fn read_buffered(&mut self, size: usize) -> Result<Vec<u8>> {
        self.flush_send()?;
        while self.recv_buffer.len() < size {
            let chunk = self
                .stream
                .read_chunk()?
                .ok_or_else(|| AdbError::ServiceUnavailable("sync stream closed early".into()))?;
            self.recv_buffer.extend(chunk);
        }
        Ok(self.recv_buffer.drain(..size).collect())
    }

    fn read_short_header(&mut self) -> Result<(u32, u32)> {
        let raw = self.read_buffered(8)?;
        Ok((LittleEndian::read_u32(&raw[0..4]), LittleEndian::read_u32(&raw[4..8])))
    }

    pub fn stat(&mut self, path: &str) -> Result<(u32, u32, u32)> {
        self.send_frame(ID_STAT, path.len() as u32, path.as_bytes())?;
        let raw = self.read_buffered(16)?;
        let reply_id = LittleEndian::read_u32(&raw[0..4]);
        if reply_id != ID_STAT {
            return Err(AdbError::StatFailed(format!("unexpected reply id {reply_id:#x}")));
        }
        let mode = LittleEndian::read_u32(&raw[4..8]);
        let size = LittleEndian::read_u32(&raw[8..12]);
        let mtime = LittleEndian::read_u32(&raw[12..16]);
        if mode == 0 {
            return Err(AdbError::StatFailed(path.to_string()));
        }
        Ok((mode, size, mtime))
    }

    pub fn list(&mut self, path: &str) -> Result<Vec<DirEntry>> {
        self.send_frame(ID_LIST, path.len() as u32, path.as_bytes())?;
        let mut entries = Vec::new();
        loop {
            let raw = self.read_buffered(20)?;
            let reply_id = LittleEndian::read_u32(&raw[0..4]);
            if reply_id == ID_DONE {
                break;
            }
            if reply_id != ID_DENT {
                return Err(AdbError::CommandFailed(format!("unexpected LIST reply id {reply_id:#x}")));
            }
            let mode = LittleEndian::read_u32(&raw[4..8]);
            let size = LittleEndian::read_u32(&raw[8..12]);
            let mtime = LittleEndian::read_u32(&raw[12..16]);
            let namelen = LittleEndian::read_u32(&raw[16..20]) as usize;
            let name_bytes = self.read_buffered(namelen)?;
            let name = String::from_utf8_lossy(&name_bytes).into_owned();
            entries.push(DirEntry { name, mode, size, mtime });
        }
        Ok(entries)
    }

    pub fn pull<W: Write>(
        &mut self,
        device_path: &str,
        mut dest: W,
        mut on_progress: Option<&mut dyn FnMut(u64, u64)>,
    ) -> Result<()> {
        let total = self.stat(device_path).map(|(_, size, _)| size as u64).unwrap_or(0);
        let mut progress = Progress::new(total);

        self.send_frame(ID_RECV, device_path.len() as u32, device_path.as_bytes())?;
        loop {
            let (reply_id, arg) = self.read_short_header()?;
            match reply_id {
                ID_DATA => {
                    let chunk = self.read_buffered(arg as usize)?;
                    dest.write_all(&chunk).map_err(AdbError::TransportIo)?;
                    progress.advance(chunk.len() as u64);
                    if let Some(cb) = on_progress.as_deref_mut() {
                        cb(progress.current, progress.total);
                    }
                }
                ID_DONE => break,
                ID_FAIL => {
                    let message = self.read_buffered(arg as usize)?;
                    return Err(AdbError::PullFailed(String::from_utf8_lossy(&message).into_owned()));
                }
                other => return Err(AdbError::PullFailed(format!("unexpected reply id {other:#x}"))),
            }
        }
        Ok(())
    }

    pub fn push<R: Read>(
        &mut self,
        mut source: R,
        device_path: &str,
        mode: u32,
        mtime: Option<u32>,
        total_hint: u64,
        mut on_progress: Option<&mut dyn FnMut(u64, u64)>,
    ) -> Result<()> {
        let header = format!("{device_path},{mode}");
        self.send_frame(ID_SEND, header.len() as u32, header.as_bytes())?;

        let mut progress = Progress::new(total_hint);
        let mut buf = vec![0u8; MAX_PUSH_DATA];
        loop {
            let n = source.read(&mut buf).map_err(AdbError::TransportIo)?;
            if n == 0 {
                break;
            }
            self.send_frame(ID_DATA, n as u32, &buf[..n])?;
            progress.advance(n as u64);
            if let Some(cb) = on_progress.as_deref_mut() {
                cb(progress.current, progress.total);
            }
        }

        let mtime = mtime.unwrap_or_else(now_unix);
        self.send_frame(ID_DONE, mtime, &[])?;
        self.flush_send()?;

        let (reply_id, arg) = self.read_short_header()?;
        match reply_id {
            ID_OKAY => Ok(()),
            ID_FAIL => {
                let message = self.read_buffered(arg as usize)?;
                Err(AdbError::PushFailed(String::from_utf8_lossy(&message).into_owned()))
            }
            other => Err(AdbError::PushFailed(format!("unexpected reply id {other:#x}"))),
        }
    }

    pub fn quit(mut self) -> Result<()> {
        self.send_frame(ID_QUIT, 0, &[])?;
        self.flush_send()
    }
}

fn now_unix() -> u32 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as u32).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    // Push/Pull/Stat/List are exercised end-to-end in session.rs's tests,
    // which drive a full sync: stream over a loopback transport; the
    // send-buffer coalescing and recv-buffer re-framing logic above is
    // covered there rather than against a bare FilesyncConnection fixture.
}
