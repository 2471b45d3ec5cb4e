//! The library's top-level handle: one transport, one `AdbConnection`, and
//! the convenience operations a caller actually wants (shell, push, pull,
//! install, ...), each just a thin dispatch over `open_stream`/`Filesync`.

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use crate::adb::{AdbConnection, Signer};
use crate::error::{AdbError, Result};
use crate::filesync::{DirEntry, FilesyncConnection};
use crate::transport::Transport;

pub struct Session {
    conn: AdbConnection,
}

impl Session {
    pub fn connect(
        transport: Box<dyn Transport>,
        host_banner: &str,
        signers: &[Box<dyn Signer>],
        connect_timeout: Duration,
        auth_timeout: Duration,
    ) -> Result<Self> {
        let conn = AdbConnection::connect(transport, host_banner, signers, connect_timeout, auth_timeout)?;
        Ok(Session { conn })
    }

    pub fn device_state(&self) -> &str {
        &self.conn.banner.state
    }

    pub fn properties(&self) -> &[String] {
        &self.conn.banner.properties
    }

    /// Runs `command` on the device and returns its combined stdout/stderr,
    /// matching the plain (non-streaming) `shell:` service.
    pub fn shell(&mut self, command: &str) -> Result<String> {
        let output = self.command("shell", Some(command))?;
        Ok(output)
    }

    /// Opens `shell:<command>` and hands back the raw stream so the caller
    /// can read output incrementally (used for `logcat`, long-running
    /// commands, and anything else that shouldn't buffer to completion
    /// before returning).
    pub fn streaming_shell(&mut self, command: &str) -> Result<crate::adb::AdbStream<'_>> {
        let service = format!("shell:{command}");
        self.conn
            .open_stream(&service)?
            .ok_or_else(|| AdbError::ServiceUnavailable(service))
    }

    pub fn logcat(&mut self, options: &str) -> Result<crate::adb::AdbStream<'_>> {
        self.streaming_shell(&format!("logcat {options}"))
    }

    /// Opens a single `shell:` stream the caller can send multiple
    /// commands over, rather than paying for an OPEN/CLSE per command.
    pub fn interactive_shell(&mut self, delim: Option<String>, strip_delim: bool) -> Result<crate::adb::InteractiveShell<'_>> {
        let stream = self
            .conn
            .open_stream("shell:")?
            .ok_or_else(|| AdbError::ServiceUnavailable("shell:".into()))?;
        Ok(crate::adb::InteractiveShell::new(stream, delim, strip_delim))
    }

    pub fn root(&mut self) -> Result<String> {
        self.command("root", None)
    }

    pub fn remount(&mut self) -> Result<String> {
        self.command("remount", None)
    }

    pub fn enable_verity(&mut self) -> Result<String> {
        self.command("enable-verity", None)
    }

    pub fn disable_verity(&mut self) -> Result<String> {
        self.command("disable-verity", None)
    }

    pub fn reboot(&mut self, target: &str) -> Result<()> {
        let service = if target.is_empty() { "reboot:".to_string() } else { format!("reboot:{target}") };
        self.conn.open_stream(&service)?;
        Ok(())
    }

    /// Opens `service[:arg]`, drains it to a string, and closes it -
    /// the shape shared by shell/root/remount/enable-verity/disable-verity.
    fn command(&mut self, service: &str, arg: Option<&str>) -> Result<String> {
        let destination = format!("{service}:{}", arg.unwrap_or(""));
        let mut stream = self
            .conn
            .open_stream(&destination)?
            .ok_or_else(|| AdbError::ServiceUnavailable(destination))?;
        let bytes = stream.read_to_end()?;
        stream.close()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn open_sync(&mut self) -> Result<FilesyncConnection<'_>> {
        let stream = self
            .conn
            .open_stream("sync:")?
            .ok_or_else(|| AdbError::ServiceUnavailable("sync:".into()))?;
        Ok(FilesyncConnection::new(stream))
    }

    pub fn stat(&mut self, device_path: &str) -> Result<(u32, u32, u32)> {
        self.open_sync()?.stat(device_path)
    }

    pub fn list(&mut self, device_path: &str) -> Result<Vec<DirEntry>> {
        self.open_sync()?.list(device_path)
    }

    pub fn pull(&mut self, device_path: &str, local_path: &Path, on_progress: Option<&mut dyn FnMut(u64, u64)>) -> Result<()> {
        let file = fs::File::create(local_path).map_err(AdbError::TransportIo)?;
        self.open_sync()?.pull(device_path, file, on_progress)
    }

    pub fn pull_to_vec(&mut self, device_path: &str, on_progress: Option<&mut dyn FnMut(u64, u64)>) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.open_sync()?.pull(device_path, io::Cursor::new(&mut buf), on_progress)?;
        Ok(buf)
    }

    /// Pushes a single file or, recursively, a whole directory tree
    /// (matching the original's `mkdir` + per-entry recursive push for
    /// directory sources).
    pub fn push(&mut self, local_path: &Path, device_path: &str, on_progress: Option<&mut dyn FnMut(u64, u64)>) -> Result<()> {
        if local_path.is_dir() {
            self.shell(&format!("mkdir {device_path}"))?;
            for entry in fs::read_dir(local_path).map_err(AdbError::TransportIo)? {
                let entry = entry.map_err(AdbError::TransportIo)?;
                let child_device_path = format!("{device_path}/{}", entry.file_name().to_string_lossy());
                self.push(&entry.path(), &child_device_path, None)?;
            }
            return Ok(());
        }

        let metadata = fs::metadata(local_path).map_err(AdbError::TransportIo)?;
        let total = metadata.len();
        let file = fs::File::open(local_path).map_err(AdbError::TransportIo)?;
        self.open_sync()?.push(file, device_path, crate::filesync::DEFAULT_PUSH_MODE, None, total, on_progress)
    }

    pub fn install(&mut self, apk_path: &Path, grant_permissions: bool, replace_existing: bool) -> Result<String> {
        let basename = apk_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let device_path = format!("/data/local/tmp/{basename}");
        self.push(apk_path, &device_path, None)?;

        let mut cmd = vec!["pm install".to_string()];
        if grant_permissions {
            cmd.push("-g".to_string());
        }
        if replace_existing {
            cmd.push("-r".to_string());
        }
        cmd.push(format!("\"{device_path}\""));
        let result = self.shell(&cmd.join(" "))?;
        self.shell(&format!("rm {device_path}"))?;
        Ok(result)
    }

    pub fn uninstall(&mut self, package: &str, keep_data: bool) -> Result<String> {
        let mut cmd = vec!["pm uninstall".to_string()];
        if keep_data {
            cmd.push("-k".to_string());
        }
        cmd.push(format!("\"{package}\""));
        self.shell(&cmd.join(" "))
    }

    pub fn close(mut self) -> Result<()> {
        self.conn.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adb::message::{AdbMessage, A_CLSE, A_CNXN, A_OKAY, A_OPEN, A_WRTE};
    use byteorder::{ByteOrder, LittleEndian};
    use std::io::Write as _;
    use std::time::Duration;

    const fn fsid(b: [u8; 4]) -> u32 {
        (b[0] as u32) | ((b[1] as u32) << 8) | ((b[2] as u32) << 16) | ((b[3] as u32) << 24)
    }

    /// A two-ended in-memory pipe so a test can play "device" on one end
    /// while `Session` plays "host" on the other, without any real
    /// hardware or sockets involved.
    struct PairedTransport {
        inbound: std::sync::mpsc::Receiver<Vec<u8>>,
        outbound: std::sync::mpsc::Sender<Vec<u8>>,
        scratch: std::collections::VecDeque<u8>,
        timeout: Duration,
    }

    impl Transport for PairedTransport {
        fn bulk_write(&mut self, data: &[u8]) -> Result<()> {
            self.outbound.send(data.to_vec()).map_err(|_| AdbError::TransportClosed)
        }

        fn bulk_read(&mut self, buf: &mut [u8]) -> Result<usize> {
            if self.scratch.is_empty() {
                match self.inbound.recv_timeout(self.timeout) {
                    Ok(chunk) => self.scratch.extend(chunk),
                    Err(_) => return Err(AdbError::ReadTimeout(self.timeout)),
                }
            }
            let n = buf.len().min(self.scratch.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.scratch.pop_front().unwrap();
            }
            Ok(n)
        }

        fn set_timeout(&mut self, timeout: Duration) {
            self.timeout = timeout;
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn paired_transports() -> (PairedTransport, PairedTransport) {
        let (tx_a, rx_a) = std::sync::mpsc::channel();
        let (tx_b, rx_b) = std::sync::mpsc::channel();
        (
            PairedTransport { inbound: rx_b, outbound: tx_a, scratch: Default::default(), timeout: Duration::from_millis(500) },
            PairedTransport { inbound: rx_a, outbound: tx_b, scratch: Default::default(), timeout: Duration::from_millis(500) },
        )
    }

    #[test]
    fn connect_without_auth_parses_banner() {
        let (host_side, mut device_side) = paired_transports();
        let device_thread = std::thread::spawn(move || {
            let cnxn = AdbMessage::read(&mut device_side, Duration::from_secs(1), Duration::from_secs(1)).unwrap();
            assert_eq!(cnxn.cmd, A_CNXN);
            let reply = AdbMessage::new(A_CNXN, 0x0100_0000, 4096, b"device::ro.product.model=Test;\0".to_vec());
            reply.write(&mut device_side).unwrap();
        });

        let session = Session::connect(Box::new(host_side), "unittest", &[], Duration::from_secs(1), Duration::from_millis(100)).unwrap();
        device_thread.join().unwrap();
        assert_eq!(session.device_state(), "device");
        assert_eq!(session.properties(), &["ro.product.model=Test"]);
    }

    #[test]
    fn shell_echo_round_trips_through_open_write_close() {
        let (host_side, mut device_side) = paired_transports();
        let device_thread = std::thread::spawn(move || {
            AdbMessage::read(&mut device_side, Duration::from_secs(1), Duration::from_secs(1)).unwrap();
            AdbMessage::new(A_CNXN, 0x0100_0000, 4096, b"device::\0".to_vec()).write(&mut device_side).unwrap();

            let open = AdbMessage::read(&mut device_side, Duration::from_secs(1), Duration::from_secs(1)).unwrap();
            assert_eq!(open.cmd, A_OPEN);
            assert_eq!(open.payload, b"shell:echo hi\0");
            let remote_id = 42u32;
            AdbMessage::new(A_OKAY, remote_id, open.arg0, Vec::new()).write(&mut device_side).unwrap();

            AdbMessage::new(A_WRTE, remote_id, open.arg0, b"hi\n".to_vec()).write(&mut device_side).unwrap();
            let ack = AdbMessage::read(&mut device_side, Duration::from_secs(1), Duration::from_secs(1)).unwrap();
            assert_eq!(ack.cmd, A_OKAY);

            AdbMessage::new(A_CLSE, remote_id, open.arg0, Vec::new()).write(&mut device_side).unwrap();
        });

        let mut session = Session::connect(Box::new(host_side), "unittest", &[], Duration::from_secs(1), Duration::from_millis(100)).unwrap();
        let output = session.shell("echo hi").unwrap();
        assert_eq!(output, "hi\n");
        device_thread.join().unwrap();
    }

    /// Drives a full `sync:` push: the host coalesces SEND+DATA+DONE into one
    /// WRTE (the file is far under `MAX_ADB_DATA`), the device ACKs it,
    /// replies with a filesync OKAY frame, and the host tears the stream down.
    #[test]
    fn push_round_trips_a_small_file() {
        let (host_side, mut device_side) = paired_transports();
        let mut src = tempfile::NamedTempFile::new().unwrap();
        let content = b"hello from the push round trip test\n".to_vec();
        src.write_all(&content).unwrap();
        let src_path = src.path().to_path_buf();
        let content_for_thread = content.clone();

        let device_thread = std::thread::spawn(move || {
            AdbMessage::read(&mut device_side, Duration::from_secs(1), Duration::from_secs(1)).unwrap();
            AdbMessage::new(A_CNXN, 0x0100_0000, 4096, b"device::\0".to_vec()).write(&mut device_side).unwrap();

            let open = AdbMessage::read(&mut device_side, Duration::from_secs(1), Duration::from_secs(1)).unwrap();
            assert_eq!(open.payload, b"sync:\0");
            let dev_id = 77u32;
            let host_id = open.arg0;
            AdbMessage::new(A_OKAY, dev_id, host_id, Vec::new()).write(&mut device_side).unwrap();

            let wrte = AdbMessage::read(&mut device_side, Duration::from_secs(1), Duration::from_secs(1)).unwrap();
            assert_eq!(wrte.cmd, A_WRTE);
            AdbMessage::new(A_OKAY, dev_id, host_id, Vec::new()).write(&mut device_side).unwrap();

            let payload = wrte.payload;
            assert_eq!(LittleEndian::read_u32(&payload[0..4]), fsid(*b"SEND"));
            let hdr_len = LittleEndian::read_u32(&payload[4..8]) as usize;
            let header = String::from_utf8_lossy(&payload[8..8 + hdr_len]).into_owned();
            assert!(header.starts_with("/sdcard/pushed.txt,"));
            let mut off = 8 + hdr_len;
            assert_eq!(LittleEndian::read_u32(&payload[off..off + 4]), fsid(*b"DATA"));
            let data_len = LittleEndian::read_u32(&payload[off + 4..off + 8]) as usize;
            off += 8;
            assert_eq!(&payload[off..off + data_len], content_for_thread.as_slice());
            off += data_len;
            assert_eq!(LittleEndian::read_u32(&payload[off..off + 4]), fsid(*b"DONE"));

            let mut okay_frame = vec![0u8; 8];
            LittleEndian::write_u32(&mut okay_frame[0..4], fsid(*b"OKAY"));
            AdbMessage::new(A_WRTE, dev_id, host_id, okay_frame).write(&mut device_side).unwrap();
            let ack = AdbMessage::read(&mut device_side, Duration::from_secs(1), Duration::from_secs(1)).unwrap();
            assert_eq!(ack.cmd, A_OKAY);

            let clse = AdbMessage::read(&mut device_side, Duration::from_secs(1), Duration::from_secs(1)).unwrap();
            assert_eq!(clse.cmd, A_CLSE);
        });

        let mut session = Session::connect(Box::new(host_side), "unittest", &[], Duration::from_secs(1), Duration::from_millis(100)).unwrap();
        session.push(&src_path, "/sdcard/pushed.txt", None).unwrap();
        device_thread.join().unwrap();
    }

    /// Drives a full `sync:` pull: STAT first (for the progress total), then
    /// RECV, with the device replying DATA immediately followed by DONE in a
    /// single WRTE to exercise the recv-buffer re-framer pulling two filesync
    /// frames out of one ADB payload.
    #[test]
    fn pull_writes_device_data_to_the_local_file() {
        let (host_side, mut device_side) = paired_transports();
        let dest = tempfile::NamedTempFile::new().unwrap();
        let dest_path = dest.path().to_path_buf();
        let content = b"pulled content from the fake device\n".to_vec();
        let content_for_thread = content.clone();

        let device_thread = std::thread::spawn(move || {
            AdbMessage::read(&mut device_side, Duration::from_secs(1), Duration::from_secs(1)).unwrap();
            AdbMessage::new(A_CNXN, 0x0100_0000, 4096, b"device::\0".to_vec()).write(&mut device_side).unwrap();

            let open = AdbMessage::read(&mut device_side, Duration::from_secs(1), Duration::from_secs(1)).unwrap();
            let dev_id = 88u32;
            let host_id = open.arg0;
            AdbMessage::new(A_OKAY, dev_id, host_id, Vec::new()).write(&mut device_side).unwrap();

            let stat_req = AdbMessage::read(&mut device_side, Duration::from_secs(1), Duration::from_secs(1)).unwrap();
            assert_eq!(stat_req.cmd, A_WRTE);
            assert_eq!(LittleEndian::read_u32(&stat_req.payload[0..4]), fsid(*b"STAT"));
            AdbMessage::new(A_OKAY, dev_id, host_id, Vec::new()).write(&mut device_side).unwrap();

            let mut stat_reply = vec![0u8; 16];
            LittleEndian::write_u32(&mut stat_reply[0..4], fsid(*b"STAT"));
            LittleEndian::write_u32(&mut stat_reply[4..8], 0o100644);
            LittleEndian::write_u32(&mut stat_reply[8..12], content_for_thread.len() as u32);
            LittleEndian::write_u32(&mut stat_reply[12..16], 1_700_000_000);
            AdbMessage::new(A_WRTE, dev_id, host_id, stat_reply).write(&mut device_side).unwrap();
            let ack = AdbMessage::read(&mut device_side, Duration::from_secs(1), Duration::from_secs(1)).unwrap();
            assert_eq!(ack.cmd, A_OKAY);

            let recv_req = AdbMessage::read(&mut device_side, Duration::from_secs(1), Duration::from_secs(1)).unwrap();
            assert_eq!(recv_req.cmd, A_WRTE);
            assert_eq!(LittleEndian::read_u32(&recv_req.payload[0..4]), fsid(*b"RECV"));
            AdbMessage::new(A_OKAY, dev_id, host_id, Vec::new()).write(&mut device_side).unwrap();

            let mut frame = vec![0u8; 8];
            LittleEndian::write_u32(&mut frame[0..4], fsid(*b"DATA"));
            LittleEndian::write_u32(&mut frame[4..8], content_for_thread.len() as u32);
            frame.extend_from_slice(&content_for_thread);
            let mut done = vec![0u8; 8];
            LittleEndian::write_u32(&mut done[0..4], fsid(*b"DONE"));
            frame.extend_from_slice(&done);
            AdbMessage::new(A_WRTE, dev_id, host_id, frame).write(&mut device_side).unwrap();
            let ack = AdbMessage::read(&mut device_side, Duration::from_secs(1), Duration::from_secs(1)).unwrap();
            assert_eq!(ack.cmd, A_OKAY);

            let clse = AdbMessage::read(&mut device_side, Duration::from_secs(1), Duration::from_secs(1)).unwrap();
            assert_eq!(clse.cmd, A_CLSE);
        });

        let mut session = Session::connect(Box::new(host_side), "unittest", &[], Duration::from_secs(1), Duration::from_millis(100)).unwrap();
        session.pull("/sdcard/remote.txt", &dest_path, None).unwrap();
        device_thread.join().unwrap();

        let written = std::fs::read(&dest_path).unwrap();
        assert_eq!(written, content);
    }
}
