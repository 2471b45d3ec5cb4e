use std::net::TcpStream;
use std::time::Duration;

use crate::error::{AdbError, Result};

use super::Transport;

const DEFAULT_PORT: u16 = 5555;

pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// `serial` is either `host` or `host:port`; a bare host implies the
    /// standard adbd TCP port.
    pub fn connect(serial: &str, timeout: Duration) -> Result<Self> {
        let addr = if serial.contains(':') {
            serial.to_string()
        } else {
            format!("{serial}:{DEFAULT_PORT}")
        };
        let stream = TcpStream::connect(&addr).map_err(AdbError::TransportIo)?;
        stream.set_read_timeout(Some(timeout)).map_err(AdbError::TransportIo)?;
        stream.set_write_timeout(Some(timeout)).map_err(AdbError::TransportIo)?;
        stream.set_nodelay(true).ok();
        Ok(TcpTransport { stream })
    }
}

impl Transport for TcpTransport {
    fn bulk_write(&mut self, data: &[u8]) -> Result<()> {
        use std::io::Write;
        self.stream.write_all(data).map_err(map_io_err)
    }

    fn bulk_read(&mut self, buf: &mut [u8]) -> Result<usize> {
        use std::io::Read;
        self.stream.read(buf).map_err(map_io_err)
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.stream.set_read_timeout(Some(timeout)).ok();
        self.stream.set_write_timeout(Some(timeout)).ok();
    }

    fn close(&mut self) -> Result<()> {
        self.stream.shutdown(std::net::Shutdown::Both).map_err(AdbError::TransportIo)
    }
}

fn map_io_err(err: std::io::Error) -> AdbError {
    match err.kind() {
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
            AdbError::ReadTimeout(Duration::from_millis(0))
        }
        _ => AdbError::TransportIo(err),
    }
}
