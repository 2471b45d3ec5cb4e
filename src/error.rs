use thiserror::Error;

/// The full error taxonomy for the bridge. Framing errors are fatal to the
/// session the caller must reconnect; service/filesync/fastboot errors are
/// recoverable the offending stream closes but the connection stays usable.
#[derive(Debug, Error)]
pub enum AdbError {
    #[error("transport closed")]
    TransportClosed,
    #[error("read timed out after {0:?}")]
    ReadTimeout(std::time::Duration),
    #[error("write timed out after {0:?}")]
    WriteTimeout(std::time::Duration),
    #[error("transport I/O error: {0}")]
    TransportIo(#[from] std::io::Error),
    #[error("no matching USB device found")]
    DeviceNotFound,

    #[error("invalid command code: {0:#010x}")]
    InvalidCommand(u32),
    #[error("magic does not complement command: cmd={cmd:#010x} magic={magic:#010x}")]
    InvalidMagic { cmd: u32, magic: u32 },
    #[error("payload checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    InvalidChecksum { expected: u32, actual: u32 },
    #[error("unexpected response: {0}")]
    InvalidResponse(String),
    #[error("interleaved data on stream {local_id}/{remote_id}")]
    InterleavedData { local_id: u32, remote_id: u32 },
    #[error("unexpected header: wanted {wanted}, got {got:#010x}")]
    UnexpectedHeader { wanted: &'static str, got: u32 },

    #[error("no signers available to authenticate")]
    NoKeysAvailable,
    #[error("authentication timed out waiting for on-device acceptance")]
    AuthTimeout,
    #[error("device rejected all offered keys")]
    AllKeysRejected,

    #[error("command failed: {0}")]
    CommandFailed(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("push failed: {0}")]
    PushFailed(String),
    #[error("pull failed: {0}")]
    PullFailed(String),
    #[error("stat failed for {0}")]
    StatFailed(String),

    #[error("fastboot state mismatch: expected {expected}, got {got}")]
    FastbootStateMismatch { expected: &'static str, got: String },
    #[error("fastboot remote failure: {0}")]
    FastbootRemoteFailure(String),
    #[error("fastboot sent an unrecognized response header: {0:?}")]
    FastbootInvalidResponse(Vec<u8>),
    #[error("fastboot transfer error: {0}")]
    FastbootTransferError(String),

    #[error("signing error: {0}")]
    Signing(String),
}

pub type Result<T> = std::result::Result<T, AdbError>;
