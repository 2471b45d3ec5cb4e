pub mod auth;
pub mod connection;
pub mod interactive;
pub mod message;
pub mod pubkey;
pub mod stream;

pub use auth::{RsaSigner, Signer};
pub use connection::{AdbConnection, DeviceBanner};
pub use interactive::InteractiveShell;
pub use stream::AdbStream;
