use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::error::{AdbError, Result};
use crate::transport::Transport;

use super::auth::Signer;
use super::message::{
    AdbMessage, A_AUTH, A_CLSE, A_CNXN, A_OKAY, A_OPEN, AUTH_RSAPUBLICKEY, AUTH_SIGNATURE,
    AUTH_TOKEN, CONNECT_MAX_DATA, CONNECT_VERSION,
};
use super::stream::AdbStream;

/// The parsed `CNXN` banner: `<state>::<prop>;<prop>;...`.
#[derive(Debug, Clone)]
pub struct DeviceBanner {
    pub state: String,
    pub properties: Vec<String>,
}

pub struct AdbConnection {
    transport: Box<dyn Transport>,
    local_id_counter: AtomicU32,
    pub banner: DeviceBanner,
}

impl AdbConnection {
    /// Performs the CNXN/AUTH handshake and returns a ready connection.
    /// `per_read_timeout` bounds each individual read; `auth_timeout` is the
    /// separate, normally much shorter timeout applied only while waiting
    /// for the device to accept a just-sent public key - a timeout there
    /// means "the on-device dialog hasn't been accepted yet", not failure.
    pub fn connect(
        mut transport: Box<dyn Transport>,
        host_banner: &str,
        signers: &[Box<dyn Signer>],
        per_read_timeout: Duration,
        auth_timeout: Duration,
    ) -> Result<Self> {
        let local_payload = format!("host::{host_banner}\0").into_bytes();
        let connect_msg = AdbMessage::new(A_CNXN, CONNECT_VERSION, CONNECT_MAX_DATA, local_payload);
        connect_msg.write(transport.as_mut())?;

        let mut reply = AdbMessage::read(transport.as_mut(), per_read_timeout, per_read_timeout * 3)?;

        if reply.cmd == A_AUTH {
            reply = Self::run_auth_loop(transport.as_mut(), reply, signers, per_read_timeout, auth_timeout)?;
        }

        if reply.cmd != A_CNXN {
            return Err(AdbError::UnexpectedHeader { wanted: "CNXN", got: reply.cmd });
        }

        let banner = parse_banner(&reply.payload);
        log::info!("connected, device state={}", banner.state);

        Ok(AdbConnection { transport, local_id_counter: AtomicU32::new(1), banner })
    }

    fn run_auth_loop(
        transport: &mut dyn Transport,
        mut auth_msg: AdbMessage,
        signers: &[Box<dyn Signer>],
        per_read_timeout: Duration,
        auth_timeout: Duration,
    ) -> Result<AdbMessage> {
        if signers.is_empty() {
            return Err(AdbError::NoKeysAvailable);
        }

        for signer in signers {
            if auth_msg.arg0 != AUTH_TOKEN {
                return Err(AdbError::InvalidResponse("AUTH message without TOKEN arg".into()));
            }
            let signature = signer.sign(&auth_msg.payload)?;
            let sig_msg = AdbMessage::new(A_AUTH, AUTH_SIGNATURE, 0, signature);
            sig_msg.write(transport)?;

            let reply = AdbMessage::read(transport, per_read_timeout, per_read_timeout * 3)?;
            match reply.cmd {
                A_CNXN => return Ok(reply),
                A_AUTH => {
                    auth_msg = reply;
                    continue;
                }
                other => return Err(AdbError::UnexpectedHeader { wanted: "CNXN or AUTH", got: other }),
            }
        }

        // No signer was accepted; offer the first signer's public key and
        // wait, with a much shorter timeout, for the user to tap "allow" on
        // the device.
        let pubkey = signers[0].public_key()?;
        let pubkey_msg = AdbMessage::new(A_AUTH, AUTH_RSAPUBLICKEY, 0, pubkey);
        pubkey_msg.write(transport)?;

        match AdbMessage::read(transport, auth_timeout, auth_timeout) {
            Ok(reply) if reply.cmd == A_CNXN => Ok(reply),
            Ok(reply) if reply.cmd == A_AUTH => Err(AdbError::AllKeysRejected),
            Ok(reply) => Err(AdbError::UnexpectedHeader { wanted: "CNXN", got: reply.cmd }),
            Err(AdbError::ReadTimeout(_)) => Err(AdbError::AuthTimeout),
            Err(e) => Err(e),
        }
    }

    fn alloc_local_id(&self) -> u32 {
        self.local_id_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Opens a new logical stream for `service` (e.g. `"shell:echo hi"`,
    /// `"sync:"`). Returns `None` if the device refuses the service (two
    /// consecutive CLSE replies), matching real `adbd` behavior for e.g. an
    /// unknown shell command target.
    pub fn open_stream(&mut self, service: &str) -> Result<Option<AdbStream<'_>>> {
        let local_id = self.alloc_local_id();
        let open_msg = AdbMessage::new(A_OPEN, local_id, 0, format!("{service}\0").into_bytes());
        open_msg.write(self.transport.as_mut())?;

        let reply = AdbMessage::read(self.transport.as_mut(), Duration::from_millis(10_000), Duration::from_millis(30_000))?;

        match reply.cmd {
            A_OKAY => {
                if reply.arg1 != 0 && reply.arg1 != local_id {
                    return Err(AdbError::InterleavedData { local_id, remote_id: reply.arg0 });
                }
                Ok(Some(AdbStream::new(self, local_id, reply.arg0)))
            }
            A_CLSE => {
                // Tolerate a duplicate CLSE: some devices send it twice when
                // refusing a service.
                let second = AdbMessage::read(self.transport.as_mut(), Duration::from_millis(1_000), Duration::from_millis(1_000));
                match second {
                    Ok(m) if m.cmd == A_OKAY => {
                        if m.arg1 != 0 && m.arg1 != local_id {
                            return Err(AdbError::InterleavedData { local_id, remote_id: m.arg0 });
                        }
                        Ok(Some(AdbStream::new(self, local_id, m.arg0)))
                    }
                    _ => Ok(None),
                }
            }
            other => Err(AdbError::UnexpectedHeader { wanted: "OKAY or CLSE", got: other }),
        }
    }

    pub(crate) fn transport_mut(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    pub fn close(&mut self) -> Result<()> {
        self.transport.close()
    }
}

fn parse_banner(payload: &[u8]) -> DeviceBanner {
    let text = String::from_utf8_lossy(payload);
    let text = text.trim_end_matches('\0');
    let mut parts = text.splitn(2, "::");
    let state = parts.next().unwrap_or("").to_string();
    let properties = parts
        .next()
        .map(|rest| rest.split(';').filter(|p| !p.is_empty()).map(|p| p.to_string()).collect())
        .unwrap_or_default();
    DeviceBanner { state, properties }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_state_and_properties_from_banner() {
        let banner = parse_banner(b"device::ro.product.model=Pixel;ro.build.version.sdk=34;\0");
        assert_eq!(banner.state, "device");
        assert_eq!(banner.properties, vec!["ro.product.model=Pixel", "ro.build.version.sdk=34"]);
    }

    #[test]
    fn banner_with_no_properties_section() {
        let banner = parse_banner(b"bootloader\0");
        assert_eq!(banner.state, "bootloader");
        assert!(banner.properties.is_empty());
    }
}
