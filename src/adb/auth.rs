use std::fs;
use std::path::Path;

use rsa::pkcs1v15::Pkcs1v15Sign;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};

use crate::error::{AdbError, Result};

use super::pubkey;

/// One offered identity. `sign` takes the raw, unhashed challenge bytes and
/// is responsible for hashing internally - the one canonical path, as
/// opposed to the two inconsistent pre-hashed conventions older tooling
/// grew out of. `public_key` returns the `adbd`-flavored base64 blob, ready
/// to send verbatim as an AUTH/RSAPUBLICKEY payload.
pub trait Signer {
    fn sign(&self, challenge: &[u8]) -> Result<Vec<u8>>;
    fn public_key(&self) -> Result<Vec<u8>>;
}

pub struct RsaSigner {
    private_key: RsaPrivateKey,
    comment: String,
}

impl RsaSigner {
    pub fn from_pkcs8_pem(pem: &str, comment: impl Into<String>) -> Result<Self> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|e| AdbError::Signing(format!("parsing private key: {e}")))?;
        Ok(RsaSigner { private_key, comment: comment.into() })
    }

    pub fn load_or_generate(path: &Path, comment: impl Into<String>) -> Result<Self> {
        if let Ok(pem) = fs::read_to_string(path) {
            return Self::from_pkcs8_pem(&pem, comment);
        }
        let mut rng = rsa::rand_core::OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, 2048)
            .map_err(|e| AdbError::Signing(format!("generating key: {e}")))?;
        let pem = rsa::pkcs8::EncodePrivateKey::to_pkcs8_pem(&private_key, Default::default())
            .map_err(|e| AdbError::Signing(format!("encoding key: {e}")))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).ok();
        }
        fs::write(path, pem.as_bytes()).map_err(AdbError::TransportIo)?;
        Ok(RsaSigner { private_key, comment: comment.into() })
    }
}

impl Signer for RsaSigner {
    fn sign(&self, challenge: &[u8]) -> Result<Vec<u8>> {
        let digest = Sha1::digest(challenge);
        self.private_key
            .sign(Pkcs1v15Sign::new::<Sha1>(), digest.as_slice())
            .map_err(|e| AdbError::Signing(format!("signing challenge: {e}")))
    }

    fn public_key(&self) -> Result<Vec<u8>> {
        let public_key = RsaPublicKey::from(&self.private_key);
        let encoded = pubkey::encode(&public_key, &self.comment)?;
        Ok(encoded.into_bytes())
    }
}
