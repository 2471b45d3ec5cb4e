//! Encodes an RSA public key in the binary layout `adbd` expects on the
//! wire (AOSP's `android_pubkey_encode`), not a standard X.509/PEM format.
//!
//! Layout (`RSAPublicKey` struct, all fields little-endian):
//!   modulus_size_words: u32       (always 64, for a 2048-bit key)
//!   n0inv: u32                    (-1 / N[0] mod 2^32, Montgomery constant)
//!   modulus: [u8; 256]            (N, little-endian)
//!   rr: [u8; 256]                 (R^2 mod N, R = 2^2048, little-endian)
//!   exponent: u32

use num_bigint_dig::{BigUint, ModInverse};
use rsa::traits::PublicKeyParts;
use rsa::RsaPublicKey;

use crate::error::{AdbError, Result};

const MODULUS_SIZE_BYTES: usize = 256;
const MODULUS_SIZE_WORDS: u32 = (MODULUS_SIZE_BYTES / 4) as u32;

pub fn encode(key: &RsaPublicKey, comment: &str) -> Result<String> {
    let n = key.n();
    if n.bits() > MODULUS_SIZE_BYTES * 8 {
        return Err(AdbError::Signing("only 2048-bit RSA keys are supported".into()));
    }

    let two_32 = BigUint::from(1u64) << 32;
    let n_low_word = n % &two_32;
    let n0inv_pos = n_low_word
        .mod_inverse(&two_32)
        .and_then(|v| v.to_biguint())
        .ok_or_else(|| AdbError::Signing("modulus has no inverse mod 2^32".into()))?;
    let n0inv = (&two_32 - &n0inv_pos) % &two_32;

    let r = BigUint::from(1u64) << (MODULUS_SIZE_BYTES * 8);
    let rr = (&r * &r) % n;

    let mut buf = Vec::with_capacity(4 + 4 + MODULUS_SIZE_BYTES + MODULUS_SIZE_BYTES + 4);
    buf.extend_from_slice(&MODULUS_SIZE_WORDS.to_le_bytes());
    buf.extend_from_slice(&to_u32(&n0inv).to_le_bytes());
    buf.extend_from_slice(&to_fixed_le_bytes(n, MODULUS_SIZE_BYTES));
    buf.extend_from_slice(&to_fixed_le_bytes(&rr, MODULUS_SIZE_BYTES));
    buf.extend_from_slice(&to_u32(key.e()).to_le_bytes());

    let mut encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &buf);
    encoded.push(' ');
    encoded.push_str(comment);
    encoded.push('\0');
    Ok(encoded)
}

fn to_u32(v: &BigUint) -> u32 {
    let bytes = v.to_bytes_le();
    let mut out = [0u8; 4];
    for (i, b) in bytes.iter().take(4).enumerate() {
        out[i] = *b;
    }
    u32::from_le_bytes(out)
}

fn to_fixed_le_bytes(v: &BigUint, size: usize) -> Vec<u8> {
    let mut bytes = v.to_bytes_le();
    bytes.resize(size, 0);
    bytes
}
