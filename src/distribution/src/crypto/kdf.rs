//! Key derivation and randomness.

use std::num::NonZeroU32;

use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroizing;

use enclayer_core::error::{EnclayerError, Result};

use super::{KEY_LEN, NONCE_LEN, PBKDF2_ITERATIONS, SALT_LEN};

const ITERATIONS: NonZeroU32 = match NonZeroU32::new(PBKDF2_ITERATIONS) {
    Some(n) => n,
    None => panic!("iteration count must be nonzero"),
};

/// Key-encryption key derived from a passphrase; wiped on drop.
pub struct Kek(Zeroizing<[u8; KEY_LEN]>);

impl Kek {
    pub fn bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

/// Derive a 32-byte key-encryption key from a passphrase and salt
/// using PBKDF2-HMAC-SHA256.
pub fn derive_kek(passphrase: &str, salt: &[u8; SALT_LEN]) -> Kek {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    ring::pbkdf2::derive(
        ring::pbkdf2::PBKDF2_HMAC_SHA256,
        ITERATIONS,
        salt,
        passphrase.as_bytes(),
        &mut key[..],
    );
    Kek(key)
}

/// Generate a random 16-byte salt.
pub fn random_salt() -> Result<[u8; SALT_LEN]> {
    let mut salt = [0u8; SALT_LEN];
    fill_random(&mut salt)?;
    Ok(salt)
}

/// Generate a random 32-byte data key, wiped on drop.
pub fn random_key() -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    fill_random(&mut key[..])?;
    Ok(key)
}

/// Generate a random 12-byte AES-GCM nonce.
pub(crate) fn random_nonce() -> Result<[u8; NONCE_LEN]> {
    let mut nonce = [0u8; NONCE_LEN];
    fill_random(&mut nonce)?;
    Ok(nonce)
}

fn fill_random(buf: &mut [u8]) -> Result<()> {
    SystemRandom::new()
        .fill(buf)
        .map_err(|_| EnclayerError::Crypto("random generator failure".to_string()))
}
