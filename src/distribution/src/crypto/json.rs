//! AEAD sealing of JSON values into base64-URL strings.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use ring::aead::{self, Aad, BoundKey, Nonce, NonceSequence, NONCE_LEN as RING_NONCE_LEN};
use serde::de::DeserializeOwned;
use serde::Serialize;

use enclayer_core::error::{EnclayerError, Result};

use super::kdf::random_nonce;
use super::{AUTH_FAILED, KEY_LEN, NONCE_LEN, SALT_LEN, TAG_LEN};

/// Encrypt a JSON-serializable value and base64-URL encode the result.
///
/// The salt is written as the frame prefix and bound as additional
/// authenticated data; the nonce is fresh randomness per call.
pub fn seal_json<T: Serialize>(
    value: &T,
    key: &[u8; KEY_LEN],
    salt: &[u8; SALT_LEN],
) -> Result<String> {
    let plaintext = serde_json::to_vec(value)?;
    let framed = seal_bytes(&plaintext, key, salt)?;
    Ok(URL_SAFE.encode(framed))
}

/// Decrypt a base64-URL string produced by [`seal_json`] and parse the
/// plaintext as JSON.
///
/// Decode and parse failures are reported as malformed input;
/// authentication failures carry a fixed message that does not reveal
/// which portion of the frame failed.
pub fn open_json<T: DeserializeOwned>(encoded: &str, key: &[u8; KEY_LEN]) -> Result<T> {
    let framed = decode(encoded)?;
    let plaintext = open_bytes(&framed, key)?;
    serde_json::from_slice(&plaintext)
        .map_err(|e| EnclayerError::InputMalformed(format!("sealed JSON payload: {e}")))
}

/// Read the frame-prefix salt out of a base64-URL encoded payload
/// without decrypting it. Needed to derive the unwrapping key.
pub fn peek_salt(encoded: &str) -> Result<[u8; SALT_LEN]> {
    let framed = decode(encoded)?;
    if framed.len() < SALT_LEN + NONCE_LEN + TAG_LEN {
        return Err(EnclayerError::InputMalformed(
            "encrypted payload too short".to_string(),
        ));
    }
    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&framed[..SALT_LEN]);
    Ok(salt)
}

fn decode(encoded: &str) -> Result<Vec<u8>> {
    URL_SAFE
        .decode(encoded)
        .map_err(|e| EnclayerError::InputMalformed(format!("bad base64 payload: {e}")))
}

/// Seal `plaintext` into the shared `salt || nonce || ciphertext || tag`
/// framing.
pub(crate) fn seal_bytes(
    plaintext: &[u8],
    key: &[u8; KEY_LEN],
    salt: &[u8; SALT_LEN],
) -> Result<Vec<u8>> {
    let nonce = random_nonce()?;

    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, key)
        .map_err(|_| EnclayerError::Crypto("failed to create AES-256-GCM key".to_string()))?;
    let mut sealing = aead::SealingKey::new(unbound, SingleUseNonce::new(nonce));

    let mut in_out = plaintext.to_vec();
    sealing
        .seal_in_place_append_tag(Aad::from(&salt[..]), &mut in_out)
        .map_err(|_| EnclayerError::Crypto("AES-256-GCM seal failed".to_string()))?;

    let mut framed = Vec::with_capacity(SALT_LEN + NONCE_LEN + in_out.len());
    framed.extend_from_slice(salt);
    framed.extend_from_slice(&nonce);
    framed.extend_from_slice(&in_out);
    Ok(framed)
}

/// Open a `salt || nonce || ciphertext || tag` frame. The whole body is
/// authenticated before any plaintext is returned.
pub(crate) fn open_bytes(framed: &[u8], key: &[u8; KEY_LEN]) -> Result<Vec<u8>> {
    if framed.len() < SALT_LEN + NONCE_LEN + TAG_LEN {
        return Err(EnclayerError::InputMalformed(
            "encrypted payload too short".to_string(),
        ));
    }

    let (salt, rest) = framed.split_at(SALT_LEN);
    let (nonce_bytes, body) = rest.split_at(NONCE_LEN);
    let nonce: [u8; NONCE_LEN] = nonce_bytes
        .try_into()
        .map_err(|_| EnclayerError::InputMalformed("invalid nonce".to_string()))?;

    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, key)
        .map_err(|_| EnclayerError::Crypto("failed to create AES-256-GCM key".to_string()))?;
    let mut opening = aead::OpeningKey::new(unbound, SingleUseNonce::new(nonce));

    let mut in_out = body.to_vec();
    let plaintext = opening
        .open_in_place(Aad::from(salt), &mut in_out)
        .map_err(|_| EnclayerError::Crypto(AUTH_FAILED.to_string()))?;

    Ok(plaintext.to_vec())
}

/// A NonceSequence that yields a single nonce then fails.
struct SingleUseNonce {
    nonce: Option<[u8; RING_NONCE_LEN]>,
}

impl SingleUseNonce {
    fn new(nonce: [u8; RING_NONCE_LEN]) -> Self {
        Self { nonce: Some(nonce) }
    }
}

impl NonceSequence for SingleUseNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.nonce
            .take()
            .map(Nonce::assume_unique_for_key)
            .ok_or(ring::error::Unspecified)
    }
}
