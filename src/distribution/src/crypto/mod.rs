//! Passphrase-derived key wrapping and the shared AEAD framing.
//!
//! Every encrypted payload — the key envelope embedded in the manifest
//! and the blob files themselves — uses one framing:
//!
//! ```text
//! salt (16) || nonce (12) || ciphertext || tag (16)
//! ```
//!
//! The AEAD is AES-256-GCM with the leading salt bound as additional
//! authenticated data. Key-encryption keys are derived from the
//! passphrase and that salt with PBKDF2-HMAC-SHA256; the iteration
//! count is pinned by the algorithm identifier, so changing it means
//! introducing a new identifier.

mod file;
mod json;
mod kdf;

pub use file::{digest_file, open_file, seal_file};
pub use json::{open_json, peek_salt, seal_json};
pub use kdf::{derive_kek, random_key, random_salt, Kek};

pub(crate) use json::{open_bytes, seal_bytes};

/// Byte length of the per-blob salt.
pub const SALT_LEN: usize = 16;

/// Byte length of the AES-GCM nonce.
pub const NONCE_LEN: usize = 12;

/// Byte length of the AES-GCM authentication tag.
pub const TAG_LEN: usize = 16;

/// Byte length of data keys and key-encryption keys.
pub const KEY_LEN: usize = 32;

/// PBKDF2-HMAC-SHA256 iteration count pinned by `PBKDF2-AES256-GCM`.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Fixed message for every AEAD authentication failure. Deliberately
/// identical for blob streams and key envelopes so callers cannot be
/// used as an oracle for which portion failed.
pub(crate) const AUTH_FAILED: &str = "ciphertext authentication failed";
