//! Blob entities and the encryption state machine.
//!
//! A blob always carries (digest, media type, size, on-disk path) and
//! is in exactly one of four states:
//!
//! - [`PlainBlob`] — plaintext file on local disk
//! - [`KeyDecryptedBlob`] — ciphertext file plus an in-memory data key
//! - [`EncryptedBlob`] — ciphertext file plus an inline encrypted key
//!   object (the preferred on-wire form)
//! - [`CompatBlob`] — same data, with the key object smuggled through a
//!   `urls` list for registries that reject unknown manifest fields
//!
//! Transitions return a new variant; re-encrypting an already encrypted
//! blob is unrepresentable. Each encrypted blob has one 16-byte salt
//! that serves three roles: PBKDF2 salt for the key-encryption key,
//! AAD for the blob stream, and AAD for the key envelope.

use std::fmt;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use serde::{Deserialize, Serialize};
use url::Url;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use enclayer_core::config::EncAlgo;
use enclayer_core::error::{EnclayerError, Result};

use crate::crypto::{self, KEY_LEN, SALT_LEN};

/// Query parameter carrying the algorithm identifier in compat form.
const ALGOS_PARAM: &str = "algos";

/// Query parameter carrying the sealed key in compat form.
const KEY_PARAM: &str = "key";

/// Host for synthetic compat-form key URLs. Nothing is ever fetched
/// from it; the URL exists to carry query parameters through a field
/// unmodified registries accept.
const KEY_URL_BASE: &str = "https://key.enclayer.invalid/";

/// Descriptor fields shared by every blob variant.
///
/// Equality covers the wire fields only. `path` is local working
/// state: two descriptors for the same content compare equal wherever
/// their files happen to live, so decoding an encoded manifest yields
/// an equal one even though decode cannot know the original paths.
#[derive(Debug, Clone, Eq)]
pub struct BlobDesc {
    /// Content address of the referenced file, `sha256:<hex>`.
    pub digest: String,
    /// Manifest media type tag.
    pub media_type: String,
    /// Size in bytes of the referenced file.
    pub size: u64,
    /// Local file this descriptor points at. Never serialized.
    pub path: PathBuf,
}

impl PartialEq for BlobDesc {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest
            && self.media_type == other.media_type
            && self.size == other.size
    }
}

impl BlobDesc {
    /// Hex portion of the digest, usable as a file name.
    pub fn digest_hex(&self) -> &str {
        self.digest.strip_prefix("sha256:").unwrap_or(&self.digest)
    }
}

/// Encrypted key object as carried in the manifest `crypto` field:
/// the algorithm identifier and the base64-URL encoded
/// `salt || nonce || ciphertext || tag` of the sealed data key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnCrypto {
    pub algos: EncAlgo,
    #[serde(rename = "key")]
    pub enc_key: String,
}

/// Unwrapped key material, held in memory only between `DecryptKey`
/// and `DecryptFile`. The data key is wiped on drop.
pub struct DeCrypto {
    pub algos: EncAlgo,
    key: Zeroizing<[u8; KEY_LEN]>,
    pub salt: [u8; SALT_LEN],
}

impl DeCrypto {
    fn key(&self) -> &[u8; KEY_LEN] {
        &self.key
    }
}

impl fmt::Debug for DeCrypto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The data key stays out of any Debug output.
        f.debug_struct("DeCrypto")
            .field("algos", &self.algos)
            .field("salt", &self.salt)
            .finish_non_exhaustive()
    }
}

/// Inner JSON sealed under the KEK. Records the algorithm a second
/// time so a swapped key object cannot silently change parameters.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct KeyEnvelope {
    #[zeroize(skip)]
    algos: EncAlgo,
    key: String,
}

/// A plaintext blob on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainBlob {
    pub desc: BlobDesc,
}

/// A ciphertext blob whose data key has been unwrapped.
#[derive(Debug)]
pub struct KeyDecryptedBlob {
    pub desc: BlobDesc,
    pub crypto: DeCrypto,
}

/// A ciphertext blob with its key object in the inline (`crypto`) form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedBlob {
    pub desc: BlobDesc,
    pub crypto: EnCrypto,
}

/// A ciphertext blob with its key object encoded as a `urls` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatBlob {
    pub desc: BlobDesc,
    pub urls: Vec<String>,
}

/// Any blob position in a manifest.
#[derive(Debug)]
pub enum Blob {
    Plain(PlainBlob),
    KeyDecrypted(KeyDecryptedBlob),
    EncryptedNew(EncryptedBlob),
    EncryptedCompat(CompatBlob),
}

impl Blob {
    pub fn desc(&self) -> &BlobDesc {
        match self {
            Blob::Plain(b) => &b.desc,
            Blob::KeyDecrypted(b) => &b.desc,
            Blob::EncryptedNew(b) => &b.desc,
            Blob::EncryptedCompat(b) => &b.desc,
        }
    }

    pub fn desc_mut(&mut self) -> &mut BlobDesc {
        match self {
            Blob::Plain(b) => &mut b.desc,
            Blob::KeyDecrypted(b) => &mut b.desc,
            Blob::EncryptedNew(b) => &mut b.desc,
            Blob::EncryptedCompat(b) => &mut b.desc,
        }
    }

    /// Whether this blob needs a passphrase to become plaintext.
    pub fn is_encrypted(&self) -> bool {
        matches!(self, Blob::EncryptedNew(_) | Blob::EncryptedCompat(_))
    }
}

impl PartialEq for Blob {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Blob::Plain(a), Blob::Plain(b)) => a == b,
            (Blob::EncryptedNew(a), Blob::EncryptedNew(b)) => a == b,
            (Blob::EncryptedCompat(a), Blob::EncryptedCompat(b)) => a == b,
            (Blob::KeyDecrypted(a), Blob::KeyDecrypted(b)) => {
                a.desc == b.desc && a.crypto.algos == b.crypto.algos && a.crypto.salt == b.crypto.salt
            }
            _ => false,
        }
    }
}

impl PlainBlob {
    /// Describe an existing plaintext file, computing digest and size.
    pub fn from_file(path: impl Into<PathBuf>, media_type: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let (digest, size) = crypto::digest_file(&path)?;
        Ok(Self {
            desc: BlobDesc {
                digest,
                media_type: media_type.into(),
                size,
                path,
            },
        })
    }

    /// Encrypt the referenced file to `dst`.
    ///
    /// Generates a fresh 32-byte data key and 16-byte salt, seals the
    /// file stream under the data key, and seals the data key under the
    /// passphrase-derived KEK. The returned blob holds no plaintext key
    /// material; digest and size describe the ciphertext file.
    pub fn encrypt(&self, passphrase: &str, algos: EncAlgo, dst: &Path) -> Result<EncryptedBlob> {
        let salt = crypto::random_salt()?;
        let data_key = crypto::random_key()?;

        let (digest, size) = crypto::seal_file(&self.desc.path, dst, &data_key, &salt)?;

        let kek = crypto::derive_kek(passphrase, &salt);
        let envelope = KeyEnvelope {
            algos,
            key: URL_SAFE.encode(&data_key[..]),
        };
        let enc_key = crypto::seal_json(&envelope, kek.bytes(), &salt)?;

        tracing::debug!(digest = %digest, size, "encrypted blob");

        Ok(EncryptedBlob {
            desc: BlobDesc {
                digest,
                media_type: self.desc.media_type.clone(),
                size,
                path: dst.to_path_buf(),
            },
            crypto: EnCrypto { algos, enc_key },
        })
    }
}

impl EncryptedBlob {
    /// Unwrap the key object with the passphrase-derived KEK. The data
    /// key is held only in process memory.
    pub fn decrypt_key(&self, passphrase: &str) -> Result<KeyDecryptedBlob> {
        let crypto = unwrap_key(&self.crypto, passphrase)?;
        Ok(KeyDecryptedBlob {
            desc: self.desc.clone(),
            crypto,
        })
    }

    /// Unwrap the key, then decrypt the file stream to `dst`.
    pub fn decrypt_blob(&self, passphrase: &str, dst: &Path) -> Result<PlainBlob> {
        self.decrypt_key(passphrase)?.decrypt_file(dst)
    }

    /// Re-encode the key object into the `urls` form. Pure re-encoding;
    /// no cryptographic work.
    pub fn into_compat(self) -> CompatBlob {
        let url = format!(
            "{KEY_URL_BASE}?{ALGOS_PARAM}={}&{KEY_PARAM}={}",
            self.crypto.algos, self.crypto.enc_key
        );
        CompatBlob {
            desc: self.desc,
            urls: vec![url],
        }
    }
}

impl CompatBlob {
    /// Unwrap the key object carried by the first URL. Only the first
    /// URL is authoritative; extras are ignored here but preserved on
    /// the blob for re-encoding.
    pub fn decrypt_key(&self, passphrase: &str) -> Result<KeyDecryptedBlob> {
        let key_object = self.key_object()?;
        let crypto = unwrap_key(&key_object, passphrase)?;
        Ok(KeyDecryptedBlob {
            desc: self.desc.clone(),
            crypto,
        })
    }

    /// Unwrap the key, then decrypt the file stream to `dst`.
    pub fn decrypt_blob(&self, passphrase: &str, dst: &Path) -> Result<PlainBlob> {
        self.decrypt_key(passphrase)?.decrypt_file(dst)
    }

    /// Re-encode into the inline form. Extra URLs beyond the first are
    /// dropped; only the authoritative key object survives.
    pub fn into_new(self) -> Result<EncryptedBlob> {
        let crypto = self.key_object()?;
        Ok(EncryptedBlob {
            desc: self.desc,
            crypto,
        })
    }

    fn key_object(&self) -> Result<EnCrypto> {
        let first = self.urls.first().ok_or_else(|| {
            EnclayerError::InputMalformed("missing encryption key".to_string())
        })?;

        let url = Url::parse(first)
            .map_err(|e| EnclayerError::InputMalformed(format!("invalid key URL: {e}")))?;

        let mut algos = None;
        let mut enc_key = None;
        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                ALGOS_PARAM => algos = Some(value.into_owned()),
                KEY_PARAM => enc_key = Some(value.into_owned()),
                _ => {}
            }
        }

        let algos = algos
            .ok_or_else(|| {
                EnclayerError::InputMalformed("missing algorithm in key URL".to_string())
            })?
            .parse::<EncAlgo>()?;
        let enc_key = enc_key.ok_or_else(|| {
            EnclayerError::InputMalformed("missing encryption key".to_string())
        })?;

        Ok(EnCrypto { algos, enc_key })
    }
}

impl KeyDecryptedBlob {
    /// Stream the ciphertext through AEAD open into a plaintext file at
    /// `dst`, recomputing digest and size of the output.
    pub fn decrypt_file(&self, dst: &Path) -> Result<PlainBlob> {
        let (digest, size) = crypto::open_file(&self.desc.path, dst, self.crypto.key())?;

        tracing::debug!(digest = %digest, size, "decrypted blob");

        Ok(PlainBlob {
            desc: BlobDesc {
                digest,
                media_type: self.desc.media_type.clone(),
                size,
                path: dst.to_path_buf(),
            },
        })
    }
}

fn unwrap_key(key_object: &EnCrypto, passphrase: &str) -> Result<DeCrypto> {
    let salt = crypto::peek_salt(&key_object.enc_key)?;
    let kek = crypto::derive_kek(passphrase, &salt);
    let envelope: KeyEnvelope = crypto::open_json(&key_object.enc_key, kek.bytes())?;

    if envelope.algos != key_object.algos {
        return Err(EnclayerError::InputMalformed(
            "algorithm mismatch between key object and envelope".to_string(),
        ));
    }

    let mut raw = URL_SAFE
        .decode(&envelope.key)
        .map_err(|e| EnclayerError::InputMalformed(format!("bad data key encoding: {e}")))?;
    let key: [u8; KEY_LEN] = raw.as_slice().try_into().map_err(|_| {
        EnclayerError::InputMalformed("data key has wrong length".to_string())
    })?;
    raw.zeroize();

    Ok(DeCrypto {
        algos: envelope.algos,
        key: Zeroizing::new(key),
        salt,
    })
}
