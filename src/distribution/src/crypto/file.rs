//! AEAD framing over files.
//!
//! The frame carries exactly one nonce and one trailing tag, so the
//! whole body must authenticate before any plaintext can be released;
//! blobs are therefore processed as single buffers and memory is
//! bounded by capping blob-level parallelism. Output digests are
//! computed while writing, avoiding a second pass over the file.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use sha2::{Digest, Sha256};

use enclayer_core::error::Result;

use super::{open_bytes, seal_bytes, KEY_LEN, SALT_LEN};

/// Write buffer size for ciphertext and plaintext output.
const WRITE_BUF: usize = 64 * 1024;

/// Seal the file at `src` into `dst` under `key`, with `salt` as the
/// frame prefix and AAD. Returns the digest and size of the written
/// ciphertext file.
pub fn seal_file(
    src: &Path,
    dst: &Path,
    key: &[u8; KEY_LEN],
    salt: &[u8; SALT_LEN],
) -> Result<(String, u64)> {
    let plaintext = read_all(src)?;
    let framed = seal_bytes(&plaintext, key, salt)?;
    write_and_digest(dst, &framed)
}

/// Open the sealed file at `src` into `dst` under `key`. Returns the
/// digest and size of the written plaintext file. Nothing is written
/// unless the whole frame authenticates.
pub fn open_file(src: &Path, dst: &Path, key: &[u8; KEY_LEN]) -> Result<(String, u64)> {
    let framed = read_all(src)?;
    let plaintext = open_bytes(&framed, key)?;
    write_and_digest(dst, &plaintext)
}

/// Compute the `sha256:<hex>` digest and size of an existing file.
pub fn digest_file(path: &Path) -> Result<(String, u64)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; WRITE_BUF];
    let mut size: u64 = 0;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((format!("sha256:{:x}", hasher.finalize()), size))
}

fn read_all(path: &Path) -> Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let mut data = Vec::with_capacity(file.metadata().map(|m| m.len() as usize).unwrap_or(0));
    file.read_to_end(&mut data)?;
    Ok(data)
}

fn write_and_digest(dst: &Path, data: &[u8]) -> Result<(String, u64)> {
    let mut writer = BufWriter::new(File::create(dst)?);
    let mut hasher = Sha256::new();
    for chunk in data.chunks(WRITE_BUF) {
        hasher.update(chunk);
        writer.write_all(chunk)?;
    }
    writer.flush()?;
    Ok((format!("sha256:{:x}", hasher.finalize()), data.len() as u64))
}
