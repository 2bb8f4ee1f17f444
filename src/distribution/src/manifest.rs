//! Image manifest container and its wire codec.
//!
//! Encoding emits `digest`, `mediaType` and `size` for every blob,
//! plus a `crypto` object for the inline encrypted form or a `urls`
//! array for the compat form. Decoding dispatches on the key set of
//! each blob object: `crypto` wins, then `urls`, else plain. Unknown
//! top-level keys are ignored for forward compatibility and layer
//! order is preserved.

use std::path::PathBuf;

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use enclayer_core::error::Result;

use crate::blob::{Blob, BlobDesc, CompatBlob, EnCrypto, EncryptedBlob, PlainBlob};

/// Media type of a schema-2 image manifest.
pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Media type of an image config blob.
pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.docker.container.image.v1+json";

/// Media type of a gzipped layer blob.
pub const LAYER_MEDIA_TYPE: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// Manifest schema version emitted on push.
pub const SCHEMA_VERSION: u64 = 2;

/// An image manifest: one config blob and an ordered list of layers.
#[derive(Debug, PartialEq)]
pub struct Manifest {
    pub schema_version: u64,
    pub media_type: String,
    pub config: Blob,
    pub layers: Vec<Blob>,
}

impl Manifest {
    /// Assemble a push manifest from already-transitioned blobs.
    pub fn new(config: Blob, layers: Vec<Blob>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            media_type: MANIFEST_MEDIA_TYPE.to_string(),
            config,
            layers,
        }
    }

    /// Encode to canonical JSON.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from JSON, selecting the blob variant per element.
    pub fn decode(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BlobWire<'a> {
    digest: &'a str,
    media_type: &'a str,
    size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    crypto: Option<&'a EnCrypto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    urls: Option<&'a [String]>,
}

impl<'a> From<&'a Blob> for BlobWire<'a> {
    fn from(blob: &'a Blob) -> Self {
        let desc = blob.desc();
        let (crypto, urls) = match blob {
            Blob::EncryptedNew(b) => (Some(&b.crypto), None),
            Blob::EncryptedCompat(b) => (None, Some(b.urls.as_slice())),
            // Plain and key-decrypted blobs carry descriptor fields only.
            Blob::Plain(_) | Blob::KeyDecrypted(_) => (None, None),
        };
        BlobWire {
            digest: &desc.digest,
            media_type: &desc.media_type,
            size: desc.size,
            crypto,
            urls,
        }
    }
}

impl Serialize for Manifest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct ManifestWire<'a> {
            schema_version: u64,
            media_type: &'a str,
            config: BlobWire<'a>,
            layers: Vec<BlobWire<'a>>,
        }

        ManifestWire {
            schema_version: self.schema_version,
            media_type: &self.media_type,
            config: BlobWire::from(&self.config),
            layers: self.layers.iter().map(BlobWire::from).collect(),
        }
        .serialize(serializer)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlobWireOwned {
    digest: String,
    media_type: String,
    size: u64,
    #[serde(default)]
    crypto: Option<EnCrypto>,
    #[serde(default)]
    urls: Option<Vec<String>>,
}

impl BlobWireOwned {
    fn into_blob(self) -> std::result::Result<Blob, String> {
        let desc = BlobDesc {
            digest: self.digest,
            media_type: self.media_type,
            size: self.size,
            path: PathBuf::new(),
        };
        match (self.crypto, self.urls) {
            (Some(_), Some(_)) => Err(format!(
                "blob {} carries both crypto and urls",
                desc.digest
            )),
            (Some(crypto), None) => Ok(Blob::EncryptedNew(EncryptedBlob { desc, crypto })),
            (None, Some(urls)) => Ok(Blob::EncryptedCompat(CompatBlob { desc, urls })),
            (None, None) => Ok(Blob::Plain(PlainBlob { desc })),
        }
    }
}

impl<'de> Deserialize<'de> for Manifest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct ManifestWireOwned {
            schema_version: u64,
            media_type: String,
            config: BlobWireOwned,
            layers: Vec<BlobWireOwned>,
        }

        let wire = ManifestWireOwned::deserialize(deserializer)?;
        Ok(Manifest {
            schema_version: wire.schema_version,
            media_type: wire.media_type,
            config: wire.config.into_blob().map_err(de::Error::custom)?,
            layers: wire
                .layers
                .into_iter()
                .map(|b| b.into_blob().map_err(de::Error::custom))
                .collect::<std::result::Result<_, _>>()?,
        })
    }
}
