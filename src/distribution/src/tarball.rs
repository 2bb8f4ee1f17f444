//! Local image interchange: `docker save`-style tarballs.
//!
//! The pipeline consumes a [`LayerSource`] on push and a [`LayerSink`]
//! on pull. The production implementations here read and write image
//! tarballs with a top-level `manifest.json` naming the config file
//! and the ordered layer files, which `docker save` emits and
//! `docker load` accepts. Talking to a container engine socket stays
//! out of scope; the tarball is the supported interchange.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use tar::{Archive, Builder, Header};

use enclayer_core::error::{EnclayerError, Result};

use crate::blob::PlainBlob;
use crate::manifest::{CONFIG_MEDIA_TYPE, LAYER_MEDIA_TYPE};

/// Plaintext image contents: one config blob and ordered layers.
#[derive(Debug)]
pub struct ImageContents {
    pub config: PlainBlob,
    pub layers: Vec<PlainBlob>,
}

/// Yields plaintext blobs with metadata for the push pipeline.
#[async_trait]
pub trait LayerSource: Send + Sync {
    /// Export config and layers as files under `workdir`, returning
    /// their descriptors in image order.
    async fn export(&self, workdir: &Path) -> Result<ImageContents>;
}

/// Accepts decrypted blobs from the pull pipeline and reassembles a
/// loadable image.
#[async_trait]
pub trait LayerSink: Send + Sync {
    async fn load(&self, contents: &ImageContents) -> Result<()>;
}

/// Entry of the tarball's `manifest.json`.
#[derive(Debug, Serialize, Deserialize)]
struct SavedImage {
    #[serde(rename = "Config")]
    config: String,
    #[serde(rename = "RepoTags", default)]
    repo_tags: Vec<String>,
    #[serde(rename = "Layers")]
    layers: Vec<String>,
}

/// Reads an image from a `docker save`-style tarball.
pub struct TarballSource {
    path: PathBuf,
}

impl TarballSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl LayerSource for TarballSource {
    async fn export(&self, workdir: &Path) -> Result<ImageContents> {
        let unpacked = workdir.join("image");
        std::fs::create_dir_all(&unpacked)?;
        unpack(&self.path, &unpacked)?;

        let manifest_path = unpacked.join("manifest.json");
        let manifest_raw = std::fs::read_to_string(&manifest_path).map_err(|_| {
            EnclayerError::InputMalformed(format!(
                "no manifest.json in image tarball {}",
                self.path.display()
            ))
        })?;
        let entries: Vec<SavedImage> = serde_json::from_str(&manifest_raw)?;
        let entry = entries.into_iter().next().ok_or_else(|| {
            EnclayerError::InputMalformed("image tarball lists no images".to_string())
        })?;

        let config = PlainBlob::from_file(unpacked.join(&entry.config), CONFIG_MEDIA_TYPE)?;
        let layers = entry
            .layers
            .iter()
            .map(|name| PlainBlob::from_file(unpacked.join(name), LAYER_MEDIA_TYPE))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            config = %config.desc.digest,
            layers = layers.len(),
            "exported image tarball"
        );

        Ok(ImageContents { config, layers })
    }
}

/// Writes a pulled image back out as a loadable tarball.
pub struct TarballSink {
    path: PathBuf,
    repo_tag: Option<String>,
}

impl TarballSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            repo_tag: None,
        }
    }

    /// Record a repository tag in the tarball manifest.
    pub fn with_repo_tag(mut self, tag: impl Into<String>) -> Self {
        self.repo_tag = Some(tag.into());
        self
    }
}

#[async_trait]
impl LayerSink for TarballSink {
    async fn load(&self, contents: &ImageContents) -> Result<()> {
        let file = File::create(&self.path)?;
        let mut builder = Builder::new(file);

        let config_name = format!("{}.json", contents.config.desc.digest_hex());
        builder.append_path_with_name(&contents.config.desc.path, &config_name)?;

        let mut layer_names = Vec::with_capacity(contents.layers.len());
        for layer in &contents.layers {
            let name = format!("{}/layer.tar", layer.desc.digest_hex());
            builder.append_path_with_name(&layer.desc.path, &name)?;
            layer_names.push(name);
        }

        let manifest = vec![SavedImage {
            config: config_name,
            repo_tags: self.repo_tag.clone().into_iter().collect(),
            layers: layer_names,
        }];
        let manifest_bytes = serde_json::to_vec(&manifest)?;

        let mut header = Header::new_gnu();
        header.set_size(manifest_bytes.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "manifest.json", manifest_bytes.as_slice())?;

        builder.finish()?;

        tracing::debug!(path = %self.path.display(), "wrote image tarball");
        Ok(())
    }
}

/// Unpack a tar (optionally gzipped) into `dest`.
fn unpack(path: &Path, dest: &Path) -> Result<()> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 2];
    let gzipped = file.read(&mut magic)? == 2 && magic == [0x1f, 0x8b];

    let file = File::open(path)?;
    if gzipped {
        Archive::new(GzDecoder::new(file)).unpack(dest)?;
    } else {
        Archive::new(file).unpack(dest)?;
    }
    Ok(())
}
