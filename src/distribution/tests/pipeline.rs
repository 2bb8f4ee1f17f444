//! End-to-end push/pull scenarios over an in-memory transport.

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tar::Builder;
use tempfile::TempDir;
use zeroize::Zeroizing;

use enclayer_core::config::{EncAlgo, EncryptionOptions, PassphraseSource, Prompter};
use enclayer_core::error::{EnclayerError, Result};
use enclayer_distribution::{
    pull_image, push_image, BlobTransport, ImageReference, LayerSource, TarballSink,
    TarballSource,
};

/// Transport backed by in-process maps, standing in for a registry.
#[derive(Default)]
struct MemoryTransport {
    manifests: Mutex<HashMap<String, String>>,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryTransport {
    fn manifest_for(&self, reference: &ImageReference) -> String {
        self.manifests
            .lock()
            .unwrap()
            .get(&reference.canonical())
            .cloned()
            .expect("manifest was pushed")
    }

    fn flip_byte_in_largest_blob(&self) {
        let mut blobs = self.blobs.lock().unwrap();
        let digest = blobs
            .iter()
            .max_by_key(|(_, data)| data.len())
            .map(|(digest, _)| digest.clone())
            .expect("at least one blob");
        let data = blobs.get_mut(&digest).unwrap();
        let mid = data.len() / 2;
        data[mid] ^= 0x01;
    }
}

#[async_trait]
impl BlobTransport for MemoryTransport {
    async fn fetch_manifest(&self, reference: &ImageReference) -> Result<String> {
        self.manifests
            .lock()
            .unwrap()
            .get(&reference.canonical())
            .cloned()
            .ok_or_else(|| EnclayerError::Transport("manifest not found".to_string()))
    }

    async fn fetch_blob(
        &self,
        _reference: &ImageReference,
        digest: &str,
        dest: &Path,
    ) -> Result<()> {
        let data = self
            .blobs
            .lock()
            .unwrap()
            .get(digest)
            .cloned()
            .ok_or_else(|| EnclayerError::Transport(format!("unknown blob {digest}")))?;
        fs::write(dest, data)?;
        Ok(())
    }

    async fn upload_blob(
        &self,
        _reference: &ImageReference,
        digest: &str,
        src: &Path,
    ) -> Result<()> {
        let data = fs::read(src)?;
        self.blobs.lock().unwrap().insert(digest.to_string(), data);
        Ok(())
    }

    async fn upload_manifest(
        &self,
        reference: &ImageReference,
        _media_type: &str,
        body: String,
    ) -> Result<String> {
        self.manifests
            .lock()
            .unwrap()
            .insert(reference.canonical(), body);
        Ok(format!("memory://{}", reference.canonical()))
    }
}

struct NoPrompt;

impl Prompter for NoPrompt {
    fn prompt(&self, _message: &str) -> Result<String> {
        panic!("prompt must not fire in this scenario");
    }
}

fn options(pass: &str, compat: bool) -> EncryptionOptions {
    EncryptionOptions::new(
        EncAlgo::Pbkdf2Aes256Gcm,
        compat,
        PassphraseSource::Provided(Zeroizing::new(pass.to_string())),
    )
}

/// 1 KiB of seed-determined noise.
fn noise(seed: u64) -> Vec<u8> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
    (0..1024)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect()
}

/// Build a docker-save style tarball holding the given layers.
fn make_image_tarball(dir: &Path, layers: &[Vec<u8>]) -> std::path::PathBuf {
    let staging = dir.join("staging");
    fs::create_dir_all(&staging).unwrap();

    fs::write(staging.join("config.json"), br#"{"architecture":"amd64"}"#).unwrap();
    let layer_names: Vec<String> = layers
        .iter()
        .enumerate()
        .map(|(i, data)| {
            let name = format!("layer{i}.tar");
            fs::write(staging.join(&name), data).unwrap();
            name
        })
        .collect();

    let manifest = serde_json::json!([{
        "Config": "config.json",
        "RepoTags": ["acme/app:1"],
        "Layers": layer_names,
    }]);
    fs::write(staging.join("manifest.json"), manifest.to_string()).unwrap();

    let tar_path = dir.join("image.tar");
    let mut builder = Builder::new(File::create(&tar_path).unwrap());
    builder.append_dir_all(".", &staging).unwrap();
    builder.finish().unwrap();
    tar_path
}

/// Read the ordered layer payloads back out of a sink tarball.
async fn read_sink_layers(tar_path: &Path) -> Vec<Vec<u8>> {
    let workdir = TempDir::new().unwrap();
    let contents = TarballSource::new(tar_path)
        .export(workdir.path())
        .await
        .unwrap();
    contents
        .layers
        .iter()
        .map(|layer| fs::read(&layer.desc.path).unwrap())
        .collect()
}

async fn push_fixture(
    layers: &[Vec<u8>],
    pass: &str,
    compat: bool,
) -> (Arc<MemoryTransport>, ImageReference, TempDir) {
    let tmp = TempDir::new().unwrap();
    let tar_path = make_image_tarball(tmp.path(), layers);

    let transport = Arc::new(MemoryTransport::default());
    let reference = ImageReference::parse("ghcr.io/acme/app:1").unwrap();
    let workdir = TempDir::new().unwrap();

    push_image(
        &reference,
        &options(pass, compat),
        &NoPrompt,
        &TarballSource::new(&tar_path),
        Arc::clone(&transport) as Arc<dyn BlobTransport>,
        workdir.path(),
    )
    .await
    .unwrap();

    (transport, reference, tmp)
}

#[tokio::test]
async fn test_push_pull_roundtrip_new_form() {
    let layers = vec![noise(1), noise(2)];
    let (transport, reference, tmp) = push_fixture(&layers, "hunter2", false).await;

    // Every layer object carries a crypto field and no urls.
    let manifest: serde_json::Value =
        serde_json::from_str(&transport.manifest_for(&reference)).unwrap();
    let wire_layers = manifest["layers"].as_array().unwrap();
    assert_eq!(wire_layers.len(), 2);
    for layer in wire_layers {
        assert!(layer.get("crypto").is_some());
        assert!(layer.get("urls").is_none());
    }
    assert!(manifest["config"].get("crypto").is_some());

    // The registry never stores plaintext.
    for data in transport.blobs.lock().unwrap().values() {
        for layer in &layers {
            assert_ne!(data, layer);
        }
    }

    let out_tar = tmp.path().join("out.tar");
    let workdir = TempDir::new().unwrap();
    pull_image(
        &reference,
        &options("hunter2", false),
        &NoPrompt,
        Arc::clone(&transport) as Arc<dyn BlobTransport>,
        &TarballSink::new(&out_tar),
        workdir.path(),
    )
    .await
    .unwrap();

    assert_eq!(read_sink_layers(&out_tar).await, layers);
}

#[tokio::test]
async fn test_push_pull_roundtrip_compat_form() {
    let layers = vec![noise(3), noise(4)];
    let (transport, reference, tmp) = push_fixture(&layers, "hunter2", true).await;

    // Every layer object carries a single key URL and no crypto field.
    let manifest: serde_json::Value =
        serde_json::from_str(&transport.manifest_for(&reference)).unwrap();
    for layer in manifest["layers"].as_array().unwrap() {
        assert!(layer.get("crypto").is_none());
        let urls = layer["urls"].as_array().unwrap();
        assert_eq!(urls.len(), 1);
        let url = urls[0].as_str().unwrap();
        assert!(url.contains("algos="));
        assert!(url.contains("key="));
    }

    let out_tar = tmp.path().join("out.tar");
    let workdir = TempDir::new().unwrap();
    pull_image(
        &reference,
        &options("hunter2", true),
        &NoPrompt,
        Arc::clone(&transport) as Arc<dyn BlobTransport>,
        &TarballSink::new(&out_tar),
        workdir.path(),
    )
    .await
    .unwrap();

    assert_eq!(read_sink_layers(&out_tar).await, layers);
}

#[tokio::test]
async fn test_wrong_passphrase_fails_without_output() {
    let layers = vec![noise(5), noise(6)];
    let (transport, reference, tmp) = push_fixture(&layers, "hunter2", false).await;

    let out_tar = tmp.path().join("out.tar");
    let workdir = TempDir::new().unwrap();
    let err = pull_image(
        &reference,
        &options("wrong", false),
        &NoPrompt,
        Arc::clone(&transport) as Arc<dyn BlobTransport>,
        &TarballSink::new(&out_tar),
        workdir.path(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, EnclayerError::Crypto(_)));
    assert!(!out_tar.exists());

    // No decrypted plaintext may be left in the working directory.
    let plains: Vec<_> = fs::read_dir(workdir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "plain"))
        .collect();
    assert!(plains.is_empty());
}

#[tokio::test]
async fn test_bit_flipped_ciphertext_aborts_pull() {
    let layers = vec![noise(7), noise(8)];
    let (transport, reference, tmp) = push_fixture(&layers, "hunter2", false).await;

    transport.flip_byte_in_largest_blob();

    let out_tar = tmp.path().join("out.tar");
    let workdir = TempDir::new().unwrap();
    let err = pull_image(
        &reference,
        &options("hunter2", false),
        &NoPrompt,
        Arc::clone(&transport) as Arc<dyn BlobTransport>,
        &TarballSink::new(&out_tar),
        workdir.path(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, EnclayerError::Crypto(_)));
    assert!(!out_tar.exists());
}

#[tokio::test]
async fn test_layer_order_is_preserved() {
    let layers = vec![noise(10), noise(11), noise(12)];
    let (transport, reference, tmp) = push_fixture(&layers, "hunter2", false).await;

    let out_tar = tmp.path().join("out.tar");
    let workdir = TempDir::new().unwrap();
    pull_image(
        &reference,
        &options("hunter2", false),
        &NoPrompt,
        Arc::clone(&transport) as Arc<dyn BlobTransport>,
        &TarballSink::new(&out_tar),
        workdir.path(),
    )
    .await
    .unwrap();

    assert_eq!(read_sink_layers(&out_tar).await, layers);
}

#[tokio::test]
async fn test_identical_plaintext_layers_roundtrip() {
    // Two layers with byte-identical content share a plaintext digest;
    // their encrypt tasks must not collide, and every manifest digest
    // must match the blob the registry actually holds.
    let layers = vec![noise(60), noise(60), noise(61)];
    let (transport, reference, tmp) = push_fixture(&layers, "hunter2", false).await;

    {
        let manifest: serde_json::Value =
            serde_json::from_str(&transport.manifest_for(&reference)).unwrap();
        let blobs = transport.blobs.lock().unwrap();
        for layer in manifest["layers"].as_array().unwrap() {
            let digest = layer["digest"].as_str().unwrap();
            let stored = blobs.get(digest).expect("manifest digest is stored");
            assert_eq!(sha256_digest(stored), digest);
            assert_eq!(stored.len() as u64, layer["size"].as_u64().unwrap());
        }
    }

    let out_tar = tmp.path().join("out.tar");
    let workdir = TempDir::new().unwrap();
    pull_image(
        &reference,
        &options("hunter2", false),
        &NoPrompt,
        Arc::clone(&transport) as Arc<dyn BlobTransport>,
        &TarballSink::new(&out_tar),
        workdir.path(),
    )
    .await
    .unwrap();

    assert_eq!(read_sink_layers(&out_tar).await, layers);
}

#[tokio::test]
async fn test_pull_of_plain_manifest_never_prompts() {
    let transport = Arc::new(MemoryTransport::default());
    let reference = ImageReference::parse("ghcr.io/acme/plain:1").unwrap();

    // Hand-build an unencrypted image in the fake registry.
    let tmp = TempDir::new().unwrap();
    let config_data = br#"{"architecture":"amd64"}"#.to_vec();
    let layer_data = noise(20);
    let config_digest = sha256_digest(&config_data);
    let layer_digest = sha256_digest(&layer_data);
    transport
        .blobs
        .lock()
        .unwrap()
        .extend([(config_digest.clone(), config_data), (layer_digest.clone(), layer_data.clone())]);
    let manifest = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
        "config": {
            "digest": config_digest,
            "mediaType": "application/vnd.docker.container.image.v1+json",
            "size": 24,
        },
        "layers": [{
            "digest": layer_digest,
            "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
            "size": 1024,
        }],
    });
    transport
        .manifests
        .lock()
        .unwrap()
        .insert(reference.canonical(), manifest.to_string());

    // Passphrase source is Prompt, but nothing is encrypted, so the
    // panicking prompter must never fire.
    let opts = EncryptionOptions::new(EncAlgo::Pbkdf2Aes256Gcm, false, PassphraseSource::Prompt);
    let out_tar = tmp.path().join("out.tar");
    let workdir = TempDir::new().unwrap();
    pull_image(
        &reference,
        &opts,
        &NoPrompt,
        Arc::clone(&transport) as Arc<dyn BlobTransport>,
        &TarballSink::new(&out_tar),
        workdir.path(),
    )
    .await
    .unwrap();

    assert_eq!(read_sink_layers(&out_tar).await, vec![layer_data]);
}

#[tokio::test]
async fn test_empty_urls_is_missing_encryption_key() {
    let transport = Arc::new(MemoryTransport::default());
    let reference = ImageReference::parse("ghcr.io/acme/broken:1").unwrap();

    let tmp = TempDir::new().unwrap();
    let config_data = br#"{"architecture":"amd64"}"#.to_vec();
    let layer_data = noise(40);
    let config_digest = sha256_digest(&config_data);
    let layer_digest = sha256_digest(&layer_data);
    transport.blobs.lock().unwrap().extend([
        (config_digest.clone(), config_data),
        (layer_digest.clone(), layer_data),
    ]);
    let manifest = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
        "config": {
            "digest": config_digest,
            "mediaType": "application/vnd.docker.container.image.v1+json",
            "size": 24,
        },
        "layers": [{
            "digest": layer_digest,
            "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
            "size": 1024,
            "urls": [],
        }],
    });
    transport
        .manifests
        .lock()
        .unwrap()
        .insert(reference.canonical(), manifest.to_string());

    let out_tar = tmp.path().join("out.tar");
    let workdir = TempDir::new().unwrap();
    let err = pull_image(
        &reference,
        &options("hunter2", false),
        &NoPrompt,
        Arc::clone(&transport) as Arc<dyn BlobTransport>,
        &TarballSink::new(&out_tar),
        workdir.path(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, EnclayerError::InputMalformed(_)));
    assert!(err.to_string().contains("missing encryption key"));
    assert!(!out_tar.exists());
}

#[tokio::test]
async fn test_compat_and_new_forms_decrypt_identically() {
    let layers = vec![noise(30)];
    let (new_transport, reference, tmp) = push_fixture(&layers, "hunter2", false).await;
    let (compat_transport, _, _tmp2) = push_fixture(&layers, "hunter2", true).await;

    for (transport, name) in [(new_transport, "new.tar"), (compat_transport, "compat.tar")] {
        let out_tar = tmp.path().join(name);
        let workdir = TempDir::new().unwrap();
        pull_image(
            &reference,
            &options("hunter2", false),
            &NoPrompt,
            transport as Arc<dyn BlobTransport>,
            &TarballSink::new(&out_tar),
            workdir.path(),
        )
        .await
        .unwrap();
        assert_eq!(read_sink_layers(&out_tar).await, layers, "{name}");
    }
}

fn sha256_digest(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    format!("sha256:{:x}", Sha256::digest(data))
}
