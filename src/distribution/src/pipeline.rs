//! Push and pull orchestration.
//!
//! Each blob's encrypt-and-upload (or download-and-decrypt) runs as an
//! independent task under a semaphore sized to the machine's CPU
//! parallelism, which also bounds memory since every in-flight AEAD
//! holds its blob's buffers. Manifest order follows the layer source,
//! not task completion order. The first failure propagates immediately
//! and aborts the remaining tasks; partial files live in the caller's
//! working directory and go away with it.
//!
//! The orchestrator is the only place that holds the passphrase.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use zeroize::Zeroizing;

use enclayer_core::config::{EncryptionOptions, Prompter};
use enclayer_core::error::{EnclayerError, Result};

use crate::blob::{Blob, PlainBlob};
use crate::manifest::{Manifest, MANIFEST_MEDIA_TYPE};
use crate::reference::ImageReference;
use crate::tarball::{ImageContents, LayerSink, LayerSource};
use crate::transport::BlobTransport;

/// Encrypt a local image and upload it under `reference`.
///
/// Blobs are uploaded by digest first; the manifest goes up last, so a
/// failed push never leaves a readable partial image behind.
/// Returns the manifest URL reported by the transport.
pub async fn push_image(
    reference: &ImageReference,
    opts: &EncryptionOptions,
    prompter: &dyn Prompter,
    source: &dyn LayerSource,
    transport: Arc<dyn BlobTransport>,
    workdir: &Path,
) -> Result<String> {
    tracing::info!(reference = %reference, compat = opts.compat, "pushing encrypted image");

    let contents = source.export(workdir).await?;
    let passphrase = opts.resolve_passphrase(prompter)?;

    let mut blobs = Vec::with_capacity(1 + contents.layers.len());
    blobs.push(contents.config);
    blobs.extend(contents.layers);

    let limit = Arc::new(Semaphore::new(default_parallelism()));
    let mut tasks: JoinSet<Result<(usize, Blob)>> = JoinSet::new();

    for (index, plain) in blobs.into_iter().enumerate() {
        let limit = Arc::clone(&limit);
        let transport = Arc::clone(&transport);
        let reference = reference.clone();
        let passphrase = passphrase.clone();
        let algos = opts.algos;
        let compat = opts.compat;
        // Indexed: two layers may share plaintext content, and their
        // tasks must never share a scratch file.
        let dst = workdir.join(format!("{index}-{}.enc", plain.desc.digest_hex()));

        tasks.spawn(async move {
            let _permit = limit
                .acquire_owned()
                .await
                .map_err(|_| EnclayerError::UserAbort("cancelled".to_string()))?;

            let encrypted = plain.encrypt(&passphrase, algos, &dst)?;
            transport
                .upload_blob(&reference, &encrypted.desc.digest, &encrypted.desc.path)
                .await?;

            let blob = if compat {
                Blob::EncryptedCompat(encrypted.into_compat())
            } else {
                Blob::EncryptedNew(encrypted)
            };
            Ok((index, blob))
        });
    }

    let mut slots = collect_ordered(tasks).await?;

    let config = slots.remove(0);
    let manifest = Manifest::new(config, slots);
    let body = manifest.encode()?;

    let url = transport
        .upload_manifest(reference, MANIFEST_MEDIA_TYPE, body)
        .await?;

    tracing::info!(reference = %reference, url = %url, "pushed encrypted image");
    Ok(url)
}

/// Fetch the image at `reference`, decrypt it, and hand the plaintext
/// blobs to the sink in manifest order.
pub async fn pull_image(
    reference: &ImageReference,
    opts: &EncryptionOptions,
    prompter: &dyn Prompter,
    transport: Arc<dyn BlobTransport>,
    sink: &dyn LayerSink,
    workdir: &Path,
) -> Result<()> {
    tracing::info!(reference = %reference, "pulling encrypted image");

    let raw = transport.fetch_manifest(reference).await?;
    let manifest = Manifest::decode(&raw)?;

    // The prompt fires only when something actually needs decrypting.
    let encrypted_count = manifest.layers.iter().filter(|l| l.is_encrypted()).count()
        + usize::from(manifest.config.is_encrypted());
    let passphrase = if encrypted_count > 0 {
        opts.resolve_passphrase(prompter)?
    } else {
        Zeroizing::new(String::new())
    };

    let mut blobs = Vec::with_capacity(1 + manifest.layers.len());
    blobs.push(manifest.config);
    blobs.extend(manifest.layers);

    let limit = Arc::new(Semaphore::new(default_parallelism()));
    let mut tasks: JoinSet<Result<(usize, PlainBlob)>> = JoinSet::new();

    for (index, blob) in blobs.into_iter().enumerate() {
        let limit = Arc::clone(&limit);
        let transport = Arc::clone(&transport);
        let reference = reference.clone();
        let passphrase = passphrase.clone();
        // Indexed: a manifest may list the same digest more than once.
        let fetched = workdir.join(format!("{index}-{}.blob", blob.desc().digest_hex()));
        let plain_dst = workdir.join(format!("{index}-{}.plain", blob.desc().digest_hex()));

        tasks.spawn(async move {
            let _permit = limit
                .acquire_owned()
                .await
                .map_err(|_| EnclayerError::UserAbort("cancelled".to_string()))?;

            transport
                .fetch_blob(&reference, &blob.desc().digest, &fetched)
                .await?;

            let plain = decrypt_fetched(blob, &passphrase, &fetched, &plain_dst)?;
            Ok((index, plain))
        });
    }

    let mut plain = collect_ordered(tasks).await?;

    let config = plain.remove(0);
    sink.load(&ImageContents {
        config,
        layers: plain,
    })
    .await?;

    tracing::info!(reference = %reference, "pulled encrypted image");
    Ok(())
}

/// Run the fetched blob through the decrypt transitions appropriate to
/// its variant.
fn decrypt_fetched(
    mut blob: Blob,
    passphrase: &str,
    fetched: &Path,
    plain_dst: &Path,
) -> Result<PlainBlob> {
    blob.desc_mut().path = fetched.to_path_buf();
    match blob {
        Blob::Plain(plain) => {
            // Unencrypted blob: the fetched bytes are already the payload.
            PlainBlob::from_file(fetched, plain.desc.media_type)
        }
        Blob::EncryptedNew(encrypted) => encrypted.decrypt_blob(passphrase, plain_dst),
        Blob::EncryptedCompat(compat) => compat.decrypt_blob(passphrase, plain_dst),
        Blob::KeyDecrypted(_) => Err(EnclayerError::InputMalformed(
            "manifest cannot reference a partially decrypted blob".to_string(),
        )),
    }
}

/// Await all tasks, reassembling results by their input index. The
/// first failure wins; dropping the set aborts the still-running tasks.
async fn collect_ordered<T: Send + 'static>(mut tasks: JoinSet<Result<(usize, T)>>) -> Result<Vec<T>> {
    let mut slots: Vec<Option<T>> = Vec::new();
    slots.resize_with(tasks.len(), || None);

    while let Some(joined) = tasks.join_next().await {
        let (index, value) =
            joined.map_err(|e| EnclayerError::Other(format!("blob task failed: {e}")))??;
        slots[index] = Some(value);
    }

    slots
        .into_iter()
        .map(|slot| {
            slot.ok_or_else(|| EnclayerError::Other("blob task vanished".to_string()))
        })
        .collect()
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
