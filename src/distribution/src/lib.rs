//! Enclayer Distribution
//!
//! Encrypted container image distribution: the blob encryption state
//! machine, the manifest codec that carries encrypted key objects, and
//! the push/pull pipeline over pluggable transport and layer adaptors.
//!
//! # Architecture
//!
//! ```text
//! push:  LayerSource ──▶ encrypt ──▶ BlobTransport ──▶ manifest upload
//! pull:  manifest fetch ──▶ BlobTransport ──▶ decrypt ──▶ LayerSink
//! ```
//!
//! The registry only ever sees ciphertext blobs plus a manifest whose
//! key objects are either an inline `crypto` field or, in compat mode,
//! a synthetic `urls` entry accepted by unmodified registries.

pub mod blob;
pub mod crypto;
pub mod manifest;
pub mod pipeline;
pub mod reference;
pub mod tarball;
pub mod transport;

pub use blob::{Blob, BlobDesc, CompatBlob, DeCrypto, EnCrypto, EncryptedBlob, KeyDecryptedBlob, PlainBlob};
pub use manifest::Manifest;
pub use pipeline::{pull_image, push_image};
pub use reference::ImageReference;
pub use tarball::{ImageContents, LayerSink, LayerSource, TarballSink, TarballSource};
pub use transport::{BlobTransport, RegistryAuth, RegistryTransport};
