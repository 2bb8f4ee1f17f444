//! `enclayer push` command — Encrypt an image and upload it.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;

use enclayer_distribution::{
    push_image, BlobTransport, ImageReference, RegistryAuth, RegistryTransport, TarballSource,
};

use super::TerminalPrompter;

#[derive(Args)]
pub struct PushArgs {
    /// Target reference (e.g. "ghcr.io/acme/app:1.4")
    pub image: String,

    /// Local image tarball to encrypt and upload (docker save format)
    #[arg(short, long)]
    pub input: PathBuf,

    /// Passphrase for encryption; prompted for when omitted
    #[arg(short = 'p', long = "pass")]
    pub pass: Option<String>,

    /// Encryption algorithm identifier
    #[arg(short = 't', long = "type", default_value = "PBKDF2-AES256-GCM")]
    pub algo: String,

    /// Encode key objects through the urls field, for registries that
    /// reject unknown manifest fields
    #[arg(long)]
    pub compat: bool,
}

pub async fn execute(
    args: PushArgs,
    temp: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let reference = ImageReference::parse(&args.image)?;
    let opts = super::encryption_options(args.pass, &args.algo, args.compat)?;
    let workdir = super::workdir(temp)?;

    let source = TarballSource::new(&args.input);
    let transport: Arc<dyn BlobTransport> =
        Arc::new(RegistryTransport::with_auth(RegistryAuth::from_env()));

    println!("Pushing {reference}...");
    let url = push_image(
        &reference,
        &opts,
        &TerminalPrompter,
        &source,
        transport,
        workdir.path(),
    )
    .await?;

    println!("Pushed: {reference} ({url})");
    Ok(())
}
