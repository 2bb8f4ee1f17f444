//! `enclayer pull` command — Download an image and decrypt it.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;

use enclayer_distribution::{
    pull_image, BlobTransport, ImageReference, RegistryAuth, RegistryTransport, TarballSink,
};

use super::TerminalPrompter;

#[derive(Args)]
pub struct PullArgs {
    /// Source reference (e.g. "ghcr.io/acme/app:1.4")
    pub image: String,

    /// Tarball path to write the decrypted image to (docker load format)
    #[arg(short, long)]
    pub output: PathBuf,

    /// Passphrase for decryption; prompted for when omitted
    #[arg(short = 'p', long = "pass")]
    pub pass: Option<String>,

    /// Encryption algorithm identifier
    #[arg(short = 't', long = "type", default_value = "PBKDF2-AES256-GCM")]
    pub algo: String,
}

pub async fn execute(
    args: PullArgs,
    temp: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let reference = ImageReference::parse(&args.image)?;
    // The manifest's recorded identifiers drive decryption; the flag is
    // validated so a typo fails before any network traffic.
    let opts = super::encryption_options(args.pass, &args.algo, false)?;
    let workdir = super::workdir(temp)?;

    let sink = TarballSink::new(&args.output).with_repo_tag(reference.canonical());
    let transport: Arc<dyn BlobTransport> =
        Arc::new(RegistryTransport::with_auth(RegistryAuth::from_env()));

    println!("Pulling {reference}...");
    pull_image(
        &reference,
        &opts,
        &TerminalPrompter,
        transport,
        &sink,
        workdir.path(),
    )
    .await?;

    println!("Pulled: {reference} ({})", args.output.display());
    Ok(())
}
