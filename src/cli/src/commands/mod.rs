//! CLI command definitions and dispatch.

mod pull;
mod push;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use zeroize::Zeroizing;

use enclayer_core::config::{EncAlgo, EncryptionOptions, PassphraseSource, Prompter};
use enclayer_core::error::Result;

/// Enclayer — encrypted container image distribution.
///
/// Emulates push and pull against a registry, but encrypts and MACs
/// image blobs before upload and verifies and decrypts them after
/// download. Images are not signed; confidentiality only.
#[derive(Parser)]
#[command(name = "enclayer", version, about)]
pub struct Cli {
    /// Print debug logs, and error causes on failure
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory to hold temporary working files
    #[arg(long, global = true)]
    pub temp: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Encrypt a local image tarball and upload it to a registry
    Push(push::PushArgs),
    /// Download an image from a registry, decrypting it to a tarball
    Pull(pull::PullArgs),
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> std::result::Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Push(args) => push::execute(args, cli.temp).await,
        Command::Pull(args) => pull::execute(args, cli.temp).await,
    }
}

/// Prompts for the passphrase on the controlling terminal.
pub(crate) struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn prompt(&self, message: &str) -> Result<String> {
        rpassword::prompt_password(message)
            .map_err(enclayer_core::error::EnclayerError::Io)
    }
}

/// Build encryption options from the shared command flags.
pub(crate) fn encryption_options(
    pass: Option<String>,
    algo: &str,
    compat: bool,
) -> Result<EncryptionOptions> {
    let algos: EncAlgo = algo.parse()?;
    let passphrase = match pass {
        Some(pass) => PassphraseSource::Provided(Zeroizing::new(pass)),
        None => PassphraseSource::Prompt,
    };
    Ok(EncryptionOptions::new(algos, compat, passphrase))
}

/// Create the scratch directory for one command invocation. Dropped
/// (and removed) when the command finishes, clean exit or not.
pub(crate) fn workdir(parent: Option<PathBuf>) -> std::io::Result<tempfile::TempDir> {
    match parent {
        Some(dir) => {
            std::fs::create_dir_all(&dir)?;
            tempfile::TempDir::new_in(dir)
        }
        None => tempfile::TempDir::new(),
    }
}
