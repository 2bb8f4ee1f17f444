//! Enclayer CLI entry point.

use std::error::Error;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use enclayer_cli::commands::{dispatch, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing; --verbose lowers the default filter to debug.
    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();

    let verbose = cli.verbose;
    if let Err(e) = dispatch(cli).await {
        eprintln!("Error: {e}");
        if verbose {
            let mut cause = e.source();
            while let Some(err) = cause {
                eprintln!("  caused by: {err}");
                cause = err.source();
            }
        }
        std::process::exit(1);
    }
}
