//! Enclayer Core - Foundational Types
//!
//! Error type, result alias, encryption options, and the passphrase
//! policy shared by the enclayer crates.

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{EncAlgo, EncryptionOptions, PassphraseSource, Prompter};
pub use error::{EnclayerError, Result};

/// Enclayer version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
