//! Encryption options and the passphrase policy.
//!
//! The core never reads process-wide state: callers hand an explicit
//! [`EncryptionOptions`] record to the pipeline, and interactive input
//! goes through an injected [`Prompter`] so library code never touches
//! a terminal.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroizing;

use crate::error::{EnclayerError, Result};

/// Supported encryption algorithm identifiers.
///
/// The set is closed and versioned: an identifier pins the key
/// derivation parameters together with the AEAD, so decryption is
/// refused when parameters are implied by a different identifier than
/// the one recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncAlgo {
    /// PBKDF2-HMAC-SHA256 key wrapping with AES-256-GCM payloads.
    #[default]
    Pbkdf2Aes256Gcm,
}

impl EncAlgo {
    /// Wire identifier for this algorithm.
    pub fn as_str(&self) -> &'static str {
        match self {
            EncAlgo::Pbkdf2Aes256Gcm => "PBKDF2-AES256-GCM",
        }
    }
}

impl fmt::Display for EncAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncAlgo {
    type Err = EnclayerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PBKDF2-AES256-GCM" => Ok(EncAlgo::Pbkdf2Aes256Gcm),
            _ => Err(EnclayerError::InputMalformed("unknown algorithm".to_string())),
        }
    }
}

impl Serialize for EncAlgo {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EncAlgo {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(|_| serde::de::Error::custom("unknown algorithm"))
    }
}

/// Where the passphrase comes from.
#[derive(Clone)]
pub enum PassphraseSource {
    /// Supplied up front (e.g. via `--pass`).
    Provided(Zeroizing<String>),
    /// Ask interactively the first time a cryptographic operation needs it.
    Prompt,
}

impl fmt::Debug for PassphraseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print the passphrase itself.
        match self {
            PassphraseSource::Provided(_) => f.write_str("Provided(..)"),
            PassphraseSource::Prompt => f.write_str("Prompt"),
        }
    }
}

/// Interactive passphrase prompt, injected by the front end.
pub trait Prompter: Send + Sync {
    /// Prompt the user once and return what they entered.
    fn prompt(&self, message: &str) -> Result<String>;
}

/// Options controlling how image blobs are encrypted and encoded.
#[derive(Debug, Clone)]
pub struct EncryptionOptions {
    /// Algorithm for key wrapping and blob sealing.
    pub algos: EncAlgo,
    /// Encode key objects through the `urls` field for registries that
    /// reject unknown manifest fields.
    pub compat: bool,
    passphrase: PassphraseSource,
}

impl EncryptionOptions {
    pub fn new(algos: EncAlgo, compat: bool, passphrase: PassphraseSource) -> Self {
        Self {
            algos,
            compat,
            passphrase,
        }
    }

    /// Resolve the passphrase, prompting if none was provided.
    ///
    /// An empty passphrase counts as "not provided" and triggers the
    /// prompt; an empty answer to the prompt is rejected.
    pub fn resolve_passphrase(&self, prompter: &dyn Prompter) -> Result<Zeroizing<String>> {
        if let PassphraseSource::Provided(pass) = &self.passphrase {
            if !pass.is_empty() {
                return Ok(pass.clone());
            }
        }

        let entered = prompter.prompt("Passphrase: ")?;
        if entered.is_empty() {
            return Err(EnclayerError::UserAbort(
                "empty passphrase".to_string(),
            ));
        }
        Ok(Zeroizing::new(entered))
    }
}
