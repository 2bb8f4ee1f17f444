use thiserror::Error;

/// Enclayer error types
#[derive(Error, Debug)]
pub enum EnclayerError {
    /// Malformed reference, manifest, or blob metadata
    #[error("invalid input: {0}")]
    InputMalformed(String),

    /// Key derivation, RNG, or AEAD failure
    #[error("cryptographic failure: {0}")]
    Crypto(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Upload/download failure reported by the blob transport
    #[error("transport error: {0}")]
    Transport(String),

    /// Cancellation or rejected passphrase prompt
    #[error("aborted: {0}")]
    UserAbort(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for EnclayerError {
    fn from(err: serde_json::Error) -> Self {
        EnclayerError::InputMalformed(err.to_string())
    }
}

/// Result type alias for enclayer operations
pub type Result<T> = std::result::Result<T, EnclayerError>;
