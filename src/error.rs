//! Error types for msgvault

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for msgvault
#[derive(Error, Debug)]
pub enum Error {
    // Crypto errors
    /// The blob text does not have the `<iv>:<ciphertext>` shape
    #[error("Malformed blob: {0}")]
    Format(String),

    /// Hex decoding, padding, authentication or UTF-8 failure
    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    // Store errors
    #[error("Invalid timestamp: {0} seconds since epoch")]
    InvalidTimestamp(i64),

    #[error("Message log at {} exists but cannot be read: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: Box<Error>,
    },

    // Config errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for blob framing failures
    pub fn is_format(&self) -> bool {
        matches!(self, Error::Format(_))
    }

    /// True for decryption failures (bad hex, padding, tag, wrong key)
    pub fn is_crypto(&self) -> bool {
        matches!(self, Error::Crypto(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
