//! Scheme-selecting cipher front end used by the message store

use crate::config::{EncryptionConfig, Passphrase};
use crate::crypto::{aead, aes_cbc, derive_key, DerivedKey, EncryptedBlob, IV_SIZE, NONCE_SIZE};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Cipher used when writing the log
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum CipherScheme {
    /// AES-256-CBC, no integrity protection
    #[default]
    #[serde(rename = "aes-256-cbc")]
    Cbc,

    /// AES-256-GCM, authenticated
    #[serde(rename = "aes-256-gcm")]
    Gcm,
}

impl std::str::FromStr for CipherScheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aes-256-cbc" | "cbc" => Ok(CipherScheme::Cbc),
            "aes-256-gcm" | "gcm" => Ok(CipherScheme::Gcm),
            other => Err(Error::InvalidConfig(format!("Unknown cipher scheme: {}", other))),
        }
    }
}

/// Encrypts and decrypts whole-log blobs with one derived key
#[derive(Debug, Clone)]
pub struct CipherEngine {
    key: DerivedKey,
    scheme: CipherScheme,
}

impl CipherEngine {
    pub fn new(key: DerivedKey, scheme: CipherScheme) -> Self {
        CipherEngine { key, scheme }
    }

    /// Derive the key from a passphrase using the configured cost parameters
    pub fn from_config(config: &EncryptionConfig, passphrase: &Passphrase) -> Result<Self> {
        let key = derive_key(passphrase.expose(), config)?;
        Ok(CipherEngine::new(key, config.scheme))
    }

    pub fn scheme(&self) -> CipherScheme {
        self.scheme
    }

    /// Encrypt with the configured scheme
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let blob = match self.scheme {
            CipherScheme::Cbc => aes_cbc::encrypt(plaintext, &self.key)?,
            CipherScheme::Gcm => aead::encrypt(plaintext, &self.key)?,
        };
        Ok(blob.to_string())
    }

    /// Decrypt a blob.
    ///
    /// Under CBC only CBC blobs are accepted. Under GCM a 32-character IV
    /// segment is still read as CBC so older logs stay readable and are
    /// rewritten as GCM on the next append.
    pub fn decrypt(&self, blob: &str) -> Result<String> {
        match self.scheme {
            CipherScheme::Cbc => aes_cbc::decrypt(blob, &self.key),
            CipherScheme::Gcm => {
                let (iv_hex, _) = EncryptedBlob::split(blob)?;
                match iv_hex.len() {
                    n if n == NONCE_SIZE * 2 => aead::decrypt(blob, &self.key),
                    n if n == IV_SIZE * 2 => {
                        debug!("Reading legacy CBC blob under GCM scheme");
                        aes_cbc::decrypt(blob, &self.key)
                    }
                    n => Err(Error::Format(format!(
                        "IV segment must be {} or {} hex characters, got {}",
                        NONCE_SIZE * 2,
                        IV_SIZE * 2,
                        n
                    ))),
                }
            }
        }
    }
}
