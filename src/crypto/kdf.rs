//! Passphrase key derivation
//!
//! Argon2id with a fixed, compiled-in salt unless the configuration
//! supplies a per-installation one. Two deployments sharing a passphrase
//! and the fixed salt derive the same key.

use crate::config::EncryptionConfig;
use crate::crypto::{KEY_SIZE, MIN_SALT_SIZE};
use crate::error::{Error, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use std::fmt;
use zeroize::Zeroizing;

/// Salt used when the configuration does not provide one
pub const FIXED_SALT: &[u8] = b"msgvault/message-log/v1";

/// 256-bit key stretched from a passphrase
#[derive(Clone)]
pub struct DerivedKey {
    key: Zeroizing<[u8; KEY_SIZE]>,
}

impl DerivedKey {
    /// Wrap raw key material
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        DerivedKey {
            key: Zeroizing::new(bytes),
        }
    }

    /// Get the raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl PartialEq for DerivedKey {
    fn eq(&self, other: &Self) -> bool {
        self.key[..] == other.key[..]
    }
}

impl Eq for DerivedKey {}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey(..)")
    }
}

/// Derive a key from a passphrase.
///
/// Deterministic in (passphrase, salt, cost parameters). An empty
/// passphrase still yields a key.
pub fn derive_key(passphrase: &str, config: &EncryptionConfig) -> Result<DerivedKey> {
    let salt: &[u8] = if config.salt.is_empty() {
        FIXED_SALT
    } else {
        &config.salt
    };

    if salt.len() < MIN_SALT_SIZE {
        return Err(Error::KeyDerivation(format!(
            "salt must be at least {} bytes, got {}",
            MIN_SALT_SIZE,
            salt.len()
        )));
    }

    let params = Params::new(
        config.argon2_memory_kib,
        config.argon2_iterations,
        config.argon2_parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| Error::KeyDerivation(format!("invalid Argon2 parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut key[..])
        .map_err(|e| Error::KeyDerivation(format!("Argon2 failed: {}", e)))?;

    Ok(DerivedKey { key })
}
