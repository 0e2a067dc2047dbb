//! AES-256-GCM Encryption Implementation
//!
//! Opt-in replacement for the CBC format. Same `<nonceHex>:<cipherHex>`
//! framing, but the ciphertext carries a 16-byte tag so any modification
//! is detected:
//! - Confidentiality: Data is encrypted
//! - Integrity: Any tampering is detected
//! - Authentication: Verifies the data came from the key holder

use crate::crypto::{DerivedKey, EncryptedBlob, NONCE_SIZE, TAG_SIZE};
use crate::error::{Error, Result};
use rand::RngCore;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use tracing::debug;

/// Associated data bound to every log blob
const LOG_AAD: &[u8] = b"msgvault-log-v1";

/// Encrypt text using AES-256-GCM under a fresh random nonce
pub fn encrypt(plaintext: &str, key: &DerivedKey) -> Result<EncryptedBlob> {
    let unbound_key = UnboundKey::new(&AES_256_GCM, key.as_bytes())
        .map_err(|_| Error::Crypto("Failed to create encryption key".to_string()))?;
    let sealing_key = LessSafeKey::new(unbound_key);

    // Generate random nonce
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = plaintext.as_bytes().to_vec();
    in_out.reserve(TAG_SIZE);

    sealing_key
        .seal_in_place_append_tag(nonce, Aad::from(LOG_AAD), &mut in_out)
        .map_err(|_| Error::Crypto("Encryption failed".to_string()))?;

    debug!("GCM encrypted {} bytes", plaintext.len());

    Ok(EncryptedBlob {
        iv: nonce_bytes.to_vec(),
        ciphertext: in_out,
    })
}

/// Decrypt a `<nonceHex>:<cipherHex>` blob back to text
pub fn decrypt(blob: &str, key: &DerivedKey) -> Result<String> {
    let blob = EncryptedBlob::parse(blob, NONCE_SIZE)?;
    let plaintext = decrypt_bytes(&blob, key)?;

    String::from_utf8(plaintext)
        .map_err(|e| Error::Crypto(format!("Decrypted data is not UTF-8: {}", e)))
}

/// Decrypt a parsed blob to raw bytes
pub fn decrypt_bytes(blob: &EncryptedBlob, key: &DerivedKey) -> Result<Vec<u8>> {
    if blob.iv.len() != NONCE_SIZE {
        return Err(Error::Format(format!(
            "Invalid nonce length: {}",
            blob.iv.len()
        )));
    }

    if blob.ciphertext.len() < TAG_SIZE {
        return Err(Error::Crypto("Ciphertext too short".to_string()));
    }

    let unbound_key = UnboundKey::new(&AES_256_GCM, key.as_bytes())
        .map_err(|_| Error::Crypto("Failed to create decryption key".to_string()))?;
    let opening_key = LessSafeKey::new(unbound_key);

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    nonce_bytes.copy_from_slice(&blob.iv);
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = blob.ciphertext.clone();
    let plaintext = opening_key
        .open_in_place(nonce, Aad::from(LOG_AAD), &mut in_out)
        .map_err(|_| {
            Error::Crypto("Decryption failed - data corrupted or wrong key".to_string())
        })?;

    Ok(plaintext.to_vec())
}
