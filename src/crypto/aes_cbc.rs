//! AES-256-CBC with PKCS#7 padding
//!
//! This is the on-disk format of the message log. It provides
//! confidentiality only: there is no MAC, so a modified ciphertext is
//! detected only when the modification happens to break the padding.

use crate::crypto::{DerivedKey, EncryptedBlob, IV_SIZE};
use crate::error::{Error, Result};
use aes::Aes256;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Encrypt text under a fresh random IV
pub fn encrypt(plaintext: &str, key: &DerivedKey) -> Result<EncryptedBlob> {
    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);

    encrypt_with_iv(plaintext.as_bytes(), key, iv)
}

/// Encrypt under a caller-chosen IV. Never reuse an IV with the same key.
pub(crate) fn encrypt_with_iv(
    plaintext: &[u8],
    key: &DerivedKey,
    iv: [u8; IV_SIZE],
) -> Result<EncryptedBlob> {
    let cipher = Aes256CbcEnc::new_from_slices(key.as_bytes(), &iv)
        .map_err(|e| Error::Crypto(format!("Failed to create CBC encryptor: {}", e)))?;

    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    debug!(
        "CBC encrypted {} bytes into {} bytes",
        plaintext.len(),
        ciphertext.len()
    );

    Ok(EncryptedBlob {
        iv: iv.to_vec(),
        ciphertext,
    })
}

/// Decrypt a `<ivHex>:<cipherHex>` blob back to text.
///
/// Fails with [`Error::Format`] when the separator is missing or the IV
/// segment is not 32 hex characters, and with [`Error::Crypto`] on bad
/// hex, bad padding (tampering or wrong key) or non-UTF-8 output.
pub fn decrypt(blob: &str, key: &DerivedKey) -> Result<String> {
    let blob = EncryptedBlob::parse(blob, IV_SIZE)?;
    let plaintext = decrypt_bytes(&blob, key)?;

    String::from_utf8(plaintext)
        .map_err(|e| Error::Crypto(format!("Decrypted data is not UTF-8: {}", e)))
}

/// Decrypt a parsed blob to raw bytes
pub fn decrypt_bytes(blob: &EncryptedBlob, key: &DerivedKey) -> Result<Vec<u8>> {
    if blob.iv.len() != IV_SIZE {
        return Err(Error::Format(format!(
            "Invalid IV length: {}",
            blob.iv.len()
        )));
    }

    let cipher = Aes256CbcDec::new_from_slices(key.as_bytes(), &blob.iv)
        .map_err(|e| Error::Crypto(format!("Failed to create CBC decryptor: {}", e)))?;

    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(&blob.ciphertext)
        .map_err(|_| Error::Crypto("Invalid padding - data corrupted or wrong key".to_string()))
}
