//! Textual blob framing: `<ivHex>:<cipherHex>`

use crate::error::{Error, Result};
use std::fmt;

/// Separator between the IV and ciphertext segments
const SEPARATOR: char = ':';

/// Encrypted payload with the IV (or nonce) it was produced under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedBlob {
    /// IV for CBC, nonce for GCM
    pub iv: Vec<u8>,
    /// Ciphertext (GCM: with appended tag)
    pub ciphertext: Vec<u8>,
}

impl EncryptedBlob {
    /// Split a blob on its first separator without decoding either half
    pub fn split(text: &str) -> Result<(&str, &str)> {
        text.split_once(SEPARATOR).ok_or_else(|| {
            Error::Format(format!("missing '{}' separator", SEPARATOR))
        })
    }

    /// Parse a blob whose IV segment must decode to exactly `iv_size` bytes.
    ///
    /// A wrong segment length is a format error; bad hex in either segment
    /// is a crypto error.
    pub fn parse(text: &str, iv_size: usize) -> Result<Self> {
        let (iv_hex, cipher_hex) = Self::split(text)?;

        if iv_hex.len() != iv_size * 2 {
            return Err(Error::Format(format!(
                "IV segment must be {} hex characters, got {}",
                iv_size * 2,
                iv_hex.len()
            )));
        }

        let iv = hex::decode(iv_hex)
            .map_err(|e| Error::Crypto(format!("invalid IV hex: {}", e)))?;
        let ciphertext = hex::decode(cipher_hex)
            .map_err(|e| Error::Crypto(format!("invalid ciphertext hex: {}", e)))?;

        Ok(EncryptedBlob { iv, ciphertext })
    }
}

impl fmt::Display for EncryptedBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            hex::encode(&self.iv),
            SEPARATOR,
            hex::encode(&self.ciphertext)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_lowercase_hex() {
        let blob = EncryptedBlob {
            iv: vec![0xAB; 16],
            ciphertext: vec![0x0F, 0xF0],
        };

        assert_eq!(blob.to_string(), format!("{}:0ff0", "ab".repeat(16)));
    }

    #[test]
    fn test_split_uses_first_separator() {
        let (iv, rest) = EncryptedBlob::split("aa:bb:cc").unwrap();
        assert_eq!(iv, "aa");
        assert_eq!(rest, "bb:cc");
    }

    #[test]
    fn test_missing_separator() {
        let err = EncryptedBlob::parse("deadbeef", 16).unwrap_err();
        assert!(err.is_format());
    }

    #[test]
    fn test_wrong_iv_length() {
        let err = EncryptedBlob::parse(&format!("{}:00", "a".repeat(30)), 16).unwrap_err();
        assert!(err.is_format());
    }

    #[test]
    fn test_bad_hex_is_crypto_error() {
        let err = EncryptedBlob::parse(&format!("{}:00", "zz".repeat(16)), 16).unwrap_err();
        assert!(err.is_crypto());

        let err = EncryptedBlob::parse(&format!("{}:abc", "00".repeat(16)), 16).unwrap_err();
        assert!(err.is_crypto());
    }
}
