//! Cryptography module for msgvault
//!
//! Argon2id stretches the passphrase into a 256-bit key. The log is
//! encrypted as one text blob, `<ivHex>:<cipherHex>`, with AES-256-CBC
//! (default, unauthenticated) or AES-256-GCM (opt-in, authenticated).

pub mod aead;
pub mod aes_cbc;
mod blob;
mod engine;
mod kdf;

pub use blob::EncryptedBlob;
pub use engine::{CipherEngine, CipherScheme};
pub use kdf::{derive_key, DerivedKey, FIXED_SALT};

/// Size of AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of CBC initialization vector in bytes
pub const IV_SIZE: usize = 16;

/// Size of GCM nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Size of GCM authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// Minimum salt length accepted by Argon2
pub const MIN_SALT_SIZE: usize = 8;
