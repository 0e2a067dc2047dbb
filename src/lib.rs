//! msgvault - Encrypted-at-rest message log
//!
//! Keeps a chronological log of short text records in a single file,
//! encrypted under a key stretched from a passphrase. The whole log is
//! decrypted on read and re-encrypted on every append.

pub mod config;
pub mod crypto;
pub mod error;
pub mod store;
pub mod transcript;

pub use config::Config;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, Passphrase};
    pub use crate::crypto::{CipherEngine, CipherScheme};
    pub use crate::error::{Error, Result};
    pub use crate::store::{IncomingMessage, LogState, MessageRecord, MessageStore};
}
