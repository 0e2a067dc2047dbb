//! Message store module
//!
//! Keeps the chronological message log as a single encrypted file and
//! rewrites it whole on every append.

mod log_store;
mod record;

pub use log_store::{LogState, MessageStore};
pub use record::{IncomingMessage, MessageRecord, NO_TEXT_SENTINEL};
