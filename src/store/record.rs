//! Log records and the raw shape they are ingested from

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Text stored when an incoming message carries none
pub const NO_TEXT_SENTINEL: &str = "(no text)";

fn no_text() -> String {
    NO_TEXT_SENTINEL.to_string()
}

/// Raw record as delivered by the message source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Seconds since the Unix epoch
    #[serde(rename = "date")]
    pub epoch_seconds: i64,
    /// Message text, absent for stickers, media and the like
    #[serde(default)]
    pub text: Option<String>,
}

impl IncomingMessage {
    pub fn new(epoch_seconds: i64, text: impl Into<String>) -> Self {
        IncomingMessage {
            epoch_seconds,
            text: Some(text.into()),
        }
    }
}

/// One entry of the message log.
///
/// Persisted as `{"date": "<ISO-8601>", "message": "<text>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    #[serde(rename = "date", with = "iso_millis")]
    pub timestamp: DateTime<Utc>,

    #[serde(rename = "message", default = "no_text")]
    pub text: String,
}

impl MessageRecord {
    pub fn new(timestamp: DateTime<Utc>, text: impl Into<String>) -> Self {
        MessageRecord {
            timestamp,
            text: text.into(),
        }
    }

    /// Convert an incoming message, substituting the sentinel for missing text
    pub fn from_incoming(incoming: IncomingMessage) -> Result<Self> {
        let timestamp = DateTime::<Utc>::from_timestamp(incoming.epoch_seconds, 0)
            .ok_or(Error::InvalidTimestamp(incoming.epoch_seconds))?;

        Ok(MessageRecord {
            timestamp,
            text: incoming.text.unwrap_or_else(no_text),
        })
    }

    /// Timestamp as `YYYY-MM-DDTHH:MM:SS.mmmZ`
    pub fn iso_timestamp(&self) -> String {
        iso_millis::format(&self.timestamp)
    }
}

/// ISO-8601 with millisecond precision and a `Z` suffix
mod iso_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn format(timestamp: &DateTime<Utc>) -> String {
        timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn serialize<S>(timestamp: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format(timestamp))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
