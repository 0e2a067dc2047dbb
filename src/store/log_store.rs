//! Encrypted whole-file message log
//!
//! The entire log is one encrypted blob. Every append reloads, extends,
//! re-encrypts and atomically replaces the file while holding the store's
//! write lock, so appends through one store never lose each other.

use crate::config::{Config, Passphrase};
use crate::crypto::CipherEngine;
use crate::error::{Error, Result};
use crate::store::{IncomingMessage, MessageRecord};
use chrono::Utc;
use std::ffi::OsString;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tokio::task;
use tracing::{debug, info, warn};

/// Outcome of loading a log that could be read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogState {
    /// No file at the configured path
    Absent,
    /// File decrypted and parsed
    Loaded(Vec<MessageRecord>),
}

impl LogState {
    pub fn into_records(self) -> Vec<MessageRecord> {
        match self {
            LogState::Absent => Vec::new(),
            LogState::Loaded(records) => records,
        }
    }
}

/// Owns the log path and the cipher used for it
pub struct MessageStore {
    /// Encrypted log file
    path: PathBuf,
    /// Cipher holding the derived key
    engine: CipherEngine,
    /// Held for the whole read-modify-write span
    write_lock: Mutex<()>,
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// `<path>.corrupt-<millis>`, or `<path>.corrupt-<millis>-<n>` when that
/// name is already taken
async fn unused_quarantine_path(path: &Path, stamp: i64) -> Result<PathBuf> {
    let mut dest = with_suffix(path, &format!(".corrupt-{}", stamp));
    let mut n = 1;
    while fs::try_exists(&dest).await? {
        dest = with_suffix(path, &format!(".corrupt-{}-{}", stamp, n));
        n += 1;
    }
    Ok(dest)
}

/// Stage `data` in a uniquely named file inside `dir`, fsync it, rename it
/// over `path` and fsync `dir`.
///
/// The staging file is created 0600 and is removed if any step before the
/// rename fails.
fn replace_file(dir: &Path, path: &Path, data: &[u8]) -> Result<()> {
    let mut staging = tempfile::Builder::new()
        .prefix(".msgvault-")
        .suffix(".staging")
        .tempfile_in(dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        staging
            .as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }

    staging.write_all(data)?;
    staging.as_file().sync_all()?;
    staging.persist(path).map_err(std::io::Error::from)?;
    fsync_dir(dir)
}

fn fsync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        let handle = std::fs::File::open(dir)?;
        handle.sync_all()?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

impl MessageStore {
    pub fn new(path: impl Into<PathBuf>, engine: CipherEngine) -> Self {
        MessageStore {
            path: path.into(),
            engine,
            write_lock: Mutex::new(()),
        }
    }

    /// Derive the key and open the store at the configured path
    pub fn from_config(config: &Config, passphrase: &Passphrase) -> Result<Self> {
        let engine = CipherEngine::from_config(&config.encryption, passphrase)?;
        Ok(MessageStore::new(config.store.path.clone(), engine))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn engine(&self) -> &CipherEngine {
        &self.engine
    }

    /// Load the full log, distinguishing a missing file from an unreadable one.
    ///
    /// Any failure to read, decrypt or parse an existing file is returned
    /// as [`Error::Unreadable`].
    pub async fn load(&self) -> Result<LogState> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No message log at {:?}", self.path);
                return Ok(LogState::Absent);
            }
            Err(e) => return Err(self.unreadable(Error::Io(e))),
        };

        let records = self.decode(&raw).map_err(|e| self.unreadable(e))?;
        debug!("Loaded {} records from {:?}", records.len(), self.path);
        Ok(LogState::Loaded(records))
    }

    /// Read every record, oldest first.
    ///
    /// A missing log is empty. An unreadable log is logged and also
    /// reported as empty; use [`MessageStore::load`] to tell them apart.
    pub async fn read_all(&self) -> Vec<MessageRecord> {
        match self.load().await {
            Ok(state) => state.into_records(),
            Err(e) => {
                warn!("Treating message log as empty: {}", e);
                Vec::new()
            }
        }
    }

    /// Append one record at the tail of the log and rewrite the file.
    ///
    /// Refuses with [`Error::Unreadable`] rather than replacing a log that
    /// exists but cannot be loaded.
    pub async fn append(&self, incoming: IncomingMessage) -> Result<MessageRecord> {
        let record = MessageRecord::from_incoming(incoming)?;

        let _guard = self.write_lock.lock().await;

        let mut records = self.load().await?.into_records();
        records.push(record.clone());

        let blob = self.encode(&records)?;
        self.write_atomic(blob.as_bytes()).await?;

        info!(
            "Appended record {} to {:?} ({} total)",
            record.iso_timestamp(),
            self.path,
            records.len()
        );
        Ok(record)
    }

    /// Move the current log file aside so the next append starts fresh.
    ///
    /// Returns the new location, or `None` if there was no file.
    pub async fn quarantine(&self) -> Result<Option<PathBuf>> {
        let _guard = self.write_lock.lock().await;

        if !fs::try_exists(&self.path).await? {
            return Ok(None);
        }

        let dest = unused_quarantine_path(&self.path, Utc::now().timestamp_millis()).await?;

        match fs::rename(&self.path, &dest).await {
            Ok(()) => {
                warn!("Moved message log {:?} aside to {:?}", self.path, dest);
                Ok(Some(dest))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn decode(&self, raw: &str) -> Result<Vec<MessageRecord>> {
        let plaintext = self.engine.decrypt(raw.trim())?;
        Ok(serde_json::from_str(&plaintext)?)
    }

    fn encode(&self, records: &[MessageRecord]) -> Result<String> {
        let json = serde_json::to_string(records)?;
        self.engine.encrypt(&json)
    }

    fn unreadable(&self, source: Error) -> Error {
        Error::Unreadable {
            path: self.path.clone(),
            source: Box::new(source),
        }
    }

    /// Replace the log with `data` through a private staging file
    async fn write_atomic(&self, data: &[u8]) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).await?;

        let len = data.len();
        let path = self.path.clone();
        let data = data.to_vec();
        task::spawn_blocking(move || replace_file(&dir, &path, &data))
            .await
            .map_err(|e| Error::Internal(format!("write task failed: {}", e)))??;

        debug!("Wrote {} bytes to {:?}", len, self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{CipherScheme, DerivedKey, KEY_SIZE};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn engine_with(byte: u8, scheme: CipherScheme) -> CipherEngine {
        CipherEngine::new(DerivedKey::from_bytes([byte; KEY_SIZE]), scheme)
    }

    fn store_at(path: &Path) -> MessageStore {
        MessageStore::new(path, engine_with(0x42, CipherScheme::Cbc))
    }

    fn texts(records: &[MessageRecord]) -> Vec<&str> {
        records.iter().map(|r| r.text.as_str()).collect()
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_missing_log_is_empty() {
        let dir = tempdir().unwrap();
        let store = store_at(&dir.path().join("messages.log"));

        assert!(store.read_all().await.is_empty());
        assert_eq!(store.load().await.unwrap(), LogState::Absent);
    }

    #[tokio::test]
    async fn test_append_then_read() {
        let dir = tempdir().unwrap();
        let store = store_at(&dir.path().join("messages.log"));

        store
            .append(IncomingMessage::new(1_700_000_000, "hello"))
            .await
            .unwrap();

        let records = store.read_all().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text, "hello");
        assert_eq!(records[0].iso_timestamp(), "2023-11-14T22:13:20.000Z");
    }

    #[tokio::test]
    async fn test_order_preserved() {
        let dir = tempdir().unwrap();
        let store = store_at(&dir.path().join("messages.log"));

        store.append(IncomingMessage::new(200, "A")).await.unwrap();
        store.append(IncomingMessage::new(100, "B")).await.unwrap();

        let records = store.read_all().await;
        assert_eq!(texts(&records), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_file_is_single_cbc_blob() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("messages.log");
        let store = store_at(&path);

        store.append(IncomingMessage::new(1, "secret words")).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("secret words"));
        let (iv, _) = raw.split_once(':').unwrap();
        assert_eq!(iv.len(), 32);

        let json = store.engine().decrypt(&raw).unwrap();
        assert_eq!(
            json,
            r#"[{"date":"1970-01-01T00:00:01.000Z","message":"secret words"}]"#
        );
        assert_eq!(dir_entries(dir.path()), vec!["messages.log"]);
    }

    #[tokio::test]
    async fn test_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("messages.log");
        let store = store_at(&path);

        store.append(IncomingMessage::new(1, "x")).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_corrupt_log_is_not_overwritten() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("messages.log");
        std::fs::write(&path, "definitely not a blob").unwrap();
        let store = store_at(&path);

        assert!(store.read_all().await.is_empty());

        match store.load().await {
            Err(Error::Unreadable { source, .. }) => assert!(source.is_format()),
            other => panic!("expected unreadable, got {:?}", other),
        }

        let err = store.append(IncomingMessage::new(1, "new")).await.unwrap_err();
        assert!(matches!(err, Error::Unreadable { .. }));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "definitely not a blob"
        );
    }

    #[tokio::test]
    async fn test_wrong_key_is_unreadable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("messages.log");

        let writer = store_at(&path);
        writer.append(IncomingMessage::new(1, "first")).await.unwrap();
        writer.append(IncomingMessage::new(2, "second")).await.unwrap();

        let reader = MessageStore::new(&path, engine_with(0x07, CipherScheme::Cbc));
        assert!(matches!(reader.load().await, Err(Error::Unreadable { .. })));
        assert!(reader.read_all().await.is_empty());
        assert!(reader.append(IncomingMessage::new(3, "third")).await.is_err());

        assert_eq!(writer.read_all().await.len(), 2);
    }

    #[tokio::test]
    async fn test_quarantine_then_fresh_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("messages.log");
        std::fs::write(&path, "garbage").unwrap();
        let store = store_at(&path);

        let moved = store.quarantine().await.unwrap().unwrap();
        assert!(!path.exists());
        assert_eq!(std::fs::read_to_string(&moved).unwrap(), "garbage");

        store.append(IncomingMessage::new(5, "fresh")).await.unwrap();
        assert_eq!(texts(&store.read_all().await), vec!["fresh"]);
    }

    #[tokio::test]
    async fn test_quarantine_keeps_earlier_copies() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("messages.log");
        let store = store_at(&path);

        std::fs::write(&path, "first garbage").unwrap();
        let first = store.quarantine().await.unwrap().unwrap();
        std::fs::write(&path, "second garbage").unwrap();
        let second = store.quarantine().await.unwrap().unwrap();

        assert_ne!(first, second);
        assert_eq!(std::fs::read_to_string(&first).unwrap(), "first garbage");
        assert_eq!(std::fs::read_to_string(&second).unwrap(), "second garbage");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_quarantine_name_skips_taken_names() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("messages.log");

        assert_eq!(
            unused_quarantine_path(&path, 42).await.unwrap(),
            with_suffix(&path, ".corrupt-42")
        );

        std::fs::write(with_suffix(&path, ".corrupt-42"), "older").unwrap();
        std::fs::write(with_suffix(&path, ".corrupt-42-1"), "older still").unwrap();
        assert_eq!(
            unused_quarantine_path(&path, 42).await.unwrap(),
            with_suffix(&path, ".corrupt-42-2")
        );
    }

    #[tokio::test]
    async fn test_quarantine_without_log() {
        let dir = tempdir().unwrap();
        let store = store_at(&dir.path().join("messages.log"));

        assert_eq!(store.quarantine().await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_lose_nothing() {
        let dir = tempdir().unwrap();
        let store = Arc::new(store_at(&dir.path().join("messages.log")));

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .append(IncomingMessage::new(i, format!("msg-{}", i)))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let records = store.read_all().await;
        assert_eq!(records.len(), 16);
        for i in 0..16 {
            let expected = format!("msg-{}", i);
            assert!(records.iter().any(|r| r.text == expected), "{} lost", expected);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_two_stores_on_one_path_never_fail_to_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("messages.log");
        let a = store_at(&path);
        let b = store_at(&path);

        for round in 0..50 {
            let (ra, rb) = tokio::join!(
                a.append(IncomingMessage::new(round, format!("a-{}", round))),
                b.append(IncomingMessage::new(round, format!("b-{}", round))),
            );
            ra.unwrap();
            rb.unwrap();
        }

        // Separate stores do not share a lock, so updates may be lost,
        // but every write lands whole and no staging file is left behind.
        let records = match a.load().await.unwrap() {
            LogState::Loaded(records) => records,
            LogState::Absent => panic!("log missing"),
        };
        assert!(!records.is_empty());
        assert_eq!(dir_entries(dir.path()), vec!["messages.log"]);
    }

    #[tokio::test]
    async fn test_gcm_store_upgrades_cbc_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("messages.log");

        let legacy = store_at(&path);
        legacy.append(IncomingMessage::new(1, "old")).await.unwrap();

        let upgraded = MessageStore::new(&path, engine_with(0x42, CipherScheme::Gcm));
        upgraded.append(IncomingMessage::new(2, "new")).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let (nonce, _) = raw.split_once(':').unwrap();
        assert_eq!(nonce.len(), 24);
        assert_eq!(texts(&upgraded.read_all().await), vec!["old", "new"]);

        // The CBC-only reader no longer understands the file
        assert!(legacy.load().await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_log_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("messages.log");
        store_at(&path)
            .append(IncomingMessage::new(1, "x"))
            .await
            .unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
