//! # Record Storage Module
//!
//! Append-only collection of relaxation values keyed by sequence id
//! (`data00001`, `data00002`, ...), each stamped by the store when written.
//!
//! ## Architecture
//! - **RecordStore**: storage primitives (count, put, latest, clear)
//! - **MemoryRecordStore**: in-process map (test builds only)
//! - **FileRecordStore**: JSON document on disk (`records.json`)
//! - **RecordLog**: assigns sequence ids on top of any `RecordStore`
//!
//! ## Sequencing
//! The id is derived from the number of stored records at append time. In
//! `Legacy` mode the count and the write are two independent store calls, so
//! two overlapping appends can read the same count and produce the same id
//! (the second write replaces the first). `Serialized` mode runs the count
//! and the write under one async lock, which makes ids strictly increasing
//! for every append going through the same `RecordLog`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use crate::config::SequenceMode;
use crate::error::StoreError;

/// Stored body of one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredValue {
    /// Relaxation value in seconds
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// A record together with its id
#[derive(Debug, Clone, PartialEq)]
pub struct RelaxationRecord {
    pub sequence_id: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl RelaxationRecord {
    fn from_entry(id: &str, stored: &StoredValue) -> Self {
        Self {
            sequence_id: id.to_string(),
            value: stored.value,
            timestamp: stored.timestamp,
        }
    }
}

/// `data` followed by the 1-based position, zero-padded to five digits
pub fn sequence_id(position: usize) -> String {
    format!("data{:05}", position)
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Number of stored records
    async fn count(&self) -> Result<usize, StoreError>;

    /// Write `value` under `id`, replacing any record with the same id.
    /// The store assigns the timestamp.
    async fn put(&self, id: &str, value: f64) -> Result<RelaxationRecord, StoreError>;

    /// Most recent record by timestamp
    async fn latest(&self) -> Result<Option<RelaxationRecord>, StoreError>;

    /// Remove every record
    async fn clear(&self) -> Result<(), StoreError>;
}

fn latest_of(entries: &BTreeMap<String, StoredValue>) -> Option<RelaxationRecord> {
    entries
        .iter()
        .max_by(|a, b| a.1.timestamp.cmp(&b.1.timestamp).then_with(|| a.0.cmp(b.0)))
        .map(|(id, stored)| RelaxationRecord::from_entry(id, stored))
}

fn poisoned() -> StoreError {
    StoreError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        "record store lock poisoned",
    ))
}

#[cfg(test)]
#[derive(Default)]
pub struct MemoryRecordStore {
    entries: Mutex<BTreeMap<String, StoredValue>>,
}

#[cfg(test)]
impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored records ordered by id
    pub fn snapshot(&self) -> Vec<RelaxationRecord> {
        match self.entries.lock() {
            Ok(entries) => entries
                .iter()
                .map(|(id, stored)| RelaxationRecord::from_entry(id, stored))
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.entries.lock().map_err(|_| poisoned())?.len())
    }

    async fn put(&self, id: &str, value: f64) -> Result<RelaxationRecord, StoreError> {
        let stored = StoredValue {
            value,
            timestamp: Utc::now(),
        };
        let record = RelaxationRecord::from_entry(id, &stored);
        self.entries
            .lock()
            .map_err(|_| poisoned())?
            .insert(id.to_string(), stored);
        Ok(record)
    }

    async fn latest(&self) -> Result<Option<RelaxationRecord>, StoreError> {
        let entries = self.entries.lock().map_err(|_| poisoned())?;
        Ok(latest_of(&entries))
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.entries.lock().map_err(|_| poisoned())?.clear();
        Ok(())
    }
}

/// Record store persisted as one JSON object `{ "data00001": {value, timestamp}, ... }`
pub struct FileRecordStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, StoredValue>>,
}

impl FileRecordStore {
    pub const FILE_NAME: &'static str = "records.json";

    /// Open the store at `path`, starting empty if the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries: BTreeMap<String, StoredValue> = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StoreError::Io(e)),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn open_in_dir(dir: &Path) -> Result<Self, StoreError> {
        Self::open(dir.join(Self::FILE_NAME))
    }

    fn persist(&self, entries: &BTreeMap<String, StoredValue>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents =
            serde_json::to_string_pretty(entries).map_err(|e| StoreError::Encode(e.to_string()))?;
        // Write to a sibling file first so a crash never leaves half a document
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.entries.lock().map_err(|_| poisoned())?.len())
    }

    async fn put(&self, id: &str, value: f64) -> Result<RelaxationRecord, StoreError> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        let stored = StoredValue {
            value,
            timestamp: Utc::now(),
        };
        let record = RelaxationRecord::from_entry(id, &stored);
        let previous = entries.insert(id.to_string(), stored);
        if let Err(e) = self.persist(&entries) {
            // Keep memory and disk in agreement
            match previous {
                Some(old) => entries.insert(id.to_string(), old),
                None => entries.remove(id),
            };
            return Err(e);
        }
        Ok(record)
    }

    async fn latest(&self) -> Result<Option<RelaxationRecord>, StoreError> {
        let entries = self.entries.lock().map_err(|_| poisoned())?;
        Ok(latest_of(&entries))
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| poisoned())?;
        self.persist(&BTreeMap::new())?;
        entries.clear();
        Ok(())
    }
}

/// Appends relaxation values with sequential ids
pub struct RecordLog {
    store: Arc<dyn RecordStore>,
    mode: SequenceMode,
    writer: tokio::sync::Mutex<()>,
}

impl RecordLog {
    pub fn new(store: Arc<dyn RecordStore>, mode: SequenceMode) -> Self {
        Self {
            store,
            mode,
            writer: tokio::sync::Mutex::new(()),
        }
    }

    pub fn mode(&self) -> SequenceMode {
        self.mode
    }

    /// Store `value` under the next sequence id and return the new record
    pub async fn append(&self, value: f64) -> Result<RelaxationRecord, StoreError> {
        match self.mode {
            SequenceMode::Serialized => {
                let _writer = self.writer.lock().await;
                self.count_then_put(value).await
            }
            SequenceMode::Legacy => self.count_then_put(value).await,
        }
    }

    async fn count_then_put(&self, value: f64) -> Result<RelaxationRecord, StoreError> {
        let count = self.store.count().await?;
        let id = sequence_id(count + 1);
        let record = self.store.put(&id, value).await?;
        log::info!("Saved relaxation {:.4} s as {}", value, id);
        Ok(record)
    }

    pub async fn latest(&self) -> Result<Option<RelaxationRecord>, StoreError> {
        self.store.latest().await
    }

    /// Empty the underlying store; used when starting from a blank store
    pub async fn reset(&self) -> Result<(), StoreError> {
        let _writer = self.writer.lock().await;
        self.store.clear().await?;
        log::info!("Record store cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Yields between reading the count and returning it, so overlapping
    /// appends interleave the way slow network stores do
    struct SlowCountStore {
        inner: MemoryRecordStore,
    }

    #[async_trait]
    impl RecordStore for SlowCountStore {
        async fn count(&self) -> Result<usize, StoreError> {
            let count = self.inner.count().await?;
            tokio::task::yield_now().await;
            Ok(count)
        }

        async fn put(&self, id: &str, value: f64) -> Result<RelaxationRecord, StoreError> {
            self.inner.put(id, value).await
        }

        async fn latest(&self) -> Result<Option<RelaxationRecord>, StoreError> {
            self.inner.latest().await
        }

        async fn clear(&self) -> Result<(), StoreError> {
            self.inner.clear().await
        }
    }

    fn slow_store() -> Arc<SlowCountStore> {
        Arc::new(SlowCountStore {
            inner: MemoryRecordStore::new(),
        })
    }

    #[test]
    fn test_sequence_id_format() {
        assert_eq!(sequence_id(1), "data00001");
        assert_eq!(sequence_id(42), "data00042");
        assert_eq!(sequence_id(99999), "data99999");
    }

    #[tokio::test]
    async fn test_sequential_appends() {
        let store = Arc::new(MemoryRecordStore::new());
        let log = RecordLog::new(store.clone(), SequenceMode::Serialized);

        assert_eq!(log.append(1.2).await.unwrap().sequence_id, "data00001");
        assert_eq!(log.append(1.3).await.unwrap().sequence_id, "data00002");
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_legacy_sequential_appends() {
        let store = Arc::new(MemoryRecordStore::new());
        let log = RecordLog::new(store, SequenceMode::Legacy);

        assert_eq!(log.append(1.2).await.unwrap().sequence_id, "data00001");
        assert_eq!(log.append(1.3).await.unwrap().sequence_id, "data00002");
    }

    #[tokio::test]
    async fn test_legacy_overlapping_appends_collide() {
        let store = slow_store();
        let log = RecordLog::new(store.clone(), SequenceMode::Legacy);

        let (a, b) = tokio::join!(log.append(1.0), log.append(2.0));
        assert_eq!(a.unwrap().sequence_id, "data00001");
        assert_eq!(b.unwrap().sequence_id, "data00001");
        // the second write replaced the first
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_serialized_overlapping_appends_are_unique() {
        let store = slow_store();
        let log = RecordLog::new(store.clone(), SequenceMode::Serialized);

        let (a, b, c) = tokio::join!(log.append(1.0), log.append(2.0), log.append(3.0));
        let mut ids = vec![
            a.unwrap().sequence_id,
            b.unwrap().sequence_id,
            c.unwrap().sequence_id,
        ];
        ids.sort();
        assert_eq!(ids, vec!["data00001", "data00002", "data00003"]);
        assert_eq!(store.inner.snapshot().len(), 3);
    }

    #[tokio::test]
    async fn test_latest_by_timestamp() {
        let store = Arc::new(MemoryRecordStore::new());
        let log = RecordLog::new(store, SequenceMode::Serialized);
        assert_eq!(log.latest().await.unwrap(), None);

        log.append(1.1).await.unwrap();
        log.append(1.4).await.unwrap();

        let latest = log.latest().await.unwrap().unwrap();
        assert_eq!(latest.sequence_id, "data00002");
        assert_eq!(latest.value, 1.4);
    }

    #[tokio::test]
    async fn test_reset_starts_numbering_over() {
        let store = Arc::new(MemoryRecordStore::new());
        let log = RecordLog::new(store, SequenceMode::Serialized);
        log.append(1.0).await.unwrap();
        log.append(1.0).await.unwrap();

        log.reset().await.unwrap();
        assert_eq!(log.append(1.0).await.unwrap().sequence_id, "data00001");
    }

    #[tokio::test]
    async fn test_file_store_persists_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = Arc::new(FileRecordStore::open_in_dir(dir.path()).unwrap());
            let log = RecordLog::new(store, SequenceMode::Serialized);
            log.append(1.25).await.unwrap();
            log.append(1.5).await.unwrap();
        }

        let reopened = Arc::new(FileRecordStore::open_in_dir(dir.path()).unwrap());
        assert_eq!(reopened.count().await.unwrap(), 2);
        let log = RecordLog::new(reopened, SequenceMode::Serialized);
        assert_eq!(log.append(1.75).await.unwrap().sequence_id, "data00003");
        assert_eq!(log.latest().await.unwrap().unwrap().value, 1.75);
    }

    #[tokio::test]
    async fn test_file_store_latest() {
        let dir = tempdir().unwrap();
        let store = FileRecordStore::open_in_dir(dir.path()).unwrap();
        assert_eq!(store.latest().await.unwrap(), None);

        store.put("data00001", 1.1).await.unwrap();
        store.put("data00002", 1.3).await.unwrap();

        let latest = store.latest().await.unwrap().unwrap();
        assert_eq!(latest.sequence_id, "data00002");
        assert_eq!(latest.value, 1.3);
    }

    #[tokio::test]
    async fn test_file_store_clear() {
        let dir = tempdir().unwrap();
        let store = FileRecordStore::open_in_dir(dir.path()).unwrap();
        store.put("data00001", 1.0).await.unwrap();
        store.clear().await.unwrap();

        let reopened = FileRecordStore::open_in_dir(dir.path()).unwrap();
        assert_eq!(reopened.count().await.unwrap(), 0);
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(FileRecordStore::FILE_NAME), "not json").unwrap();
        assert!(matches!(
            FileRecordStore::open_in_dir(dir.path()),
            Err(StoreError::Corrupt(_))
        ));
    }
}
