//! Persisted dashboard cache.
//!
//! Provides:
//! - A `KeyValueStore` abstraction with in-memory and file-backed impls
//! - `DashboardCache`, the typed view over the three cache keys
//!
//! The file store rewrites its whole map on every mutation (temp file +
//! rename) while holding an exclusive `fs2` lock on a sidecar lock file, so
//! readers never observe a half-written map and writers never lose each
//! other's keys.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, TimeZone, Utc};
use fs2::FileExt;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::record::EventRecord;

pub const LAST_FETCH_TIME_KEY: &str = "lastFetchTime";
pub const LAST_DATA_KEY: &str = "lastDashboardData";
pub const LAST_UPDATED_KEY: &str = "lastDashboardUpdated";

/// String key/value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.set_many(&[(key, value.to_string())])
    }

    /// Write several keys as one unit.
    fn set_many(&self, entries: &[(&str, String)]) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;

    fn clear(&self) -> Result<()>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set_many(&self, entries: &[(&str, String)]) -> Result<()> {
        (**self).set_many(entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }

    fn clear(&self) -> Result<()> {
        (**self).clear()
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::StoreError("store lock poisoned".to_string())
}

/// In-memory store, mostly for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().map_err(poisoned)?.get(key).cloned())
    }

    fn set_many(&self, entries: &[(&str, String)]) -> Result<()> {
        let mut map = self.entries.write().map_err(poisoned)?;
        for (key, value) in entries {
            map.insert((*key).to_string(), value.clone());
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().map_err(poisoned)?.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.entries.write().map_err(poisoned)?.clear();
        Ok(())
    }
}

/// JSON-file backed store.
///
/// Every read goes to disk and every mutation re-reads the file under the
/// lock, so several handles (or processes) on one path see each other's writes.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Open (or lazily create) a store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
        };
        let entries = store.read_map()?;
        debug!(path = %store.path.display(), keys = entries.len(), "Opened dashboard store");
        Ok(store)
    }

    fn read_map(&self) -> Result<HashMap<String, String>> {
        match fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(HashMap::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    fn acquire_lock(&self) -> Result<File> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.lock_path())
            .map_err(|e| Error::StoreError(format!("Failed to open lock file: {}", e)))?;
        lock_file
            .lock_exclusive()
            .map_err(|e| Error::StoreError(format!("Failed to lock store: {}", e)))?;
        Ok(lock_file)
    }

    /// Re-read the file, apply `mutate` and persist the result atomically.
    fn commit<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut HashMap<String, String>),
    {
        let lock_file = self.acquire_lock()?;
        let result = self.read_map().and_then(|mut map| {
            mutate(&mut map);
            let tmp = self.path.with_extension("tmp");
            fs::write(&tmp, serde_json::to_vec(&map)?)?;
            fs::rename(&tmp, &self.path)?;
            Ok(())
        });
        let _ = lock_file.unlock();
        result
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_map()?.remove(key))
    }

    fn set_many(&self, entries: &[(&str, String)]) -> Result<()> {
        self.commit(|map| {
            for (key, value) in entries {
                map.insert((*key).to_string(), value.clone());
            }
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.commit(|map| {
            map.remove(key);
        })
    }

    fn clear(&self) -> Result<()> {
        self.commit(HashMap::clear)
    }
}

/// Typed access to the dashboard's persisted keys.
#[derive(Debug, Clone)]
pub struct DashboardCache<S> {
    store: S,
}

impl<S: KeyValueStore> DashboardCache<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn read_millis(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let raw = self.store.get(key)?;
        Ok(raw
            .and_then(|v| v.trim().parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()))
    }

    /// Wall-clock time of the last scheduled fetch attempt.
    pub fn last_fetch_time(&self) -> Result<Option<DateTime<Utc>>> {
        self.read_millis(LAST_FETCH_TIME_KEY)
    }

    pub fn set_last_fetch_time(&self, at: DateTime<Utc>) -> Result<()> {
        self.store
            .set(LAST_FETCH_TIME_KEY, &at.timestamp_millis().to_string())
    }

    /// Half-hour mark the cached records belong to.
    pub fn last_updated(&self) -> Result<Option<DateTime<Utc>>> {
        self.read_millis(LAST_UPDATED_KEY)
    }

    /// Records from the last successful fetch. Unreadable data is treated as
    /// absent.
    pub fn load_records(&self) -> Result<Option<Vec<EventRecord>>> {
        let Some(raw) = self.store.get(LAST_DATA_KEY)? else {
            return Ok(None);
        };
        match serde_json::from_str::<Vec<Value>>(&raw) {
            Ok(items) => Ok(Some(
                items.iter().filter_map(EventRecord::from_value).collect(),
            )),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable cached dashboard data");
                Ok(None)
            }
        }
    }

    /// Persist records together with their half-hour mark.
    pub fn store_snapshot(&self, records: &[EventRecord], mark: DateTime<Utc>) -> Result<()> {
        let data = serde_json::to_string(records)?;
        self.store.set_many(&[
            (LAST_DATA_KEY, data),
            (LAST_UPDATED_KEY, mark.timestamp_millis().to_string()),
        ])
    }

    pub fn clear(&self) -> Result<()> {
        self.store.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn mark() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 14, 0, 0).unwrap()
    }

    fn records() -> Vec<EventRecord> {
        vec![
            EventRecord::new("A", "2024-01-01T10:00", true),
            EventRecord::new("B", "2024-01-01T11:00", false),
        ]
    }

    #[test]
    fn memory_store_basic_ops() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
        store.set("a", "1").unwrap();
        store.clear().unwrap();
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn cache_round_trips_snapshot() {
        let cache = DashboardCache::new(MemoryStore::new());
        assert!(cache.load_records().unwrap().is_none());
        assert!(cache.last_updated().unwrap().is_none());

        cache.store_snapshot(&records(), mark()).unwrap();

        assert_eq!(cache.load_records().unwrap(), Some(records()));
        assert_eq!(cache.last_updated().unwrap(), Some(mark()));
        assert_eq!(
            cache.store().get(LAST_UPDATED_KEY).unwrap(),
            Some(mark().timestamp_millis().to_string())
        );
    }

    #[test]
    fn unparseable_values_read_as_absent() {
        let store = MemoryStore::new();
        store.set(LAST_UPDATED_KEY, "not-a-number").unwrap();
        store.set(LAST_DATA_KEY, "{broken").unwrap();
        let cache = DashboardCache::new(store);
        assert_eq!(cache.last_updated().unwrap(), None);
        assert_eq!(cache.load_records().unwrap(), None);
    }

    #[test]
    fn last_fetch_time_is_separate_from_snapshot() {
        let cache = DashboardCache::new(MemoryStore::new());
        cache.set_last_fetch_time(mark()).unwrap();
        assert_eq!(cache.last_fetch_time().unwrap(), Some(mark()));
        assert_eq!(cache.last_updated().unwrap(), None);
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("dashboard.json");

        {
            let cache = DashboardCache::new(FileStore::open(&path).unwrap());
            cache.store_snapshot(&records(), mark()).unwrap();
            cache.set_last_fetch_time(mark()).unwrap();
        }

        let cache = DashboardCache::new(FileStore::open(&path).unwrap());
        assert_eq!(cache.load_records().unwrap(), Some(records()));
        assert_eq!(cache.last_updated().unwrap(), Some(mark()));
        assert_eq!(cache.last_fetch_time().unwrap(), Some(mark()));
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn file_store_clear_empties_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dashboard.json");
        let store = FileStore::open(&path).unwrap();
        store.set("a", "1").unwrap();
        store.clear().unwrap();

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get("a").unwrap(), None);
    }

    #[test]
    fn file_store_clear_is_seen_by_other_handles() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dashboard.json");
        let runner = DashboardCache::new(FileStore::open(&path).unwrap());
        let admin = DashboardCache::new(FileStore::open(&path).unwrap());

        runner.store_snapshot(&records(), mark()).unwrap();
        assert_eq!(admin.load_records().unwrap(), Some(records()));

        admin.clear().unwrap();
        assert_eq!(runner.load_records().unwrap(), None);

        runner.set_last_fetch_time(mark()).unwrap();
        let reopened = DashboardCache::new(FileStore::open(&path).unwrap());
        assert_eq!(reopened.load_records().unwrap(), None);
        assert_eq!(reopened.last_updated().unwrap(), None);
        assert_eq!(reopened.last_fetch_time().unwrap(), Some(mark()));
    }

    #[test]
    fn file_store_merges_writes_from_two_handles() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dashboard.json");
        let first = FileStore::open(&path).unwrap();
        let second = FileStore::open(&path).unwrap();

        first.set("a", "1").unwrap();
        second.set("b", "2").unwrap();
        first.remove("missing").unwrap();

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get("a").unwrap().as_deref(), Some("1"));
        assert_eq!(reopened.get("b").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn file_store_rejects_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dashboard.json");
        fs::write(&path, "not json").unwrap();
        let err = FileStore::open(&path).unwrap_err();
        assert!(matches!(err, Error::SerializationError(_)));
    }

    #[test]
    fn shared_store_through_arc() {
        let store = Arc::new(MemoryStore::new());
        let cache = DashboardCache::new(Arc::clone(&store));
        cache.store_snapshot(&records(), mark()).unwrap();
        assert!(store.get(LAST_DATA_KEY).unwrap().is_some());
    }
}
