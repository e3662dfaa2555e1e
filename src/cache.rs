//! Content-addressed disk cache for extraction results.
//!
//! Entries live at `<root>/<md5-of-file>.json` as
//! `{"extracted_text": ..., "profile_data": {...}}`. Writes go through a temp
//! file in the same directory and are renamed into place, so readers never see
//! a partial entry.

use crate::schema::ProfileData;
use anyhow::{Context, Result};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as SyncMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub extracted_text: String,
    pub profile_data: ProfileData,
}

/// Hex MD5 digest of the file bytes.
pub fn cache_key(data: &[u8]) -> String {
    format!("{:x}", Md5::digest(data))
}

type KeyLocks = Arc<SyncMutex<HashMap<String, Arc<Mutex<()>>>>>;

#[derive(Clone)]
pub struct ProfileCache {
    root: PathBuf,
    locks: KeyLocks,
}

/// Holds one key's lock. The key's map entry is dropped with the last holder.
pub struct KeyGuard {
    key: String,
    locks: KeyLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        self.guard.take();
        if let Ok(mut locks) = self.locks.lock() {
            // Only the map itself still references an idle lock.
            if locks.get(&self.key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                locks.remove(&self.key);
            }
        }
    }
}

impl ProfileCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Arc::new(SyncMutex::new(HashMap::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", key))
    }

    /// Exclusive lock for one key. Held across a miss so concurrent uploads of
    /// the same file extract once.
    pub async fn lock_key(&self, key: &str) -> KeyGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap();
            locks.entry(key.to_string()).or_default().clone()
        };
        KeyGuard {
            key: key.to_string(),
            locks: self.locks.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Cached entry for `key`. Unreadable or corrupt entries count as misses.
    pub async fn load(&self, key: &str) -> Option<CacheEntry> {
        let path = self.entry_path(key);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Cache read failed for {:?}: {}", path, e);
                return None;
            }
        };

        match serde_json::from_slice(&raw) {
            Ok(entry) => {
                debug!("Cache hit: {}", key);
                Some(entry)
            }
            Err(e) => {
                warn!("Ignoring corrupt cache entry {:?}: {}", path, e);
                None
            }
        }
    }

    pub async fn store(&self, key: &str, entry: &CacheEntry) -> Result<PathBuf> {
        let json = serde_json::to_vec_pretty(entry).context("Failed to serialize cache entry")?;
        let root = self.root.clone();
        let path = self.entry_path(key);

        let written = tokio::task::spawn_blocking(move || -> Result<PathBuf> {
            std::fs::create_dir_all(&root)
                .with_context(|| format!("Failed to create cache dir {:?}", root))?;
            let mut tmp = tempfile::NamedTempFile::new_in(&root)
                .context("Failed to create temp cache file")?;
            tmp.write_all(&json).context("Failed to write cache entry")?;
            tmp.persist(&path)
                .with_context(|| format!("Failed to persist cache entry {:?}", path))?;
            Ok(path)
        })
        .await
        .context("Cache write task failed")??;

        debug!("Cached {} -> {:?}", key, written);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ProfileData;

    fn entry(name: &str) -> CacheEntry {
        let mut profile = ProfileData::default();
        profile.persoenliche_daten.name = name.to_string();
        CacheEntry {
            extracted_text: format!("Lebenslauf {}", name),
            profile_data: profile,
        }
    }

    #[test]
    fn test_key_is_pure_function_of_bytes() {
        let a = b"Lebenslauf Erika Musterfrau".to_vec();
        let mut flipped = a.clone();
        flipped[0] ^= 0b0000_0001;

        assert_eq!(cache_key(&a), cache_key(&a.clone()));
        assert_ne!(cache_key(&a), cache_key(&flipped));
        assert_eq!(cache_key(b""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[tokio::test]
    async fn test_store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ProfileCache::new(dir.path().join("parser_cache"));
        let key = cache_key(b"cv");

        assert!(cache.load(&key).await.is_none());
        let path = cache.store(&key, &entry("Erika")).await.unwrap();
        assert_eq!(path, cache.entry_path(&key));

        let loaded = cache.load(&key).await.unwrap();
        assert_eq!(loaded.extracted_text, "Lebenslauf Erika");
        assert_eq!(loaded.profile_data.persoenliche_daten.name, "Erika");
    }

    #[tokio::test]
    async fn test_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ProfileCache::new(dir.path());
        let path = cache.store("abc", &entry("Erika")).await.unwrap();

        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(value["extracted_text"], "Lebenslauf Erika");
        assert_eq!(value["profile_data"]["persönliche_daten"]["name"], "Erika");
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_miss_and_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ProfileCache::new(dir.path());
        std::fs::write(cache.entry_path("abc"), b"{\"extracted_text\": ").unwrap();

        assert!(cache.load("abc").await.is_none());
        cache.store("abc", &entry("Neu")).await.unwrap();
        assert_eq!(
            cache.load("abc").await.unwrap().profile_data.persoenliche_daten.name,
            "Neu"
        );
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ProfileCache::new(dir.path());
        cache.store("abc", &entry("A")).await.unwrap();
        cache.store("abc", &entry("B")).await.unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["abc.json".to_string()]);
    }

    #[tokio::test]
    async fn test_key_lock_serialises_holders() {
        let cache = ProfileCache::new("/unused");
        let guard = cache.lock_key("k").await;

        let other = cache.clone();
        let waiter = tokio::spawn(async move {
            let _g = other.lock_key("k").await;
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        // A different key is independent.
        let _free = cache.lock_key("other").await;

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_key_locks_are_pruned() {
        let cache = ProfileCache::new("/unused");
        let first = cache.lock_key("k").await;
        assert_eq!(cache.locks.lock().unwrap().len(), 1);

        let other = cache.clone();
        let waiter = tokio::spawn(async move {
            let _g = other.lock_key("k").await;
        });
        tokio::task::yield_now().await;

        // The waiter still references the lock, so the entry survives.
        drop(first);
        assert!(cache.locks.lock().unwrap().contains_key("k"));

        waiter.await.unwrap();
        assert!(cache.locks.lock().unwrap().is_empty());

        drop(cache.lock_key("a").await);
        drop(cache.lock_key("b").await);
        assert!(cache.locks.lock().unwrap().is_empty());
    }
}
