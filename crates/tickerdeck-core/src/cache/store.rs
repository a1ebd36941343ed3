//! Durable on-disk cache store.
//!
//! One JSON file per entry, partitioned into a subdirectory per category so
//! that bulk invalidation is a directory removal and corruption of one entry
//! can never affect another. Writes go through a temp file followed by a
//! rename, so a concurrent reader observes either the old entry or the new
//! one, never a torn write.
//!
//! Every read-side failure (missing file, IO error, corrupt JSON) is
//! absorbed into a miss: the orchestrator treats it exactly like absent
//! data and falls through to a live fetch.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::entry::CacheEntry;
use super::error::CacheError;

/// Cap on the readable portion of a cache filename; the hash suffix keeps
/// truncated names unique.
const MAX_STEM_CHARS: usize = 80;

/// File name used by `health_check` probes
const PROBE_FILE: &str = ".probe";

/// Result of a startup storage probe. An unhealthy store is not fatal:
/// consumers proceed with every read treated as a miss.
#[derive(Debug, Clone)]
pub struct StoreHealth {
    pub healthy: bool,
    pub message: String,
}

pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| CacheError::StoreUnavailable(format!("create {}: {}", root.display(), e)))?;
        Ok(Self { root })
    }

    /// Read the entry for `key`, if a readable one exists in any category.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let file_name = Self::entry_file_name(key);
        for dir in self.category_dirs() {
            let path = dir.join(&file_name);
            if !path.exists() {
                continue;
            }
            match Self::read_entry(&path) {
                Ok(entry) if entry.key == key => return Some(entry),
                Ok(entry) => {
                    debug!(key = key, found = %entry.key, "Cache file key mismatch, ignoring");
                }
                Err(e) => {
                    debug!(key = key, path = %path.display(), error = %e, "Failed to read cache entry");
                }
            }
        }
        None
    }

    /// Upsert the entry for `key`. Atomic with respect to concurrent reads;
    /// an existing entry for the key is replaced, even across categories.
    pub fn put(
        &self,
        key: &str,
        category: &str,
        payload: Vec<u8>,
        stored_at: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let dir = self.root.join(Self::sanitize(category));
        fs::create_dir_all(&dir)
            .map_err(|e| CacheError::StoreUnavailable(format!("create {}: {}", dir.display(), e)))?;

        let entry = CacheEntry {
            key: key.to_string(),
            category: category.to_string(),
            stored_at,
            payload,
        };
        let contents = serde_json::to_vec_pretty(&entry)
            .map_err(|e| CacheError::StoreUnavailable(format!("encode entry for {}: {}", key, e)))?;

        let file_name = Self::entry_file_name(key);
        let path = dir.join(&file_name);
        let tmp = dir.join(format!("{}.tmp", file_name));
        fs::write(&tmp, contents)
            .map_err(|e| CacheError::StoreUnavailable(format!("write {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &path)
            .map_err(|e| CacheError::StoreUnavailable(format!("rename {}: {}", path.display(), e)))?;

        // One entry per key: drop any copy left under another category
        for other in self.category_dirs() {
            if other != dir {
                let stale = other.join(&file_name);
                if stale.exists() {
                    let _ = fs::remove_file(stale);
                }
            }
        }

        Ok(())
    }

    /// Remove the entry for `key`, wherever it lives
    pub fn invalidate(&self, key: &str) -> Result<(), CacheError> {
        let file_name = Self::entry_file_name(key);
        for dir in self.category_dirs() {
            let path = dir.join(&file_name);
            if path.exists() {
                fs::remove_file(&path).map_err(|e| {
                    CacheError::StoreUnavailable(format!("remove {}: {}", path.display(), e))
                })?;
            }
        }
        Ok(())
    }

    /// Remove every entry stored under `category`
    pub fn invalidate_category(&self, category: &str) -> Result<(), CacheError> {
        let dir = self.root.join(Self::sanitize(category));
        if !dir.exists() {
            return Ok(());
        }
        fs::remove_dir_all(&dir)
            .map_err(|e| CacheError::StoreUnavailable(format!("remove {}: {}", dir.display(), e)))
    }

    /// Startup probe: write, read back, and remove a marker file.
    pub fn health_check(&self) -> StoreHealth {
        let path = self.root.join(PROBE_FILE);
        let probe = b"tickerdeck-store-probe";

        let result = fs::create_dir_all(&self.root)
            .and_then(|_| fs::write(&path, probe))
            .and_then(|_| fs::read(&path))
            .and_then(|read_back| {
                let _ = fs::remove_file(&path);
                if read_back == probe {
                    Ok(())
                } else {
                    Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "probe read back different contents",
                    ))
                }
            });

        match result {
            Ok(()) => StoreHealth {
                healthy: true,
                message: format!("cache store ready at {}", self.root.display()),
            },
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "Cache store failed health check");
                StoreHealth {
                    healthy: false,
                    message: format!("cache store unavailable at {}: {}", self.root.display(), e),
                }
            }
        }
    }

    // ===== Internals =====

    fn read_entry(path: &Path) -> anyhow::Result<CacheEntry> {
        let contents = fs::read(path)?;
        Ok(serde_json::from_slice(&contents)?)
    }

    fn category_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        let Ok(read_dir) = fs::read_dir(&self.root) else {
            return dirs;
        };
        for entry in read_dir.flatten() {
            let path = entry.path();
            if path.is_dir() {
                dirs.push(path);
            }
        }
        dirs
    }

    /// Filesystem-safe file name for a key: sanitized readable prefix plus a
    /// short content hash so distinct keys can never collide.
    fn entry_file_name(key: &str) -> String {
        let digest = Sha256::digest(key.as_bytes());
        let short: String = digest[..4].iter().map(|b| format!("{:02x}", b)).collect();
        format!("{}-{}.json", Self::sanitize(key), short)
    }

    fn sanitize(name: &str) -> String {
        name.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .take(MAX_STEM_CHARS)
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const QUOTES: &str = "market-quotes";
    const POSTS: &str = "forum-posts";

    fn test_store() -> (tempfile::TempDir, CacheStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("cache")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_put_get_round_trip() {
        let (_dir, store) = test_store();
        let stored_at = Utc::now();
        let payload = br#"[{"ticker":"EURUSD","price":1.08}]"#.to_vec();

        store
            .put("markets:global:Forex:3:EURUSD:JPYUSD", QUOTES, payload.clone(), stored_at)
            .unwrap();

        let entry = store.get("markets:global:Forex:3:EURUSD:JPYUSD").unwrap();
        assert_eq!(entry.payload, payload);
        assert_eq!(entry.category, QUOTES);
        assert_eq!(entry.stored_at, stored_at);
    }

    #[test]
    fn test_get_missing_is_none() {
        let (_dir, store) = test_store();
        assert!(store.get("markets:global:Forex:3:EURUSD").is_none());
    }

    #[test]
    fn test_put_overwrites_existing_entry() {
        let (_dir, store) = test_store();
        store.put("k", QUOTES, b"old".to_vec(), Utc::now()).unwrap();
        store.put("k", QUOTES, b"new".to_vec(), Utc::now()).unwrap();

        assert_eq!(store.get("k").unwrap().payload, b"new".to_vec());
    }

    #[test]
    fn test_put_moves_entry_between_categories() {
        let (_dir, store) = test_store();
        store.put("k", QUOTES, b"a".to_vec(), Utc::now()).unwrap();
        store.put("k", POSTS, b"b".to_vec(), Utc::now()).unwrap();

        let entry = store.get("k").unwrap();
        assert_eq!(entry.category, POSTS);
        assert_eq!(entry.payload, b"b".to_vec());
    }

    #[test]
    fn test_corrupted_entry_reads_as_miss_without_affecting_others() {
        let (_dir, store) = test_store();
        store.put("good", QUOTES, b"1".to_vec(), Utc::now()).unwrap();
        store.put("bad", QUOTES, b"2".to_vec(), Utc::now()).unwrap();

        let bad_path = store
            .root
            .join(CacheStore::sanitize(QUOTES))
            .join(CacheStore::entry_file_name("bad"));
        fs::write(&bad_path, b"{ not json").unwrap();

        assert!(store.get("bad").is_none());
        assert!(store.get("good").is_some());
    }

    #[test]
    fn test_invalidate_single_key() {
        let (_dir, store) = test_store();
        store.put("a", QUOTES, b"1".to_vec(), Utc::now()).unwrap();
        store.put("b", QUOTES, b"2".to_vec(), Utc::now()).unwrap();

        store.invalidate("a").unwrap();
        assert!(store.get("a").is_none());
        assert!(store.get("b").is_some());
    }

    #[test]
    fn test_invalidate_category_leaves_others_untouched() {
        let (_dir, store) = test_store();
        store.put("q1", QUOTES, b"1".to_vec(), Utc::now()).unwrap();
        store.put("q2", QUOTES, b"2".to_vec(), Utc::now()).unwrap();
        store.put("p1", POSTS, b"3".to_vec(), Utc::now()).unwrap();

        store.invalidate_category(QUOTES).unwrap();
        assert!(store.get("q1").is_none());
        assert!(store.get("q2").is_none());
        assert!(store.get("p1").is_some());
    }

    #[test]
    fn test_invalidate_unknown_category_is_ok() {
        let (_dir, store) = test_store();
        store.invalidate_category("never-written").unwrap();
    }

    #[test]
    fn test_distinct_keys_never_collide() {
        let (_dir, store) = test_store();
        // Same sanitized form, different raw keys
        store.put("forum:1:top", POSTS, b"a".to_vec(), Utc::now()).unwrap();
        store.put("forum_1_top", POSTS, b"b".to_vec(), Utc::now()).unwrap();

        assert_eq!(store.get("forum:1:top").unwrap().payload, b"a".to_vec());
        assert_eq!(store.get("forum_1_top").unwrap().payload, b"b".to_vec());
    }

    #[test]
    fn test_health_check_on_writable_root() {
        let (_dir, store) = test_store();
        let health = store.health_check();
        assert!(health.healthy, "{}", health.message);
    }

    #[test]
    fn test_health_check_on_clobbered_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("cache");
        let store = CacheStore::new(&root).unwrap();

        // Replace the root directory with a plain file
        fs::remove_dir_all(&root).unwrap();
        fs::write(&root, b"not a directory").unwrap();

        let health = store.health_check();
        assert!(!health.healthy);
    }

    #[test]
    fn test_unavailable_store_reads_as_miss() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("cache");
        let store = CacheStore::new(&root).unwrap();
        store.put("k", QUOTES, b"1".to_vec(), Utc::now()).unwrap();

        fs::remove_dir_all(&root).unwrap();
        fs::write(&root, b"not a directory").unwrap();

        assert!(store.get("k").is_none());
    }
}
