//! Persistent key/value store backing the parse and analysis caches.
//!
//! Entries live under `<root>/<namespace>/<sha256(key)>.json` and are
//! self-describing: each value is wrapped in an envelope carrying a version
//! tag, so a mismatched tag is a transparent miss. Writes are per-key atomic
//! swaps (temp file + rename); last writer wins, which is benign because
//! identical keys always derive from identical inputs. A small LRU cache
//! fronts the disk store.

use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use lru::LruCache;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{ErrorKind, StoreError};

/// Capacity of the in-memory LRU front.
const MEMORY_CAPACITY: usize = 512;

// ============================================================================
// Envelope
// ============================================================================

/// On-disk wrapper: version tag + payload.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    tag: String,
    value: serde_json::Value,
}

// ============================================================================
// Store
// ============================================================================

/// Statistics for one namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Number of entry files on disk.
    pub entries: usize,
    /// Total size of entry files in bytes.
    pub disk_bytes: u64,
}

/// Namespaced persistent key/value store with an LRU memory front.
///
/// Shared across concurrent readers and writers; the memory front is guarded
/// by a mutex and the disk layer relies on atomic renames.
#[derive(Debug)]
pub struct KvStore {
    root: PathBuf,
    memory: Mutex<LruCache<String, serde_json::Value>>,
}

impl KvStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<KvStore, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(KvStore {
            root,
            memory: Mutex::new(LruCache::new(
                NonZeroUsize::new(MEMORY_CAPACITY).expect("non-zero capacity"),
            )),
        })
    }

    fn entry_path(&self, namespace: &str, key: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        let digest = hex::encode(hasher.finalize());
        self.root.join(namespace).join(format!("{}.json", digest))
    }

    fn memory_key(&self, namespace: &str, key: &str) -> String {
        format!("{}\u{0}{}", namespace, key)
    }

    /// Look up a value. Any corruption (unreadable file, bad JSON, tag
    /// mismatch, payload schema drift) is a transparent miss.
    pub fn get<T: DeserializeOwned>(&self, namespace: &str, key: &str, tag: &str) -> Option<T> {
        let memory_key = self.memory_key(namespace, key);
        let cached = {
            let mut memory = self.memory.lock().expect("store memory lock");
            memory.get(&memory_key).cloned()
        };
        if let Some(value) = cached {
            if let Ok(decoded) = serde_json::from_value(value) {
                return Some(decoded);
            }
        }

        let path = self.entry_path(namespace, key);
        let content = fs::read(&path).ok()?;
        let envelope: Envelope = match serde_json::from_slice(&content) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(
                    kind = %ErrorKind::CacheCorrupt,
                    "discarding unreadable cache entry {}: {}",
                    path.display(),
                    err
                );
                return None;
            }
        };
        if envelope.tag != tag {
            debug!(
                "cache entry {} has tag {:?}, want {:?}; treating as miss",
                path.display(),
                envelope.tag,
                tag
            );
            return None;
        }
        match serde_json::from_value::<T>(envelope.value.clone()) {
            Ok(decoded) => {
                let mut memory = self.memory.lock().expect("store memory lock");
                memory.put(memory_key, envelope.value);
                Some(decoded)
            }
            Err(err) => {
                warn!(
                    kind = %ErrorKind::CacheCorrupt,
                    "cache entry {} failed to decode: {}",
                    path.display(),
                    err
                );
                None
            }
        }
    }

    /// Store a value, replacing any existing entry for the key.
    pub fn put<T: Serialize>(
        &self,
        namespace: &str,
        key: &str,
        tag: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_value(value)?;
        let envelope = Envelope {
            tag: tag.to_string(),
            value: value.clone(),
        };
        let body = serde_json::to_vec(&envelope)?;

        let path = self.entry_path(namespace, key);
        let dir = path.parent().expect("entry path has parent");
        fs::create_dir_all(dir).map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        // Atomic per-key swap: write a sibling temp file, rename into place.
        let tmp = tempfile::NamedTempFile::new_in(dir).map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        fs::write(tmp.path(), &body).map_err(|source| StoreError::Io {
            path: tmp.path().to_path_buf(),
            source,
        })?;
        tmp.persist(&path).map_err(|e| StoreError::Io {
            path: path.clone(),
            source: e.error,
        })?;

        let mut memory = self.memory.lock().expect("store memory lock");
        memory.put(self.memory_key(namespace, key), value);
        Ok(())
    }

    /// Remove every entry in a namespace. Returns the number removed.
    pub fn clear(&self, namespace: &str) -> Result<usize, StoreError> {
        let dir = self.root.join(namespace);
        let mut removed = 0usize;
        if dir.is_dir() {
            let entries = fs::read_dir(&dir).map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })?;
            for entry in entries.flatten() {
                if fs::remove_file(entry.path()).is_ok() {
                    removed += 1;
                }
            }
        }
        let mut memory = self.memory.lock().expect("store memory lock");
        memory.clear();
        Ok(removed)
    }

    /// Entry count and disk usage for a namespace.
    pub fn stats(&self, namespace: &str) -> StoreStats {
        let dir = self.root.join(namespace);
        let mut entries = 0usize;
        let mut disk_bytes = 0u64;
        if let Ok(listing) = fs::read_dir(&dir) {
            for entry in listing.flatten() {
                if let Ok(metadata) = entry.metadata() {
                    entries += 1;
                    disk_bytes += metadata.len();
                }
            }
        }
        StoreStats { entries, disk_bytes }
    }

    /// The store root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

// ============================================================================
// Tests
// ============================================================================
