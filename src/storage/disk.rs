//! Embedded disk backend: one JSON record file per key under a directory.
//!
//! Files are named by a stable hash of the key; the key itself rides
//! inside the envelope so the directory can be re-indexed at open time.
//! An optional byte budget makes the backend refuse writes that would
//! exceed it, which is the capacity signal bounded deployments rely on.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::Storage;
use crate::error::{CacheError, Result};
use crate::keys::stable_hash_hex;

const RECORD_EXTENSION: &str = "json";

#[derive(Serialize, Deserialize)]
struct DiskRecord {
    key: String,
    body: Vec<u8>,
}

pub struct DiskStorage {
    root: PathBuf,
    max_bytes: Option<u64>,
    used_bytes: AtomicU64,
    /// key -> size of its record file.
    index: DashMap<String, u64>,
}

impl DiskStorage {
    /// Open (or create) a record directory. Existing records are indexed
    /// so `len`, `iter_keys` and the byte budget survive a restart.
    pub fn open(root: &Path, max_bytes: Option<u64>) -> Result<Self> {
        fs::create_dir_all(root)
            .with_context(|| format!("failed to create cache directory {}", root.display()))?;

        let storage = Self {
            root: root.to_path_buf(),
            max_bytes,
            used_bytes: AtomicU64::new(0),
            index: DashMap::new(),
        };

        for entry in fs::read_dir(root)
            .with_context(|| format!("failed to read cache directory {}", root.display()))?
        {
            let path = entry.map_err(anyhow::Error::from)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            match fs::read(&path) {
                Ok(bytes) => match serde_json::from_slice::<DiskRecord>(&bytes) {
                    Ok(record) => {
                        storage.index.insert(record.key, bytes.len() as u64);
                        storage
                            .used_bytes
                            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
                    }
                    Err(e) => {
                        // A torn or foreign file; skip it rather than fail
                        // the whole open.
                        warn!(path = %path.display(), error = %e, "skipping unreadable cache record");
                    }
                },
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable cache record");
                }
            }
        }

        debug!(
            root = %root.display(),
            records = storage.index.len(),
            bytes = storage.used_bytes.load(Ordering::Relaxed),
            "opened disk storage"
        );
        Ok(storage)
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.{RECORD_EXTENSION}", stable_hash_hex(key)))
    }
}

impl Storage for DiskStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if !self.index.contains_key(key) {
            return Ok(None);
        }
        let path = self.record_path(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File vanished underneath us; drop the index entry.
                if let Some((_, size)) = self.index.remove(key) {
                    self.used_bytes.fetch_sub(size, Ordering::Relaxed);
                }
                return Ok(None);
            }
            Err(e) => {
                return Err(CacheError::Storage(anyhow::Error::from(e).context(
                    format!("failed to read cache record {}", path.display()),
                )))
            }
        };
        let record: DiskRecord = serde_json::from_slice(&bytes)
            .with_context(|| format!("corrupt cache record {}", path.display()))?;
        Ok(Some(record.body))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let record = DiskRecord {
            key: key.to_string(),
            body: value.to_vec(),
        };
        let bytes = serde_json::to_vec(&record).map_err(|e| CacheError::Storage(e.into()))?;
        let new_size = bytes.len() as u64;
        let old_size = self.index.get(key).map(|s| *s).unwrap_or(0);

        if let Some(budget) = self.max_bytes {
            let projected = self
                .used_bytes
                .load(Ordering::Relaxed)
                .saturating_sub(old_size)
                .saturating_add(new_size);
            if projected > budget {
                return Err(CacheError::StorageIsFull);
            }
        }

        let path = self.record_path(key);
        fs::write(&path, &bytes)
            .with_context(|| format!("failed to write cache record {}", path.display()))?;

        self.index.insert(key.to_string(), new_size);
        self.used_bytes.fetch_add(new_size, Ordering::Relaxed);
        self.used_bytes.fetch_sub(old_size, Ordering::Relaxed);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let Some((_, size)) = self.index.remove(key) else {
            return Ok(());
        };
        self.used_bytes.fetch_sub(size, Ordering::Relaxed);
        let path = self.record_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Storage(anyhow::Error::from(e).context(
                format!("failed to delete cache record {}", path.display()),
            ))),
        }
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn iter_keys(&self) -> Result<Vec<String>> {
        Ok(self.index.iter().map(|e| e.key().clone()).collect())
    }

    fn clear(&self) -> Result<()> {
        let keys: Vec<String> = self.index.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.delete(&key)?;
        }
        Ok(())
    }
}
