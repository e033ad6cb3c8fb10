//! At-most-once probe semantics per `(identity tuple, TTL)`. Grounded on the
//! teacher's `ffui_core::settings::tool_probe_cache` (versioned,
//! best-effort JSON cache) and `ffui_core::settings::io` (atomic
//! write-temp-then-rename).
//!
//! Reads are lock-free against an immutable snapshot (`Arc<CacheSnapshot>`);
//! writers take a mutex, build a new snapshot, and atomically swap the
//! shared reference.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::domain::{FileIdentity, ProbeCacheEntry, ProbeResult};
use crate::errors::CacheError;
use crate::sync_ext::MutexExt;

const CACHE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize, Default)]
struct CacheFile {
    version: u32,
    entries: Vec<ProbeCacheEntry>,
}

#[derive(Default)]
struct CacheSnapshot {
    by_path: HashMap<PathBuf, ProbeCacheEntry>,
}

impl CacheSnapshot {
    fn from_entries(entries: Vec<ProbeCacheEntry>) -> Self {
        let mut by_path = HashMap::new();
        for entry in entries {
            by_path.insert(entry.identity.path.clone(), entry);
        }
        Self { by_path }
    }

    fn to_entries(&self) -> Vec<ProbeCacheEntry> {
        self.by_path.values().cloned().collect()
    }
}

/// Persistent map from file identity to last probe result.
pub struct ProbeCache {
    path: PathBuf,
    ttl: chrono::Duration,
    snapshot: Arc<std::sync::RwLock<Arc<CacheSnapshot>>>,
    write_lock: Mutex<()>,
}

impl ProbeCache {
    /// Load the cache file at `path` if present. A malformed or
    /// version-mismatched file is treated as empty — the cache is advisory,
    /// never authoritative.
    pub fn open(path: &Path, ttl_hours: f64) -> Self {
        let snapshot = Self::load_snapshot(path);
        Self {
            path: path.to_path_buf(),
            ttl: chrono::Duration::milliseconds((ttl_hours * 3_600_000.0) as i64),
            snapshot: Arc::new(std::sync::RwLock::new(Arc::new(snapshot))),
            write_lock: Mutex::new(()),
        }
    }

    fn load_snapshot(path: &Path) -> CacheSnapshot {
        let Ok(bytes) = std::fs::read(path) else {
            return CacheSnapshot::default();
        };
        let Ok(file) = serde_json::from_slice::<CacheFile>(&bytes) else {
            return CacheSnapshot::default();
        };
        if file.version != CACHE_VERSION {
            return CacheSnapshot::default();
        }
        CacheSnapshot::from_entries(file.entries)
    }

    /// Returns the cached probe result for `identity`, or `None` on a miss
    /// or an expired entry.
    pub fn get(&self, identity: &FileIdentity) -> Option<ProbeResult> {
        let snapshot = self.snapshot.read().unwrap_or_else(|e| e.into_inner());
        let entry = snapshot.by_path.get(&identity.path)?;
        if entry.identity != *identity {
            return None;
        }
        let age = chrono::Utc::now() - entry.created_at;
        if age > self.ttl {
            return None;
        }
        Some(entry.probe.clone())
    }

    /// Upserts `identity`'s probe result and atomically re-publishes a new
    /// snapshot.
    pub fn put(&self, identity: FileIdentity, probe: ProbeResult) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock_unpoisoned();
        let mut entries = {
            let current = self.snapshot.read().unwrap_or_else(|e| e.into_inner());
            current.to_entries()
        };
        entries.retain(|e| e.identity.path != identity.path);
        entries.push(ProbeCacheEntry {
            identity,
            probe,
            created_at: chrono::Utc::now(),
        });

        self.persist(&entries)?;

        let new_snapshot = Arc::new(CacheSnapshot::from_entries(entries));
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = new_snapshot;
        Ok(())
    }

    /// Drops every entry past its TTL. Safe to run at startup.
    pub fn purge_expired(&self) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock_unpoisoned();
        let now = chrono::Utc::now();
        let entries: Vec<ProbeCacheEntry> = {
            let current = self.snapshot.read().unwrap_or_else(|e| e.into_inner());
            current
                .to_entries()
                .into_iter()
                .filter(|e| now - e.created_at <= self.ttl)
                .collect()
        };
        self.persist(&entries)?;
        let new_snapshot = Arc::new(CacheSnapshot::from_entries(entries));
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = new_snapshot;
        Ok(())
    }

    fn persist(&self, entries: &[ProbeCacheEntry]) -> Result<(), CacheError> {
        let file = CacheFile {
            version: CACHE_VERSION,
            entries: entries.to_vec(),
        };
        let tmp_path = self.path.with_extension("tmp");
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| CacheError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let bytes = serde_json::to_vec_pretty(&file)?;
        std::fs::write(&tmp_path, &bytes).map_err(|source| CacheError::Write {
            path: tmp_path.clone(),
            source,
        })?;
        std::fs::rename(&tmp_path, &self.path).map_err(|source| CacheError::Write {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }
}
