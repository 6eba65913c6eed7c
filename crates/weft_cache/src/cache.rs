//! High-level build cache shared by pipeline workers.
//!
//! `BuildCache` ties together the manifest and the artifact store behind a
//! lock so module workers running on separate threads can look up stage
//! results, record module state, and store tree snapshots. Every mutation is
//! persisted before it returns, so a completed stage is never lost.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::debug;
use weft_common::ContentHash;

use crate::artifact::ArtifactStore;
use crate::error::CacheError;
use crate::hasher::TreeSnapshot;
use crate::manifest::{CacheManifest, ModuleRecord, StageRecord};

/// Subdirectory for tree snapshot artifacts.
const TREE_SUBDIR: &str = "trees";
/// Extension for tree snapshot artifacts.
const TREE_EXT: &str = "snap";
/// Subdirectory for opaque blobs (fetched binaries, mappings).
const BLOB_SUBDIR: &str = "blobs";
/// Extension for blob artifacts.
const BLOB_EXT: &str = "bin";

/// Result of trying to record a stage result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The record was stored.
    Won,
    /// Another writer already recorded a result for the same inputs. The
    /// caller should use this record and discard its own output.
    Lost(StageRecord),
}

/// Cache manager for incremental pipeline runs.
///
/// All reads are fail-safe: corruption or version mismatches result in
/// cache misses rather than errors.
pub struct BuildCache {
    cache_dir: PathBuf,
    manifest: RwLock<CacheManifest>,
    store: ArtifactStore,
    weft_version: String,
}

impl BuildCache {
    /// Loads an existing cache or creates a fresh one.
    ///
    /// If a manifest exists and is compatible with the current weft version,
    /// it is loaded. Otherwise a new empty manifest is created.
    pub fn load_or_create(cache_dir: &Path, weft_version: &str) -> Self {
        let manifest = match CacheManifest::load(cache_dir) {
            Some(m) if m.is_compatible(weft_version) => m,
            Some(m) => {
                debug!(
                    found = %m.weft_version,
                    current = weft_version,
                    "cache version mismatch, starting fresh"
                );
                CacheManifest::new(weft_version)
            }
            None => CacheManifest::new(weft_version),
        };

        Self {
            cache_dir: cache_dir.to_path_buf(),
            manifest: RwLock::new(manifest),
            store: ArtifactStore::new(cache_dir),
            weft_version: weft_version.to_string(),
        }
    }

    /// Root directory of the cache.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// The underlying artifact store.
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Returns a copy of the current manifest.
    pub fn manifest(&self) -> Result<CacheManifest, CacheError> {
        Ok(self.manifest.read().map_err(|_| CacheError::Poisoned)?.clone())
    }

    /// Looks up the recorded result for a stage key.
    pub fn stage(&self, key: &str) -> Result<Option<StageRecord>, CacheError> {
        let manifest = self.manifest.read().map_err(|_| CacheError::Poisoned)?;
        Ok(manifest.stages.get(key).cloned())
    }

    /// Records `record` under `key` unless a result with the same input hash
    /// is already present.
    ///
    /// The check and the insert happen under one write lock, so of two
    /// workers racing to finish the same stage exactly one wins.
    pub fn compare_and_swap(
        &self,
        key: &str,
        record: StageRecord,
    ) -> Result<CasOutcome, CacheError> {
        let mut manifest = self.manifest.write().map_err(|_| CacheError::Poisoned)?;
        if let Some(existing) = manifest.stages.get(key) {
            if existing.input_hash == record.input_hash {
                debug!(stage = key, "stage result already recorded");
                return Ok(CasOutcome::Lost(existing.clone()));
            }
        }
        manifest.stages.insert(key.to_string(), record);
        manifest.save(&self.cache_dir)?;
        debug!(stage = key, "stage result recorded");
        Ok(CasOutcome::Won)
    }

    /// Forgets the result for a stage key.
    pub fn invalidate_stage(&self, key: &str) -> Result<(), CacheError> {
        let mut manifest = self.manifest.write().map_err(|_| CacheError::Poisoned)?;
        if manifest.stages.remove(key).is_some() {
            manifest.save(&self.cache_dir)?;
        }
        Ok(())
    }

    /// Returns the record for a module, or a fresh `Unapplied` record.
    pub fn module(&self, name: &str) -> Result<ModuleRecord, CacheError> {
        let manifest = self.manifest.read().map_err(|_| CacheError::Poisoned)?;
        Ok(manifest.modules.get(name).cloned().unwrap_or_default())
    }

    /// Replaces a module's record and persists the manifest.
    pub fn set_module(&self, name: &str, record: ModuleRecord) -> Result<(), CacheError> {
        self.update_module(name, |r| *r = record).map(|_| ())
    }

    /// Edits a module's record in place and persists the manifest.
    pub fn update_module(
        &self,
        name: &str,
        edit: impl FnOnce(&mut ModuleRecord),
    ) -> Result<ModuleRecord, CacheError> {
        let mut manifest = self.manifest.write().map_err(|_| CacheError::Poisoned)?;
        let record = manifest.modules.entry(name.to_string()).or_default();
        edit(record);
        let updated = record.clone();
        manifest.save(&self.cache_dir)?;
        debug!(module = name, state = %updated.state, "module record saved");
        Ok(updated)
    }

    /// Stores a tree snapshot and returns its artifact key.
    pub fn store_snapshot(&self, snapshot: &TreeSnapshot) -> Result<String, CacheError> {
        let bytes = bincode::serde::encode_to_vec(snapshot, bincode::config::standard())
            .map_err(|e| CacheError::Serialization {
                reason: e.to_string(),
            })?;
        self.store.write_artifact(
            TREE_SUBDIR,
            TREE_EXT,
            &snapshot.tree_hash(),
            &bytes,
            &self.weft_version,
        )
    }

    /// Loads a tree snapshot by key. Returns `None` on any failure.
    pub fn load_snapshot(&self, key: &str) -> Option<TreeSnapshot> {
        let bytes = self.store.read_artifact(TREE_SUBDIR, key, TREE_EXT)?;
        bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
            .ok()
            .map(|(snap, _)| snap)
    }

    /// Stores an opaque blob keyed by its content hash.
    pub fn store_blob(&self, data: &[u8]) -> Result<ContentHash, CacheError> {
        let hash = ContentHash::from_bytes(data);
        self.store
            .write_artifact(BLOB_SUBDIR, BLOB_EXT, &hash, data, &self.weft_version)?;
        Ok(hash)
    }

    /// Loads a blob by content hash. Returns `None` on any failure.
    pub fn load_blob(&self, hash: &ContentHash) -> Option<Vec<u8>> {
        self.store
            .read_artifact(BLOB_SUBDIR, &hash.to_string(), BLOB_EXT)
    }

    /// Removes snapshots no module references and blobs no stage produced.
    ///
    /// Returns the number of files removed.
    pub fn gc(&self) -> Result<usize, CacheError> {
        let manifest = self.manifest.read().map_err(|_| CacheError::Poisoned)?;
        let live_trees: Vec<String> = manifest
            .modules
            .values()
            .filter_map(|m| m.snapshot_key.clone())
            .collect();
        let live_blobs: Vec<String> = manifest
            .stages
            .values()
            .flat_map(|s| [s.input_hash.to_string(), s.output_hash.to_string()])
            .collect();
        let removed = self.store.gc(TREE_SUBDIR, TREE_EXT, &live_trees)?
            + self.store.gc(BLOB_SUBDIR, BLOB_EXT, &live_blobs)?;
        debug!(removed, "cache gc finished");
        Ok(removed)
    }

    /// Deletes the whole cache directory.
    pub fn clear(cache_dir: &Path) -> Result<(), CacheError> {
        match std::fs::remove_dir_all(cache_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io(cache_dir, e)),
        }
    }
}
