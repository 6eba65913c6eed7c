//! Content-addressed binary artifact storage.
//!
//! Artifacts (tree snapshots, fetched upstream blobs) are stored as binary
//! files in subdirectories of the cache. Each artifact has a header containing
//! magic bytes, format version, and a checksum for integrity validation.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use weft_common::ContentHash;

use crate::error::CacheError;

/// Magic bytes identifying a weft cache artifact.
const ARTIFACT_MAGIC: [u8; 4] = *b"WEFT";

/// Current artifact format version. Increment on breaking changes to
/// the header or payload format.
const ARTIFACT_FORMAT_VERSION: u32 = 1;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Header prepended to every cached artifact for validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactHeader {
    /// Magic bytes: must be `b"WEFT"`.
    pub magic: [u8; 4],

    /// Artifact format version.
    pub format_version: u32,

    /// weft version that produced this artifact.
    pub weft_version: String,

    /// Content hash of the payload data (for integrity checks).
    pub checksum: ContentHash,
}

/// Writes `data` to `path` via a uniquely named sibling and a rename.
///
/// Readers never observe a partially written file, and two writers racing on
/// the same path each publish a complete file. The data is synced before the
/// rename so a recorded result survives a crash.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<(), CacheError> {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.{}.{n}.tmp", std::process::id()));

    let mut file = std::fs::File::create(&tmp).map_err(|e| CacheError::io(&tmp, e))?;
    file.write_all(data).map_err(|e| CacheError::io(&tmp, e))?;
    file.sync_all().map_err(|e| CacheError::io(&tmp, e))?;
    drop(file);
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        CacheError::io(path, e)
    })
}

/// Content-addressed store for binary artifacts.
///
/// Each artifact is stored at `<cache_dir>/<subdir>/<key>.<ext>` with a
/// validated binary header.
pub struct ArtifactStore {
    /// Root cache directory.
    cache_dir: PathBuf,
}

impl ArtifactStore {
    /// Creates a new artifact store rooted at the given cache directory.
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            cache_dir: cache_dir.to_path_buf(),
        }
    }

    /// Ensures that the subdirectory for the given artifact type exists.
    pub fn ensure_dirs(&self, subdir: &str) -> Result<(), CacheError> {
        let dir = self.cache_dir.join(subdir);
        std::fs::create_dir_all(&dir).map_err(|e| CacheError::io(dir, e))
    }

    /// Returns the file path for an artifact with the given key.
    pub fn artifact_path(&self, subdir: &str, key: &str, ext: &str) -> PathBuf {
        self.cache_dir.join(subdir).join(format!("{key}.{ext}"))
    }

    /// Writes an artifact to the store and returns the cache key.
    ///
    /// The key is the display form of `hash`. The artifact is written with a
    /// binary header containing magic bytes, format version, and a checksum.
    pub fn write_artifact(
        &self,
        subdir: &str,
        ext: &str,
        hash: &ContentHash,
        data: &[u8],
        weft_version: &str,
    ) -> Result<String, CacheError> {
        self.ensure_dirs(subdir)?;

        let key = hash.to_string();
        let path = self.artifact_path(subdir, &key, ext);

        let header = ArtifactHeader {
            magic: ARTIFACT_MAGIC,
            format_version: ARTIFACT_FORMAT_VERSION,
            weft_version: weft_version.to_string(),
            checksum: ContentHash::from_bytes(data),
        };

        let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
            .map_err(|e| CacheError::Serialization {
                reason: e.to_string(),
            })?;

        // 4-byte header length (little-endian) + header + payload
        let header_len = header_bytes.len() as u32;
        let mut output = Vec::with_capacity(4 + header_bytes.len() + data.len());
        output.extend_from_slice(&header_len.to_le_bytes());
        output.extend_from_slice(&header_bytes);
        output.extend_from_slice(data);

        write_atomic(&path, &output)?;
        Ok(key)
    }

    /// Reads an artifact from the store, validating its header.
    ///
    /// Returns `None` if the file doesn't exist, the header is invalid,
    /// the format version doesn't match, or the checksum doesn't verify.
    pub fn read_artifact(&self, subdir: &str, key: &str, ext: &str) -> Option<Vec<u8>> {
        let path = self.artifact_path(subdir, key, ext);
        let raw = std::fs::read(&path).ok()?;

        if raw.len() < 4 {
            return None;
        }

        let header_len = u32::from_le_bytes(raw[..4].try_into().ok()?) as usize;
        if raw.len() < 4 + header_len {
            return None;
        }

        let header: ArtifactHeader =
            bincode::serde::decode_from_slice(&raw[4..4 + header_len], bincode::config::standard())
                .ok()?
                .0;

        if header.magic != ARTIFACT_MAGIC || header.format_version != ARTIFACT_FORMAT_VERSION {
            return None;
        }

        let payload = &raw[4 + header_len..];
        if ContentHash::from_bytes(payload) != header.checksum {
            return None;
        }

        Some(payload.to_vec())
    }

    /// Removes artifacts that are not in the set of live keys.
    ///
    /// Returns the number of files removed.
    pub fn gc(&self, subdir: &str, ext: &str, live_keys: &[String]) -> Result<usize, CacheError> {
        let dir = self.cache_dir.join(subdir);
        if !dir.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        let entries = std::fs::read_dir(&dir).map_err(|e| CacheError::io(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| CacheError::io(&dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ext) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if !live_keys.iter().any(|k| k == stem) {
                    std::fs::remove_file(&path).map_err(|e| CacheError::io(&path, e))?;
                    removed += 1;
                }
            }
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        (dir, store)
    }

    fn raw_artifact(header: &ArtifactHeader, payload: &[u8]) -> Vec<u8> {
        let header_bytes =
            bincode::serde::encode_to_vec(header, bincode::config::standard()).unwrap();
        let mut output = Vec::new();
        output.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
        output.extend_from_slice(&header_bytes);
        output.extend_from_slice(payload);
        output
    }

    #[test]
    fn write_and_read_roundtrip() {
        let (_dir, store) = make_store();
        let data = b"snapshot bytes";
        let hash = ContentHash::from_bytes(data);
        let key = store
            .write_artifact("trees", "snap", &hash, data, "0.1.0")
            .unwrap();

        let read_back = store.read_artifact("trees", &key, "snap").unwrap();
        assert_eq!(read_back, data);
    }

    #[test]
    fn read_missing_returns_none() {
        let (_dir, store) = make_store();
        assert!(store.read_artifact("trees", "nonexistent", "snap").is_none());
    }

    #[test]
    fn read_corrupt_data_returns_none() {
        let (_dir, store) = make_store();
        store.ensure_dirs("trees").unwrap();
        let path = store.artifact_path("trees", "corrupt", "snap");
        std::fs::write(&path, b"garbage data").unwrap();
        assert!(store.read_artifact("trees", "corrupt", "snap").is_none());
    }

    #[test]
    fn read_wrong_magic_returns_none() {
        let (_dir, store) = make_store();
        store.ensure_dirs("trees").unwrap();
        let header = ArtifactHeader {
            magic: *b"BAAD",
            format_version: ARTIFACT_FORMAT_VERSION,
            weft_version: "0.1.0".to_string(),
            checksum: ContentHash::from_bytes(b"data"),
        };
        let path = store.artifact_path("trees", "badmagic", "snap");
        std::fs::write(&path, raw_artifact(&header, b"data")).unwrap();
        assert!(store.read_artifact("trees", "badmagic", "snap").is_none());
    }

    #[test]
    fn read_checksum_mismatch_returns_none() {
        let (_dir, store) = make_store();
        store.ensure_dirs("trees").unwrap();
        let header = ArtifactHeader {
            magic: ARTIFACT_MAGIC,
            format_version: ARTIFACT_FORMAT_VERSION,
            weft_version: "0.1.0".to_string(),
            checksum: ContentHash::from_bytes(b"data"),
        };
        let path = store.artifact_path("trees", "mismatch", "snap");
        std::fs::write(&path, raw_artifact(&header, b"tampered")).unwrap();
        assert!(store.read_artifact("trees", "mismatch", "snap").is_none());
    }

    #[test]
    fn write_atomic_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"two");
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn gc_removes_stale_artifacts() {
        let (_dir, store) = make_store();

        let hash_a = ContentHash::from_bytes(b"A");
        let key_a = store
            .write_artifact("blobs", "bin", &hash_a, b"A", "0.1.0")
            .unwrap();
        let hash_b = ContentHash::from_bytes(b"B");
        store
            .write_artifact("blobs", "bin", &hash_b, b"B", "0.1.0")
            .unwrap();

        let removed = store.gc("blobs", "bin", &[key_a.clone()]).unwrap();
        assert_eq!(removed, 1);
        assert!(store.read_artifact("blobs", &key_a, "bin").is_some());
    }

    #[test]
    fn gc_nonexistent_dir_returns_zero() {
        let (_dir, store) = make_store();
        assert_eq!(store.gc("nonexistent", "bin", &[]).unwrap(), 0);
    }
}
