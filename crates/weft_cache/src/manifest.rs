//! Cache manifest that tracks per-stage and per-module build state.
//!
//! The manifest is stored as `manifest.json` in the cache directory. Stage
//! records map a cache key to the inputs and output of the run that produced
//! it, so an unchanged stage can be skipped. Module records carry the patch
//! application state machine, which must survive a crash mid-apply.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use weft_common::ContentHash;

use crate::artifact::write_atomic;
use crate::error::CacheError;

/// Name of the manifest file within the cache directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Top-level cache manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheManifest {
    /// weft version that produced this cache. Invalidate on version change.
    pub weft_version: String,

    /// Completed stage results, keyed by stage key (e.g. `decompile:1.20.4`).
    #[serde(default)]
    pub stages: BTreeMap<String, StageRecord>,

    /// Per-module patch state, keyed by module name.
    #[serde(default)]
    pub modules: BTreeMap<String, ModuleRecord>,
}

/// The recorded result of one stage run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Combined hash of everything the stage consumed.
    pub input_hash: ContentHash,

    /// Hash of the tree or artifact the stage produced.
    pub output_hash: ContentHash,

    /// Where the output lives, if it is on disk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
}

/// Patch application state of a module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleState {
    /// No patches have been applied to the current output.
    #[default]
    Unapplied,
    /// Application started and has not finished. Seen after a crash.
    Applying,
    /// Every patch applied and the output tree is in place.
    Applied,
    /// A patch failed to apply; see the conflict summary.
    Conflict,
}

impl ModuleState {
    /// Lowercase name used in logs and status output.
    pub fn as_str(self) -> &'static str {
        match self {
            ModuleState::Unapplied => "unapplied",
            ModuleState::Applying => "applying",
            ModuleState::Applied => "applied",
            ModuleState::Conflict => "conflict",
        }
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a module's last apply stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictSummary {
    /// 1-based position of the failing patch in the stack.
    pub patch_index: usize,
    /// File name of the failing patch.
    pub patch_name: String,
    /// Path of the file the failing hunk targets.
    pub path: String,
    /// 1-based hunk number within that file, or 0 for file-level failures.
    pub hunk: usize,
}

impl fmt::Display for ConflictSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "patch {} ({}) at {}",
            self.patch_index, self.patch_name, self.path
        )?;
        if self.hunk > 0 {
            write!(f, " hunk {}", self.hunk)?;
        }
        Ok(())
    }
}

/// Persistent state of one module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRecord {
    /// Where the module is in the apply state machine.
    pub state: ModuleState,

    /// Hash of the base tree plus patch stack the output was produced from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_hash: Option<ContentHash>,

    /// Tree hash of the output directory after the last successful apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_hash: Option<ContentHash>,

    /// Tree hashes at each stack boundary: index 0 is the base, index `k`
    /// the tree after patch `k`.
    #[serde(default)]
    pub boundary_hashes: Vec<ContentHash>,

    /// Whether re-applying the stack reproduced `output_hash`.
    #[serde(default)]
    pub validated: bool,

    /// Artifact key of the stored output snapshot, for drift detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_key: Option<String>,

    /// Set while `state` is `Conflict`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<ConflictSummary>,
}

impl ModuleRecord {
    /// Returns `true` if the module is applied and validated, the precondition
    /// for packaging.
    pub fn is_ready(&self) -> bool {
        self.state == ModuleState::Applied && self.validated
    }
}

impl CacheManifest {
    /// Creates a new, empty cache manifest for the given weft version.
    pub fn new(weft_version: &str) -> Self {
        Self {
            weft_version: weft_version.to_string(),
            stages: BTreeMap::new(),
            modules: BTreeMap::new(),
        }
    }

    /// Loads the manifest from the cache directory, returning `None` if
    /// the file doesn't exist or can't be parsed.
    ///
    /// This is fail-safe: any error results in `None` (cache miss),
    /// triggering a full rebuild.
    pub fn load(cache_dir: &Path) -> Option<Self> {
        let path = cache_dir.join(MANIFEST_FILE);
        let content = std::fs::read_to_string(&path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Saves the manifest to the cache directory with an atomic, synced write.
    ///
    /// Creates the cache directory if it doesn't exist.
    pub fn save(&self, cache_dir: &Path) -> Result<(), CacheError> {
        std::fs::create_dir_all(cache_dir).map_err(|e| CacheError::io(cache_dir, e))?;
        let json = serde_json::to_string_pretty(self).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
        write_atomic(&cache_dir.join(MANIFEST_FILE), json.as_bytes())
    }

    /// Returns `true` if this manifest was produced by a compatible weft version.
    pub fn is_compatible(&self, current_version: &str) -> bool {
        self.weft_version == current_version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_manifest_is_empty() {
        let m = CacheManifest::new("0.1.0");
        assert_eq!(m.weft_version, "0.1.0");
        assert!(m.stages.is_empty());
        assert!(m.modules.is_empty());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = CacheManifest::new("0.1.0");
        m.stages.insert(
            "decompile:1.20.4".to_string(),
            StageRecord {
                input_hash: ContentHash::from_bytes(b"in"),
                output_hash: ContentHash::from_bytes(b"out"),
                output_path: Some(PathBuf::from("decompiled/abc")),
            },
        );
        m.modules.insert(
            "server".to_string(),
            ModuleRecord {
                state: ModuleState::Conflict,
                conflict: Some(ConflictSummary {
                    patch_index: 2,
                    patch_name: "0002-Fix.patch".to_string(),
                    path: "A.java".to_string(),
                    hunk: 1,
                }),
                ..ModuleRecord::default()
            },
        );
        m.save(dir.path()).unwrap();

        let loaded = CacheManifest::load(dir.path()).unwrap();
        assert_eq!(loaded.stages.len(), 1);
        assert_eq!(loaded.stages["decompile:1.20.4"], m.stages["decompile:1.20.4"]);
        let server = &loaded.modules["server"];
        assert_eq!(server.state, ModuleState::Conflict);
        assert_eq!(server.conflict.as_ref().unwrap().patch_index, 2);
    }

    #[test]
    fn load_nonexistent_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CacheManifest::load(dir.path()).is_none());
    }

    #[test]
    fn load_corrupt_json_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), "not valid json {{{").unwrap();
        assert!(CacheManifest::load(dir.path()).is_none());
    }

    #[test]
    fn is_compatible_checks_version() {
        let m = CacheManifest::new("0.1.0");
        assert!(m.is_compatible("0.1.0"));
        assert!(!m.is_compatible("0.2.0"));
    }

    #[test]
    fn module_state_serializes_lowercase() {
        let json = serde_json::to_string(&ModuleState::Applying).unwrap();
        assert_eq!(json, "\"applying\"");
        assert_eq!(ModuleState::Conflict.to_string(), "conflict");
    }

    #[test]
    fn default_record_is_unapplied_and_not_ready() {
        let r = ModuleRecord::default();
        assert_eq!(r.state, ModuleState::Unapplied);
        assert!(!r.is_ready());
    }

    #[test]
    fn applied_requires_validation_to_be_ready() {
        let mut r = ModuleRecord {
            state: ModuleState::Applied,
            ..ModuleRecord::default()
        };
        assert!(!r.is_ready());
        r.validated = true;
        assert!(r.is_ready());
    }

    #[test]
    fn conflict_summary_display() {
        let c = ConflictSummary {
            patch_index: 3,
            patch_name: "0003-Tweak.patch".to_string(),
            path: "src/B.java".to_string(),
            hunk: 2,
        };
        assert_eq!(c.to_string(), "patch 3 (0003-Tweak.patch) at src/B.java hunk 2");
    }
}
