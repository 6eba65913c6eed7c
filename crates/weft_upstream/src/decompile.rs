//! The decompile/remap stage.
//!
//! Turns the resolved binary into a readable source tree: the remapper
//! rewrites obfuscated names using the mapping, then the decompiler emits
//! sources from the remapped binary. The result lives in the cache under a
//! key derived from the release, both input hashes, and both tool versions,
//! so an unchanged input set never runs the tools twice.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};
use weft_cache::{BuildCache, CasOutcome, StageRecord, TreeHasher};
use weft_common::{ContentHash, ContentHasher};
use weft_patch::SourceTree;

use crate::error::UpstreamError;
use crate::resolver::ResolvedArtifacts;
use crate::tool::{ExternalTool, ToolError, ToolInvocation};

/// Cache subdirectory holding decompiled trees.
pub const DECOMPILED_DIR: &str = "decompiled";

static WORK_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A decompiled source tree in the cache.
#[derive(Debug, Clone)]
pub struct DecompiledTree {
    /// Directory holding the sources.
    pub root: PathBuf,
    /// Content hash of the tree.
    pub hash: ContentHash,
    /// Stage input key the tree was produced for.
    pub key: ContentHash,
}

impl DecompiledTree {
    /// Reads the subdirectory `subdir` as a base tree.
    pub fn base(&self, subdir: &str) -> Result<SourceTree, UpstreamError> {
        read_subdir(&self.root, subdir, "decompiled")
    }
}

/// Runs the remapper and decompiler with caching.
pub struct DecompileStage<'a> {
    cache: &'a BuildCache,
    remapper: &'a dyn ExternalTool,
    decompiler: &'a dyn ExternalTool,
    timeout: Duration,
}

impl<'a> DecompileStage<'a> {
    /// Creates the stage.
    pub fn new(
        cache: &'a BuildCache,
        remapper: &'a dyn ExternalTool,
        decompiler: &'a dyn ExternalTool,
        timeout: Duration,
    ) -> Self {
        Self {
            cache,
            remapper,
            decompiler,
            timeout,
        }
    }

    /// Input key for `artifacts` with the configured tools.
    pub fn key(&self, artifacts: &ResolvedArtifacts) -> ContentHash {
        ContentHasher::new("decompile")
            .update(artifacts.release.as_str().as_bytes())
            .update_hash(&artifacts.binary_hash)
            .update_hash(&artifacts.mapping_hash)
            .update(self.remapper.name().as_bytes())
            .update(self.remapper.version().as_bytes())
            .update(self.decompiler.name().as_bytes())
            .update(self.decompiler.version().as_bytes())
            .finish()
    }

    fn stage_key(artifacts: &ResolvedArtifacts) -> String {
        format!("decompile:{}", artifacts.release)
    }

    /// Returns the cached tree for `artifacts`, running the tools if needed.
    pub fn run(&self, artifacts: &ResolvedArtifacts) -> Result<DecompiledTree, UpstreamError> {
        let key = self.key(artifacts);
        let stage_key = Self::stage_key(artifacts);

        if let Some(tree) = self.cached(&stage_key, key)? {
            debug!(release = %artifacts.release, key = %key.short(), "decompiled tree cache hit");
            return Ok(tree);
        }

        let dir = self.cache.cache_dir().join(DECOMPILED_DIR);
        let work = dir.join(format!(
            ".work-{}-{}-{}",
            key.short(),
            std::process::id(),
            WORK_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let result = self.produce(artifacts, key, &stage_key, &dir, &work);
        if let Err(e) = std::fs::remove_dir_all(&work) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %work.display(), error = %e, "could not remove work directory");
            }
        }
        result
    }

    fn produce(
        &self,
        artifacts: &ResolvedArtifacts,
        key: ContentHash,
        stage_key: &str,
        dir: &Path,
        work: &Path,
    ) -> Result<DecompiledTree, UpstreamError> {
        std::fs::create_dir_all(work).map_err(|e| UpstreamError::io(work, e))?;

        let remapped = work.join("remapped.jar");
        info!(release = %artifacts.release, tool = self.remapper.name(), "remapping");
        self.remapper
            .run(
                &ToolInvocation {
                    input: &artifacts.binary,
                    output: &remapped,
                    mapping: Some(&artifacts.mapping),
                },
                self.timeout,
            )
            .map_err(|e| tool_failure(e, UpstreamError::RemapFailed))?;
        if !remapped.exists() {
            return Err(UpstreamError::RemapFailed(format!(
                "{} produced no output",
                self.remapper.name()
            )));
        }

        let sources = work.join("src");
        info!(release = %artifacts.release, tool = self.decompiler.name(), "decompiling");
        self.decompiler
            .run(
                &ToolInvocation {
                    input: &remapped,
                    output: &sources,
                    mapping: None,
                },
                self.timeout,
            )
            .map_err(|e| tool_failure(e, UpstreamError::DecompileFailed))?;
        if !sources.is_dir() {
            return Err(UpstreamError::DecompileFailed(format!(
                "{} produced no source directory",
                self.decompiler.name()
            )));
        }

        let hash = TreeHasher::snapshot(&sources)?.tree_hash();

        // A concurrent producer may have finished while the tools ran.
        if let Some(tree) = self.cached(stage_key, key)? {
            debug!(key = %key.short(), "discarding duplicate decompile output");
            return Ok(tree);
        }

        let root = dir.join(key.to_string());
        remove_stale(&root)?;
        std::fs::rename(&sources, &root).map_err(|e| UpstreamError::io(&sources, e))?;

        let record = StageRecord {
            input_hash: key,
            output_hash: hash,
            output_path: Some(root.clone()),
        };
        match self.cache.compare_and_swap(stage_key, record)? {
            CasOutcome::Won => {
                info!(release = %artifacts.release, tree = %hash.short(), "decompiled");
                Ok(DecompiledTree { root, hash, key })
            }
            CasOutcome::Lost(winner) => Ok(DecompiledTree {
                root: winner.output_path.unwrap_or(root),
                hash: winner.output_hash,
                key,
            }),
        }
    }

    /// A recorded tree for `key` whose directory still hashes to the
    /// recorded output hash.
    fn cached(&self, stage_key: &str, key: ContentHash) -> Result<Option<DecompiledTree>, UpstreamError> {
        let Some(record) = self.cache.stage(stage_key)? else {
            return Ok(None);
        };
        if record.input_hash != key {
            return Ok(None);
        }
        let Some(root) = record.output_path else {
            return Ok(None);
        };
        if !root.is_dir() {
            warn!(path = %root.display(), "recorded decompiled tree is missing");
            self.cache.invalidate_stage(stage_key)?;
            return Ok(None);
        }
        let actual = TreeHasher::snapshot(&root)?.tree_hash();
        if actual != record.output_hash {
            warn!(path = %root.display(), "decompiled tree was modified, regenerating");
            self.cache.invalidate_stage(stage_key)?;
            return Ok(None);
        }
        Ok(Some(DecompiledTree {
            root,
            hash: actual,
            key,
        }))
    }
}

fn tool_failure(err: ToolError, wrap: fn(String) -> UpstreamError) -> UpstreamError {
    match err {
        ToolError::Timeout { tool, secs } => UpstreamError::StageTimeout { tool, secs },
        other => wrap(other.to_string()),
    }
}

fn remove_stale(dir: &Path) -> Result<(), UpstreamError> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => {
            warn!(path = %dir.display(), "removed unrecorded decompiled tree");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(UpstreamError::io(dir, e)),
    }
}

/// Reads `root/subdir` as a tree; a missing directory cannot serve as a base.
pub(crate) fn read_subdir(root: &Path, subdir: &str, what: &str) -> Result<SourceTree, UpstreamError> {
    let dir = if subdir.is_empty() || subdir == "." {
        root.to_path_buf()
    } else {
        root.join(subdir)
    };
    if !dir.is_dir() {
        return Err(UpstreamError::UnresolvableRef {
            reference: subdir.to_string(),
            reason: format!("no such directory in the {what} tree"),
        });
    }
    Ok(SourceTree::read(&dir)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use weft_common::VersionRef;

    /// Copies input to output, or writes a fixed tree when decompiling.
    struct FakeTool {
        name: &'static str,
        version: &'static str,
        runs: Mutex<usize>,
        fail: Option<ToolError>,
    }

    impl FakeTool {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                version: "1.0",
                runs: Mutex::new(0),
                fail: None,
            }
        }
        fn runs(&self) -> usize {
            *self.runs.lock().unwrap()
        }
    }

    impl ExternalTool for FakeTool {
        fn name(&self) -> &str {
            self.name
        }
        fn version(&self) -> &str {
            self.version
        }
        fn run(&self, inv: &ToolInvocation<'_>, _timeout: Duration) -> Result<(), ToolError> {
            *self.runs.lock().unwrap() += 1;
            if let Some(err) = &self.fail {
                return Err(match err {
                    ToolError::Timeout { tool, secs } => ToolError::Timeout {
                        tool: tool.clone(),
                        secs: *secs,
                    },
                    other => ToolError::Exit {
                        tool: self.name.to_string(),
                        status: "1".to_string(),
                        stderr: other.to_string(),
                    },
                });
            }
            if inv.mapping.is_some() {
                std::fs::copy(inv.input, inv.output).unwrap();
            } else {
                let bin = std::fs::read_to_string(inv.input).unwrap();
                std::fs::create_dir_all(inv.output.join("net/example")).unwrap();
                std::fs::write(
                    inv.output.join("net/example/Server.java"),
                    format!("// from {bin}\nclass Server {{}}\n"),
                )
                .unwrap();
            }
            Ok(())
        }
    }

    fn artifacts(dir: &Path) -> ResolvedArtifacts {
        let binary = dir.join("server.jar");
        let mapping = dir.join("mappings.txt");
        std::fs::write(&binary, "binary").unwrap();
        std::fs::write(&mapping, "weft-mapping v1 1.20.4\n").unwrap();
        ResolvedArtifacts {
            release: VersionRef::new("1.20.4").unwrap(),
            binary,
            binary_hash: ContentHash::from_bytes(b"binary"),
            mapping,
            mapping_hash: ContentHash::from_bytes(b"weft-mapping v1 1.20.4\n"),
            mapped_symbols: 0,
        }
    }

    #[test]
    fn produces_and_caches_tree() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BuildCache::load_or_create(&dir.path().join("cache"), "0.1.0");
        let (remap, decomp) = (FakeTool::new("remapper"), FakeTool::new("decompiler"));
        let stage = DecompileStage::new(&cache, &remap, &decomp, Duration::from_secs(5));
        let inputs = artifacts(dir.path());

        let first = stage.run(&inputs).unwrap();
        assert!(first.root.join("net/example/Server.java").exists());
        let second = stage.run(&inputs).unwrap();
        assert_eq!(first.hash, second.hash);
        assert_eq!(decomp.runs(), 1);
        assert_eq!(remap.runs(), 1);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("cache").join(DECOMPILED_DIR))
            .unwrap()
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn tool_version_changes_key() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BuildCache::load_or_create(&dir.path().join("cache"), "0.1.0");
        let remap = FakeTool::new("remapper");
        let mut newer = FakeTool::new("decompiler");
        let older = FakeTool::new("decompiler");
        newer.version = "2.0";
        let inputs = artifacts(dir.path());
        let a = DecompileStage::new(&cache, &remap, &older, Duration::from_secs(5)).key(&inputs);
        let b = DecompileStage::new(&cache, &remap, &newer, Duration::from_secs(5)).key(&inputs);
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_output_is_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BuildCache::load_or_create(&dir.path().join("cache"), "0.1.0");
        let (remap, decomp) = (FakeTool::new("remapper"), FakeTool::new("decompiler"));
        let stage = DecompileStage::new(&cache, &remap, &decomp, Duration::from_secs(5));
        let inputs = artifacts(dir.path());

        let first = stage.run(&inputs).unwrap();
        std::fs::write(first.root.join("net/example/Server.java"), "edited").unwrap();
        let second = stage.run(&inputs).unwrap();
        assert_eq!(first.hash, second.hash);
        assert_eq!(decomp.runs(), 2);
    }

    #[test]
    fn remapper_failure_is_remap_failed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BuildCache::load_or_create(&dir.path().join("cache"), "0.1.0");
        let mut remap = FakeTool::new("remapper");
        remap.fail = Some(ToolError::Spawn {
            tool: "remapper".to_string(),
            reason: "boom".to_string(),
        });
        let decomp = FakeTool::new("decompiler");
        let stage = DecompileStage::new(&cache, &remap, &decomp, Duration::from_secs(5));
        let err = stage.run(&artifacts(dir.path())).unwrap_err();
        assert!(matches!(err, UpstreamError::RemapFailed(_)));
        assert_eq!(decomp.runs(), 0);
        assert!(cache.stage("decompile:1.20.4").unwrap().is_none());
    }

    #[test]
    fn decompiler_timeout_is_stage_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BuildCache::load_or_create(&dir.path().join("cache"), "0.1.0");
        let remap = FakeTool::new("remapper");
        let mut decomp = FakeTool::new("decompiler");
        decomp.fail = Some(ToolError::Timeout {
            tool: "decompiler".to_string(),
            secs: 5,
        });
        let stage = DecompileStage::new(&cache, &remap, &decomp, Duration::from_secs(5));
        let err = stage.run(&artifacts(dir.path())).unwrap_err();
        assert!(matches!(err, UpstreamError::StageTimeout { secs: 5, .. }));
    }

    #[test]
    fn missing_subdir_is_unresolvable() {
        let dir = tempfile::tempdir().unwrap();
        let tree = DecompiledTree {
            root: dir.path().to_path_buf(),
            hash: ContentHash::from_bytes(b""),
            key: ContentHash::from_bytes(b""),
        };
        assert!(matches!(
            tree.base("nope").unwrap_err(),
            UpstreamError::UnresolvableRef { .. }
        ));
    }
}
