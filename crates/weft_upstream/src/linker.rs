//! Upstream linker: materializing base trees from a pinned upstream ref.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use tracing::{debug, info};
use weft_cache::{BuildCache, CasOutcome, StageRecord, TreeHasher};
use weft_common::{ContentHash, ContentHasher, VersionRef};
use weft_patch::tree::{staging_dir, swap_in};
use weft_patch::SourceTree;

use crate::decompile::read_subdir;
use crate::error::UpstreamError;
use crate::tool::wait_bounded;

/// Cache subdirectory holding exported upstream checkouts.
pub const UPSTREAM_DIR: &str = "upstream";

/// The version-control operations the linker needs.
pub trait Vcs: Send + Sync {
    /// Resolves `reference` in `repo` to a full commit id.
    fn resolve(&self, repo: &Path, reference: &str) -> Result<String, UpstreamError>;

    /// Writes the tree of `commit` into the empty directory `dest`.
    fn export(&self, repo: &Path, commit: &str, dest: &Path) -> Result<(), UpstreamError>;
}

/// [`Vcs`] backed by the `git` executable.
///
/// Every invocation is bounded by the configured tool timeout; a `git` that
/// hangs (on a credential prompt or a lock) is killed and reported as
/// [`UpstreamError::StageTimeout`].
#[derive(Debug, Clone)]
pub struct GitVcs {
    program: PathBuf,
    timeout: Duration,
}

impl GitVcs {
    /// Runs `git` from `PATH` with the given per-invocation limit.
    pub fn new(timeout: Duration) -> Self {
        Self {
            program: PathBuf::from("git"),
            timeout,
        }
    }

    /// Uses `program` instead of `git` from `PATH`.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    fn git(&self, repo: &Path, args: &[&str], reference: &str) -> Result<Vec<u8>, UpstreamError> {
        debug!(repo = %repo.display(), ?args, "git");
        let subcommand = args.first().copied().unwrap_or_default();
        let failed = |reason: String| UpstreamError::UnresolvableRef {
            reference: reference.to_string(),
            reason,
        };
        let child = Command::new(&self.program)
            .arg("-C")
            .arg(repo)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| failed(format!("failed to run git: {e}")))?;

        let output = match wait_bounded(child, self.timeout) {
            Ok(Some(output)) => output,
            Ok(None) => {
                return Err(UpstreamError::StageTimeout {
                    tool: format!("git {subcommand}"),
                    secs: self.timeout.as_secs(),
                })
            }
            Err(e) => return Err(failed(format!("failed waiting on git: {e}"))),
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(failed(if stderr.is_empty() {
                format!("git {subcommand} failed ({})", output.status)
            } else {
                stderr
            }));
        }
        Ok(output.stdout)
    }
}

impl Vcs for GitVcs {
    fn resolve(&self, repo: &Path, reference: &str) -> Result<String, UpstreamError> {
        let spec = format!("{reference}^{{commit}}");
        let out = self.git(repo, &["rev-parse", "--verify", "--quiet", &spec], reference)?;
        let commit = String::from_utf8_lossy(&out).trim().to_string();
        if commit.is_empty() {
            return Err(UpstreamError::UnresolvableRef {
                reference: reference.to_string(),
                reason: "unknown revision".to_string(),
            });
        }
        Ok(commit)
    }

    fn export(&self, repo: &Path, commit: &str, dest: &Path) -> Result<(), UpstreamError> {
        let archive = self.git(repo, &["archive", "--format=tar", commit], commit)?;
        std::fs::create_dir_all(dest).map_err(|e| UpstreamError::io(dest, e))?;
        tar::Archive::new(archive.as_slice())
            .unpack(dest)
            .map_err(|e| UpstreamError::UnresolvableRef {
                reference: commit.to_string(),
                reason: format!("failed to unpack archive: {e}"),
            })
    }
}

/// An exported upstream tree in the cache.
#[derive(Debug, Clone)]
pub struct UpstreamCheckout {
    /// The requested ref.
    pub reference: VersionRef,
    /// The commit it resolved to.
    pub commit: String,
    /// Directory holding the exported files.
    pub root: PathBuf,
    /// Content hash of the whole export.
    pub hash: ContentHash,
}

impl UpstreamCheckout {
    /// Reads the subdirectory `subdir` as a base tree.
    ///
    /// The returned tree is an in-memory copy; nothing downstream writes to
    /// the checkout.
    pub fn base(&self, subdir: &str) -> Result<SourceTree, UpstreamError> {
        read_subdir(&self.root, subdir, &format!("upstream {}", self.reference))
    }
}

/// Materializes upstream checkouts, keyed by commit.
pub struct UpstreamLinker<'a> {
    vcs: &'a dyn Vcs,
    cache: &'a BuildCache,
    repository: PathBuf,
}

impl<'a> UpstreamLinker<'a> {
    /// Creates a linker for the repository at `repository`.
    pub fn new(vcs: &'a dyn Vcs, cache: &'a BuildCache, repository: &Path) -> Self {
        Self {
            vcs,
            cache,
            repository: repository.to_path_buf(),
        }
    }

    /// Resolves `reference` and returns its exported tree.
    ///
    /// On failure no checkout directory is left behind.
    pub fn checkout(&self, reference: &VersionRef) -> Result<UpstreamCheckout, UpstreamError> {
        if !self.repository.is_dir() {
            return Err(UpstreamError::UnresolvableRef {
                reference: reference.to_string(),
                reason: format!("upstream repository {} does not exist", self.repository.display()),
            });
        }
        let commit = self.vcs.resolve(&self.repository, reference.as_str())?;
        let key = ContentHasher::new("upstream").update(commit.as_bytes()).finish();
        let stage_key = format!("upstream:{reference}");
        let root = self.cache.cache_dir().join(UPSTREAM_DIR).join(&commit);

        if let Some(record) = self.cache.stage(&stage_key)? {
            if record.input_hash == key && root.is_dir() {
                let hash = TreeHasher::snapshot(&root)?.tree_hash();
                if hash == record.output_hash {
                    debug!(reference = %reference, commit = %commit, "upstream checkout cache hit");
                    return Ok(UpstreamCheckout {
                        reference: reference.clone(),
                        commit,
                        root,
                        hash,
                    });
                }
            }
        }

        info!(reference = %reference, commit = %commit, "exporting upstream tree");
        let staged = staging_dir(&root)?;
        clear_dir(&staged)?;
        if let Err(e) = self.vcs.export(&self.repository, &commit, &staged) {
            clear_dir(&staged)?;
            return Err(e);
        }
        let hash = TreeHasher::snapshot(&staged)?.tree_hash();
        swap_in(&staged, &root)?;

        let record = StageRecord {
            input_hash: key,
            output_hash: hash,
            output_path: Some(root.clone()),
        };
        if let CasOutcome::Lost(_) = self.cache.compare_and_swap(&stage_key, record.clone())? {
            self.cache.invalidate_stage(&stage_key)?;
            self.cache.compare_and_swap(&stage_key, record)?;
        }
        Ok(UpstreamCheckout {
            reference: reference.clone(),
            commit,
            root,
            hash,
        })
    }
}

fn clear_dir(dir: &Path) -> Result<(), UpstreamError> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(UpstreamError::io(dir, e)),
    }
}
