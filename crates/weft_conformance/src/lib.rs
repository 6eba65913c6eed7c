//! Scenario test helpers for the weft pipeline.
//!
//! Provides a throwaway on-disk project ([`Workspace`]) plus in-process
//! stand-ins for the collaborators the pipeline normally shells out to: a
//! version control system that serves a plain directory ([`DirVcs`]) and a
//! remapper/decompiler pair ([`FakeTool`]) whose output is a pure function
//! of its input.

#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use weft_build::{Orchestrator, Toolchain};
use weft_cache::BuildCache;
use weft_config::ResolvedProject;
use weft_patch::rebuild::diff_section;
use weft_patch::{Patch, SourceTree, DEFAULT_AUTHOR};
use weft_upstream::{
    ExternalTool, LocalRepository, Mapping, RepositoryClient, ToolError, ToolInvocation,
    UpstreamError, Vcs,
};

/// Cache format version used by every workspace.
pub const VERSION: &str = "0.1.0";

/// Commit id [`DirVcs`] resolves `main` to.
pub const MAIN_COMMIT: &str = "c0ffee0000000000000000000000000000000000";

/// Serves the upstream repository directory as a single commit named `main`.
#[derive(Debug, Default)]
pub struct DirVcs;

impl Vcs for DirVcs {
    fn resolve(&self, _repo: &Path, reference: &str) -> Result<String, UpstreamError> {
        match reference {
            "main" | MAIN_COMMIT => Ok(MAIN_COMMIT.to_string()),
            other => Err(UpstreamError::UnresolvableRef {
                reference: other.to_string(),
                reason: "no such ref".to_string(),
            }),
        }
    }

    fn export(&self, repo: &Path, _commit: &str, dest: &Path) -> Result<(), UpstreamError> {
        SourceTree::read(repo)?.write_to(dest)?;
        Ok(())
    }
}

/// How a [`FakeTool`] fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeFailure {
    /// Exit with status 1.
    Exit,
    /// Report a timeout.
    Timeout,
}

/// A deterministic remapper or decompiler.
///
/// As a remapper (invoked with a mapping) it copies the binary, replacing
/// every identifier listed in the mapping with its readable name. As a
/// decompiler it reads the binary as lines of `path<TAB>content` and writes
/// one file per line, turning `\n` escapes into newlines.
#[derive(Debug, Clone)]
pub struct FakeTool {
    name: String,
    version: String,
    runs: Arc<AtomicUsize>,
    failure: Option<FakeFailure>,
}

impl FakeTool {
    /// A tool named `name` at version `1.0`.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: "1.0".to_string(),
            runs: Arc::new(AtomicUsize::new(0)),
            failure: None,
        }
    }

    /// Pins a different version.
    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    /// Makes every invocation fail.
    pub fn failing(mut self, failure: FakeFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    /// Shared count of invocations, readable after the tool is moved into a
    /// [`Toolchain`].
    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.runs)
    }

    fn remap(&self, inv: &ToolInvocation<'_>, mapping: &Path) -> Result<(), ToolError> {
        let mapping = std::fs::read_to_string(mapping)
            .ok()
            .and_then(|text| Mapping::parse(&text).ok())
            .ok_or_else(|| self.exit("unreadable mapping"))?;
        let binary = std::fs::read_to_string(inv.input).map_err(|e| self.exit(&e.to_string()))?;
        let remapped = replace_identifiers(&binary, |ident| mapping.lookup(ident));
        std::fs::write(inv.output, remapped).map_err(|e| self.exit(&e.to_string()))
    }

    fn decompile(&self, inv: &ToolInvocation<'_>) -> Result<(), ToolError> {
        let binary = std::fs::read_to_string(inv.input).map_err(|e| self.exit(&e.to_string()))?;
        for line in binary.lines().filter(|l| !l.trim().is_empty()) {
            let (path, content) = line
                .split_once('\t')
                .ok_or_else(|| self.exit(&format!("malformed class entry '{line}'")))?;
            let dest = inv.output.join(path);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).map_err(|e| self.exit(&e.to_string()))?;
            }
            std::fs::write(&dest, content.replace("\\n", "\n"))
                .map_err(|e| self.exit(&e.to_string()))?;
        }
        std::fs::create_dir_all(inv.output).map_err(|e| self.exit(&e.to_string()))
    }

    fn exit(&self, stderr: &str) -> ToolError {
        ToolError::Exit {
            tool: self.name.clone(),
            status: "1".to_string(),
            stderr: stderr.to_string(),
        }
    }
}

impl ExternalTool for FakeTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn run(&self, inv: &ToolInvocation<'_>, timeout: Duration) -> Result<(), ToolError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        match self.failure {
            Some(FakeFailure::Exit) => return Err(self.exit("simulated failure")),
            Some(FakeFailure::Timeout) => {
                return Err(ToolError::Timeout {
                    tool: self.name.clone(),
                    secs: timeout.as_secs(),
                })
            }
            None => {}
        }
        match inv.mapping {
            Some(mapping) => self.remap(inv, mapping),
            None => self.decompile(inv),
        }
    }
}

/// Replaces each maximal run of identifier characters for which `lookup`
/// returns a name.
fn replace_identifiers<'m>(text: &str, lookup: impl Fn(&str) -> Option<&'m str>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut ident = String::new();
    let flush = |ident: &mut String, out: &mut String| {
        if !ident.is_empty() {
            match lookup(ident.as_str()) {
                Some(name) => out.push_str(name),
                None => out.push_str(ident),
            }
            ident.clear();
        }
    };
    for c in text.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            ident.push(c);
        } else {
            flush(&mut ident, &mut out);
            out.push(c);
        }
    }
    flush(&mut ident, &mut out);
    out
}

/// A project in a temporary directory, with its cache and a fake toolchain.
pub struct Workspace {
    dir: TempDir,
    /// The resolved configuration.
    pub project: ResolvedProject,
    /// The project's build cache.
    pub cache: BuildCache,
    /// Collaborators: [`DirVcs`] always, [`FakeTool`]s when `[tools]` is
    /// configured, and local repositories as configured.
    pub toolchain: Toolchain,
}

impl Workspace {
    /// Creates a project from `config` (the contents of `weft.toml`) and
    /// `files` (paths relative to the project root).
    pub fn new(config: &str, files: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        std::fs::write(dir.path().join(weft_config::CONFIG_FILE), config).expect("write config");
        for (path, content) in files {
            write_file(&dir.path().join(path), content.as_bytes());
        }
        let (project, cache, toolchain) = open(dir.path());
        Self {
            dir,
            project,
            cache,
            toolchain,
        }
    }

    /// The project root.
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// `rel` resolved against the project root.
    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    /// Writes a file, creating parent directories.
    pub fn write(&self, rel: &str, content: &str) {
        write_file(&self.path(rel), content.as_bytes());
    }

    /// Reads a text file.
    pub fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.path(rel)).unwrap_or_else(|e| panic!("read {rel}: {e}"))
    }

    /// Writes a one-file patch named `name` into `module`'s patch directory.
    pub fn write_patch(&self, module: &str, name: &str, path: &str, old: &str, new: &str) {
        let mut patch = Patch::new(DEFAULT_AUTHOR, &format!("Change {path}"));
        let section = diff_section(path, Some(old.as_bytes()), Some(new.as_bytes()))
            .expect("diff")
            .expect("contents differ");
        patch.files.push(section);
        let dir = &self.project.module(module).expect("module").patch_dir;
        write_file(&dir.join(name), patch.render().as_bytes());
    }

    /// Raw bytes of a patch file.
    pub fn patch_bytes(&self, module: &str, name: &str) -> Vec<u8> {
        let dir = &self.project.module(module).expect("module").patch_dir;
        std::fs::read(dir.join(name)).unwrap_or_else(|e| panic!("read patch {name}: {e}"))
    }

    /// Publishes `data` at `path` in the local repository directory `repo`.
    pub fn publish(&self, repo: &str, path: &str, data: &[u8]) {
        LocalRepository::new(&self.path(repo))
            .publish(path, data)
            .expect("publish to local repository");
    }

    /// Replaces the remapper and decompiler.
    pub fn set_tools(&mut self, remapper: FakeTool, decompiler: FakeTool) {
        self.toolchain.remapper = Some(Box::new(remapper));
        self.toolchain.decompiler = Some(Box::new(decompiler));
    }

    /// Reloads configuration and cache from disk, as a new process would.
    /// Tools are reset to fresh fakes.
    pub fn reopen(&mut self) {
        let (project, cache, toolchain) = open(self.dir.path());
        self.project = project;
        self.cache = cache;
        self.toolchain = toolchain;
    }

    /// An orchestrator over this workspace.
    pub fn orchestrator(&self) -> Orchestrator<'_> {
        Orchestrator::new(&self.project, &self.cache, &self.toolchain).expect("valid module graph")
    }
}

fn open(root: &Path) -> (ResolvedProject, BuildCache, Toolchain) {
    let config = weft_config::load_config(root).expect("valid weft.toml");
    let project = weft_config::resolve_project(&config, root);
    let cache = BuildCache::load_or_create(&project.cache_dir, VERSION);
    let mut toolchain = Toolchain::from_project(&project).expect("open repositories");
    toolchain.vcs = Box::new(DirVcs);
    if toolchain.remapper.is_some() {
        toolchain.remapper = Some(Box::new(FakeTool::new("remapper")));
    }
    if toolchain.decompiler.is_some() {
        toolchain.decompiler = Some(Box::new(FakeTool::new("decompiler")));
    }
    (project, cache, toolchain)
}

fn write_file(path: &Path, data: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent dirs");
    }
    std::fs::write(path, data).expect("write file");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_replaced_whole() {
        let out = replace_identifiers("class a extends ab { a x; }", |i| {
            (i == "a").then_some("Server")
        });
        assert_eq!(out, "class Server extends ab { Server x; }");
    }

    #[test]
    fn decompiler_writes_one_file_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.jar");
        std::fs::write(&input, "net/A.java\tclass A {}\\n\nB.java\tclass B {}\\n\n").unwrap();
        let output = dir.path().join("out");
        let tool = FakeTool::new("decompiler");
        let inv = ToolInvocation {
            input: &input,
            output: &output,
            mapping: None,
        };
        tool.run(&inv, Duration::from_secs(1)).unwrap();
        assert_eq!(
            std::fs::read_to_string(output.join("net/A.java")).unwrap(),
            "class A {}\n"
        );
        assert!(output.join("B.java").is_file());
        assert_eq!(tool.counter().load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dir_vcs_rejects_unknown_refs() {
        let err = DirVcs.resolve(Path::new("."), "v9").unwrap_err();
        assert!(matches!(err, UpstreamError::UnresolvableRef { .. }));
    }
}
