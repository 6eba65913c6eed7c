//! External collaborators the pipeline drives.

use std::time::Duration;

use weft_config::ResolvedProject;
use weft_upstream::{
    open_repository, CommandTool, ExternalTool, GitVcs, RepositoryClient, UpstreamError, Vcs,
};

/// The version control system, tools, and repositories used by one run.
///
/// Tests substitute in-process fakes for any of them.
pub struct Toolchain {
    /// Resolves and exports the upstream source revision.
    pub vcs: Box<dyn Vcs>,
    /// Rewrites obfuscated symbols; `None` when `[tools.remapper]` is absent.
    pub remapper: Option<Box<dyn ExternalTool>>,
    /// Produces sources from the remapped binary.
    pub decompiler: Option<Box<dyn ExternalTool>>,
    /// Hosts the upstream binary and mapping; `None` without `[artifact]`.
    pub artifacts: Option<Box<dyn RepositoryClient>>,
    /// Library repositories, searched in order for the bootstrap loader.
    pub libraries: Vec<Box<dyn RepositoryClient>>,
    /// Where `publish` uploads to; `None` without `[publish]`.
    pub publisher: Option<Box<dyn RepositoryClient>>,
    /// Wall-clock limit per tool or git invocation.
    pub timeout: Duration,
}

impl Toolchain {
    /// The production toolchain for `project`: git, the configured tool
    /// commands, and the configured artifact repository.
    pub fn from_project(project: &ResolvedProject) -> Result<Self, UpstreamError> {
        let tool = |name: &str, config: &Option<weft_config::ToolConfig>| {
            config
                .as_ref()
                .map(|c| Box::new(CommandTool::new(name, c, &project.root)) as Box<dyn ExternalTool>)
        };
        let timeout = Duration::from_secs(project.tools.timeout_secs);
        let artifacts = match &project.artifact {
            Some(artifact) => Some(open_repository(&artifact.repository, &project.root, timeout)?),
            None => None,
        };
        let libraries = project
            .bundle
            .library_repositories
            .iter()
            .map(|location| open_repository(location, &project.root, timeout))
            .collect::<Result<Vec<_>, _>>()?;
        let publisher = match &project.publish {
            Some(publish) => Some(open_repository(&publish.repository, &project.root, timeout)?),
            None => None,
        };
        Ok(Self {
            vcs: Box::new(GitVcs::new(timeout)),
            remapper: tool("remapper", &project.tools.remapper),
            decompiler: tool("decompiler", &project.tools.decompiler),
            artifacts,
            libraries,
            publisher,
            timeout,
        })
    }

    /// A toolchain with only a version control system; enough for projects
    /// whose modules are all based on the upstream checkout.
    pub fn with_vcs(vcs: Box<dyn Vcs>) -> Self {
        Self {
            vcs,
            remapper: None,
            decompiler: None,
            artifacts: None,
            libraries: Vec::new(),
            publisher: None,
            timeout: Duration::from_secs(600),
        }
    }
}
