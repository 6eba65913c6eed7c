//! Black-box external tools (remapper, decompiler).
//!
//! Tools are consumed through the [`ExternalTool`] trait so the pipeline can
//! be exercised with in-process fakes. [`CommandTool`] runs a configured
//! executable with a wall-clock limit; a tool that outlives the limit is
//! killed and reported as [`ToolError::Timeout`].

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use tracing::debug;
use wait_timeout::ChildExt;
use weft_config::ToolConfig;

/// Paths handed to a single tool invocation.
#[derive(Debug, Clone)]
pub struct ToolInvocation<'a> {
    /// File or directory the tool reads.
    pub input: &'a Path,
    /// File or directory the tool must create.
    pub output: &'a Path,
    /// Mapping file, for tools that take one.
    pub mapping: Option<&'a Path>,
}

/// Why a tool invocation failed.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The executable could not be started.
    #[error("failed to start {tool}: {reason}")]
    Spawn {
        /// Tool name.
        tool: String,
        /// OS error text.
        reason: String,
    },
    /// The tool ran but reported failure.
    #[error("{tool} exited with {status}: {stderr}")]
    Exit {
        /// Tool name.
        tool: String,
        /// Exit code, or "terminated" when killed by a signal.
        status: String,
        /// Trimmed standard error.
        stderr: String,
    },
    /// The tool exceeded its time limit and was killed.
    #[error("{tool} timed out after {secs}s")]
    Timeout {
        /// Tool name.
        tool: String,
        /// Configured limit.
        secs: u64,
    },
}

/// A tool that transforms `input` into `output`.
pub trait ExternalTool: Send + Sync {
    /// Short name used in messages ("remapper", "decompiler").
    fn name(&self) -> &str;

    /// Pinned version; part of the cache key of everything the tool produces.
    fn version(&self) -> &str;

    /// Runs the tool once. `output` does not exist beforehand.
    fn run(&self, invocation: &ToolInvocation<'_>, timeout: Duration) -> Result<(), ToolError>;
}

/// A tool backed by an executable on disk.
#[derive(Debug, Clone)]
pub struct CommandTool {
    name: String,
    config: ToolConfig,
    workdir: PathBuf,
}

impl CommandTool {
    /// Creates a tool that runs `config.program` in `workdir`.
    pub fn new(name: &str, config: &ToolConfig, workdir: &Path) -> Self {
        Self {
            name: name.to_string(),
            config: config.clone(),
            workdir: workdir.to_path_buf(),
        }
    }

    /// Arguments with `{input}`, `{output}` and `{mapping}` substituted.
    pub fn expand_args(&self, invocation: &ToolInvocation<'_>) -> Vec<String> {
        let input = invocation.input.display().to_string();
        let output = invocation.output.display().to_string();
        let mapping = invocation
            .mapping
            .map(|m| m.display().to_string())
            .unwrap_or_default();
        self.config
            .args
            .iter()
            .map(|arg| {
                arg.replace("{input}", &input)
                    .replace("{output}", &output)
                    .replace("{mapping}", &mapping)
            })
            .collect()
    }
}

impl ExternalTool for CommandTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.config.version
    }

    fn run(&self, invocation: &ToolInvocation<'_>, timeout: Duration) -> Result<(), ToolError> {
        let args = self.expand_args(invocation);
        debug!(tool = %self.name, program = %self.config.program, ?args, "running tool");

        let child = Command::new(&self.config.program)
            .args(&args)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ToolError::Spawn {
                tool: self.name.clone(),
                reason: e.to_string(),
            })?;

        let finished = match wait_bounded(child, timeout) {
            Ok(Some(finished)) => finished,
            Ok(None) => {
                return Err(ToolError::Timeout {
                    tool: self.name.clone(),
                    secs: timeout.as_secs(),
                })
            }
            Err(e) => {
                return Err(ToolError::Spawn {
                    tool: self.name.clone(),
                    reason: format!("failed waiting on process: {e}"),
                })
            }
        };

        let stdout = String::from_utf8_lossy(&finished.stdout);
        let stderr = String::from_utf8_lossy(&finished.stderr);
        if !stdout.trim().is_empty() {
            debug!(tool = %self.name, "{}", stdout.trim());
        }

        if !finished.status.success() {
            let code = finished
                .status
                .code()
                .map_or_else(|| "terminated".to_string(), |c| c.to_string());
            return Err(ToolError::Exit {
                tool: self.name.clone(),
                status: code,
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}

/// A child process that exited within its time limit.
pub(crate) struct Finished {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Waits up to `timeout` for `child`, draining its piped output meanwhile.
///
/// Returns `Ok(None)` after killing a child that outlived the limit.
pub(crate) fn wait_bounded(mut child: Child, timeout: Duration) -> io::Result<Option<Finished>> {
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let status = match child.wait_timeout(timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        Err(e) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e);
        }
    };
    Ok(Some(Finished {
        status,
        stdout: join_reader(stdout),
        stderr: join_reader(stderr),
    }))
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        pipe.read_to_end(&mut buffer)?;
        Ok(buffer)
    })
}

fn join_reader(handle: Option<thread::JoinHandle<io::Result<Vec<u8>>>>) -> Vec<u8> {
    handle
        .and_then(|h| h.join().ok())
        .and_then(Result::ok)
        .unwrap_or_default()
}
