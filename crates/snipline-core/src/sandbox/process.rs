//! Local-process sandbox backend.
//!
//! Each execution gets a fresh scratch directory (removed afterwards), a
//! cleared environment, a null stdin and `kill_on_drop` children. Every
//! step runs as the leader of its own process group, and the whole group
//! is killed when the step exits or runs out of time, so background jobs
//! never outlive the step. Output streams are captured up to
//! `max_output_bytes` each; the rest is drained and discarded so a chatty
//! child never blocks on a full pipe.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use snipline_state::{Language, Snippet};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

use super::error::{SandboxError, SandboxResult};
use super::toolchain::Toolchain;
use super::{ExecutionLimits, ExecutionOutcome, SandboxBackend};
use crate::engine::Engine;

const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// How long output is still collected once a step's process group is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// SIGKILL every process left in a step's group.
#[cfg(unix)]
fn kill_group(group: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pgid) = group.and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid, error = %e, "failed to kill step process group"),
    }
}

#[cfg(not(unix))]
fn kill_group(_group: Option<u32>) {}

/// Runs snippets as child processes of the pipeline.
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    toolchains: HashMap<Language, Toolchain>,
    scratch_root: Option<PathBuf>,
    path_env: String,
}

impl Default for ProcessSandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSandbox {
    /// Standard toolchains, the caller's `PATH`, scratch areas in the
    /// system temp dir.
    pub fn new() -> Self {
        Self {
            toolchains: Language::ALL
                .into_iter()
                .map(|lang| (lang, Toolchain::for_language(lang)))
                .collect(),
            scratch_root: None,
            path_env: std::env::var("PATH").unwrap_or_else(|_| DEFAULT_PATH.to_string()),
        }
    }

    pub fn with_toolchain(mut self, language: Language, toolchain: Toolchain) -> Self {
        self.toolchains.insert(language, toolchain);
        self
    }

    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    pub fn with_path_env(mut self, path: impl Into<String>) -> Self {
        self.path_env = path.into();
        self
    }

    pub fn toolchain(&self, language: Language) -> Option<&Toolchain> {
        self.toolchains.get(&language)
    }

    fn scratch_dir(&self) -> SandboxResult<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("snipline-");
        let dir = match &self.scratch_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        };
        dir.map_err(|e| SandboxError::Scratch(e.to_string()))
    }

    /// Resolve `program` the way the child would: relative to the scratch
    /// directory when it contains a slash, otherwise on `PATH`.
    fn locate(&self, program: &str, dir: &Path) -> Option<PathBuf> {
        if program.contains('/') {
            let path = dir.join(program);
            return path.is_file().then_some(path);
        }
        std::env::split_paths(&self.path_env)
            .map(|d| d.join(program))
            .find(|p| p.is_file())
    }

    async fn run_step(
        &self,
        argv: &[String],
        dir: &Path,
        limits: &ExecutionLimits,
        budget: Duration,
    ) -> SandboxResult<StepOutput> {
        let (program, args) = argv.split_first().ok_or_else(|| SandboxError::Spawn {
            program: String::new(),
            reason: "empty command".into(),
        })?;
        let resolved = self
            .locate(program, dir)
            .ok_or_else(|| SandboxError::ToolchainMissing {
                program: program.clone(),
            })?;

        let mut cmd = match limits.memory_limit_kb {
            Some(kb) => {
                let shell = self
                    .locate("bash", dir)
                    .ok_or_else(|| SandboxError::ToolchainMissing {
                        program: "bash".into(),
                    })?;
                let mut c = Command::new(shell);
                c.arg("-c")
                    .arg(format!("ulimit -v {kb} && exec \"$@\""))
                    .arg("snipline-step")
                    .arg(&resolved)
                    .args(args);
                c
            }
            None => {
                let mut c = Command::new(&resolved);
                c.args(args);
                c
            }
        };

        cmd.current_dir(dir)
            .env_clear()
            .env("PATH", &self.path_env)
            .env("HOME", dir)
            .env("TMPDIR", dir)
            .env("LANG", "C.UTF-8")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound => SandboxError::ToolchainMissing {
                program: program.clone(),
            },
            _ => SandboxError::Spawn {
                program: program.clone(),
                reason: e.to_string(),
            },
        })?;

        // Leader of its own group; valid until every member has exited.
        let group = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let mut out = Capture::new(limits.max_output_bytes);
        let mut err = Capture::new(limits.max_output_bytes);

        let waited = {
            let reading = async {
                tokio::join!(out.fill(stdout), err.fill(stderr));
            };
            tokio::pin!(reading);
            let mut drained = false;

            let waited = tokio::time::timeout(budget, async {
                loop {
                    tokio::select! {
                        status = child.wait() => break status,
                        _ = &mut reading, if !drained => drained = true,
                    }
                }
            })
            .await;

            // Background processes left by the step die with it.
            kill_group(group);
            if waited.is_err() {
                // Already-exited children make start_kill() fail; nothing to do then.
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
            if !drained {
                // Descendants that escaped the group may still hold the pipes.
                let _ = tokio::time::timeout(DRAIN_GRACE, &mut reading).await;
            }
            waited
        };

        let (exit_status, timed_out) = match waited {
            Ok(Ok(status)) => (status.code(), false),
            Ok(Err(e)) => return Err(SandboxError::Io(e)),
            Err(_) => (None, true),
        };

        debug!(program = %program, ?exit_status, timed_out, "step finished");
        Ok(StepOutput {
            stdout: out,
            stderr: err,
            exit_status,
            timed_out,
        })
    }
}

#[async_trait]
impl SandboxBackend for ProcessSandbox {
    fn name(&self) -> &str {
        "process"
    }

    async fn execute(
        &self,
        snippet: &Snippet,
        engine: &Engine,
        limits: &ExecutionLimits,
    ) -> SandboxResult<ExecutionOutcome> {
        let toolchain = self
            .toolchain(snippet.language)
            .ok_or_else(|| SandboxError::NoToolchain {
                language: snippet.language.to_string(),
            })?;

        let scratch = self.scratch_dir()?;
        let dir = scratch.path();
        tokio::fs::write(dir.join(&toolchain.source_file), snippet.source.as_bytes())
            .await
            .map_err(|e| SandboxError::Scratch(e.to_string()))?;

        debug!(engine = %engine.code, dir = %dir.display(), "executing snippet");
        let start = Instant::now();
        let budget = limits.wall_time();

        if let Some(compile) = &toolchain.compile {
            let step = self.run_step(compile, dir, limits, budget).await?;
            if step.timed_out || step.exit_status != Some(0) {
                return Ok(step.into_outcome(start.elapsed()));
            }
        }

        let remaining = budget.saturating_sub(start.elapsed());
        let step = self.run_step(&toolchain.run, dir, limits, remaining).await?;
        Ok(step.into_outcome(start.elapsed()))
    }
}

/// Bounded capture of one output stream.
#[derive(Debug)]
struct Capture {
    bytes: Vec<u8>,
    cap: usize,
    truncated: bool,
}

impl Capture {
    fn new(cap: usize) -> Self {
        Self {
            bytes: Vec::new(),
            cap,
            truncated: false,
        }
    }

    async fn fill<R: AsyncRead + Unpin>(&mut self, reader: Option<R>) {
        let Some(mut reader) = reader else { return };
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let room = self.cap.saturating_sub(self.bytes.len());
                    if n > room {
                        self.truncated = true;
                    }
                    self.bytes.extend_from_slice(&buf[..n.min(room)]);
                }
            }
        }
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

struct StepOutput {
    stdout: Capture,
    stderr: Capture,
    exit_status: Option<i32>,
    timed_out: bool,
}

impl StepOutput {
    fn into_outcome(self, wall_time: Duration) -> ExecutionOutcome {
        ExecutionOutcome {
            stdout: self.stdout.text(),
            stderr: self.stderr.text(),
            exit_status: self.exit_status,
            wall_time,
            timed_out: self.timed_out,
            output_truncated: self.stdout.truncated || self.stderr.truncated,
        }
    }
}
