// src/sandbox/process.rs

//! Local process backend.
//!
//! Each phase runs as the leader of a fresh process group inside the
//! execution scope, with a cleared environment. Wall-clock and memory
//! ceilings are enforced from the outside (timer + `MemoryWatchdog`); the
//! whole group is SIGKILLed on timeout, on memory breach, after the leader
//! exits, and when the call is dropped mid-flight. Processes that detached
//! from the group are found by their scope tag and killed as well.
//!
//! This backend does not isolate the network, the filesystem or CPU share.
//! It exists for development machines and tests; untrusted code belongs in
//! `DockerSandbox`.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use tokio::process::Command;
use tracing::Instrument;

use super::reap::{kill_strays, SCOPE_ENV};
use super::{
    exit_code_of, supervise, ExecutionScope, Limits, Phase, PhaseRun, RawOutcome,
    SandboxExecutor, Terminate, COMPILE_BUDGET, COMPILE_MEMORY_BYTES,
};
use crate::metrics::MemoryWatchdog;
use crate::toolchain::ToolchainRecipe;

#[derive(Debug, Clone)]
pub struct LocalSandbox {
    sample_every: Duration,
    path: Option<OsString>,
    scope_root: Option<PathBuf>,
}

impl LocalSandbox {
    pub fn new() -> Self {
        tracing::warn!(
            "local sandbox backend does not isolate network or filesystem; use docker for untrusted code"
        );
        Self {
            sample_every: Duration::from_millis(10),
            path: std::env::var_os("PATH"),
            scope_root: None,
        }
    }

    /// Create execution scopes under `root` instead of the system temp dir.
    pub fn with_scope_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scope_root = Some(root.into());
        self
    }

    /// Override the memory sampling interval.
    pub fn with_sample_interval(mut self, every: Duration) -> Self {
        self.sample_every = every;
        self
    }

    async fn execute_in(
        &self,
        scope: &ExecutionScope,
        recipe: &ToolchainRecipe,
        stdin: &str,
        limits: &Limits,
    ) -> RawOutcome {
        if let Some(compile) = &recipe.compile_command {
            let run = self
                .run_phase(scope, compile, None, COMPILE_BUDGET, COMPILE_MEMORY_BYTES)
                .instrument(tracing::debug_span!("phase", phase = "compile"))
                .await;

            match run {
                Ok(run) if run.succeeded() => {}
                Ok(run) => return RawOutcome::compile_failure(run),
                Err(e) => return RawOutcome::infra(format!("failed to start compiler: {e}")),
            }
        }

        let run = self
            .run_phase(
                scope,
                &recipe.run_command,
                Some(stdin),
                limits.wall_clock,
                limits.memory_bytes,
            )
            .instrument(tracing::debug_span!("phase", phase = "run"))
            .await;

        match run {
            Ok(run) => RawOutcome::from_phase(Phase::Run, run),
            Err(e) => RawOutcome::infra(format!("failed to start program: {e}")),
        }
    }

    async fn run_phase(
        &self,
        scope: &ExecutionScope,
        argv: &[String],
        stdin: Option<&str>,
        wall_clock: Duration,
        memory_bytes: u64,
    ) -> io::Result<PhaseRun> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;

        let workdir = scope.path();
        let mut cmd = Command::new(program_path(workdir, program));
        cmd.args(args)
            .current_dir(workdir)
            .env_clear()
            .env("HOME", workdir)
            .env("LANG", "C.UTF-8")
            .env(SCOPE_ENV, scope.tag())
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        if let Some(path) = &self.path {
            cmd.env("PATH", path);
        }

        let child = cmd.spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| io::Error::other("child exited before it could be tracked"))?;

        let group = ProcessGroup::new(pid, scope);
        let watchdog = MemoryWatchdog::start(pid, memory_bytes, self.sample_every);

        let supervised = supervise(child, stdin, wall_clock, &group).await;

        let report = tokio::task::spawn_blocking(move || watchdog.stop_and_take())
            .await
            .map_err(io::Error::other)?;
        let supervised = supervised?;

        tracing::debug!(
            pid,
            exit = exit_code_of(&supervised.status),
            timed_out = supervised.timed_out,
            peak_bytes = ?report.peak_bytes,
            "phase finished"
        );

        Ok(PhaseRun {
            exit_code: exit_code_of(&supervised.status),
            stdout: supervised.stdout,
            stderr: supervised.stderr,
            wall_time: supervised.wall_time,
            timed_out: supervised.timed_out && !report.limit_exceeded,
            oom_killed: report.limit_exceeded,
        })
    }
}

impl Default for LocalSandbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SandboxExecutor for LocalSandbox {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn execute(
        &self,
        recipe: &ToolchainRecipe,
        source: &str,
        stdin: &str,
        limits: &Limits,
    ) -> RawOutcome {
        let scope = match ExecutionScope::create_in(self.scope_root.as_deref(), recipe, source) {
            Ok(scope) => scope,
            Err(e) => return RawOutcome::infra(format!("failed to create execution scope: {e}")),
        };

        let outcome = self.execute_in(&scope, recipe, stdin, limits).await;

        let path = scope.path().to_path_buf();
        if let Err(e) = scope.close() {
            tracing::warn!(scope = %path.display(), error = %e, "failed to remove execution scope");
        }

        outcome
    }
}

/// Relative programs with a path separator (`./main`) live in the scope.
fn program_path(workdir: &Path, program: &str) -> PathBuf {
    let p = Path::new(program);
    if p.is_relative() && program.contains('/') {
        workdir.join(p)
    } else {
        p.to_path_buf()
    }
}

/// A process group that is SIGKILLed when swept or dropped, together with
/// any process that detached from it but still carries the scope tag.
///
/// After the sweep that follows the leader's exit the guard disarms, so a
/// recycled pgid is never signalled from `Drop`.
struct ProcessGroup {
    pgid: nix::unistd::Pid,
    armed: AtomicBool,
    strays: Arc<StrayFilter>,
}

struct StrayFilter {
    tag: String,
    scope: PathBuf,
}

impl StrayFilter {
    fn kill(&self) -> usize {
        kill_strays(&self.tag, &self.scope)
    }
}

impl ProcessGroup {
    fn new(pid: u32, scope: &ExecutionScope) -> Self {
        Self {
            pgid: nix::unistd::Pid::from_raw(pid as i32),
            armed: AtomicBool::new(true),
            strays: Arc::new(StrayFilter {
                tag: scope.tag().to_string(),
                scope: scope.path().to_path_buf(),
            }),
        }
    }

    fn kill_group(&self) {
        match killpg(self.pgid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => tracing::warn!(pgid = %self.pgid, error = %e, "failed to kill process group"),
        }
    }

    /// Scanning the process table blocks, so it runs on the blocking pool.
    async fn kill_strays(&self) {
        let strays = Arc::clone(&self.strays);
        if let Err(e) = tokio::task::spawn_blocking(move || strays.kill()).await {
            tracing::warn!(error = %e, "stray process sweep failed");
        }
    }
}

#[async_trait]
impl Terminate for ProcessGroup {
    async fn terminate(&self) {
        self.kill_group();
        self.kill_strays().await;
    }

    async fn sweep(&self) {
        // Descendants may outlive the leader and keep the output pipes open.
        if self.armed.swap(false, Ordering::SeqCst) {
            self.kill_group();
            self.kill_strays().await;
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if !self.armed.load(Ordering::SeqCst) {
            return;
        }
        self.kill_group();

        // Dropped mid-flight: never block the worker thread on the scan.
        let strays = Arc::clone(&self.strays);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || strays.kill());
            }
            Err(_) => {
                strays.kill();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_path_only_rewrites_relative_paths() {
        let dir = Path::new("/tmp/scope");
        assert_eq!(program_path(dir, "./main"), PathBuf::from("/tmp/scope/./main"));
        assert_eq!(program_path(dir, "python3"), PathBuf::from("python3"));
        assert_eq!(program_path(dir, "/usr/bin/java"), PathBuf::from("/usr/bin/java"));
    }
}
