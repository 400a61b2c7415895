// src/sandbox/docker.rs

//! Docker backend.
//!
//! Security model, per phase container:
//! - No network (`--network none`)
//! - Memory ceiling with swap disabled (`--memory` = `--memory-swap`)
//! - CPU share (`--cpus`) and process count (`--pids-limit`)
//! - All capabilities dropped, no privilege escalation
//! - Runs as the invoking uid/gid; only the execution scope is mounted
//!
//! Each phase is split into `docker create` and `docker start --attach`, so
//! the wall clock never pays for container creation, and images are never
//! pulled mid-judge (`--pull=never` plus an image check up front). The time
//! reported is the container's own `StartedAt`..`FinishedAt` span; the
//! attached client gets `START_ALLOWANCE` on top of the limit before it is
//! killed.
//!
//! Containers are created without `--rm` so the OOM flag and timings can be
//! read back with `docker inspect`; they are force-removed on every exit
//! path, including when the call is dropped.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use tokio::process::Command;
use tracing::Instrument;
use uuid::Uuid;

use super::{
    exit_code_of, supervise, ExecutionScope, Limits, Phase, PhaseRun, RawOutcome,
    SandboxExecutor, Supervised, Terminate, COMPILE_BUDGET, COMPILE_MEMORY_BYTES,
};
use crate::config::DockerConfig;
use crate::toolchain::ToolchainRecipe;

/// Mount point of the execution scope inside every container.
const WORKDIR: &str = "/sandbox";

/// Upper bound on `docker create`; it does not count against the limit.
const CREATE_TIMEOUT: Duration = Duration::from_secs(30);

/// Slack for `docker start` to get the container running.
const START_ALLOWANCE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct DockerSandbox {
    cfg: DockerConfig,
    user: String,
    scope_root: Option<PathBuf>,
}

/// Resources for one container.
#[derive(Debug, Clone, Copy)]
struct PhaseLimits {
    wall_clock: Duration,
    memory_bytes: u64,
    cpu_share: f64,
}

impl DockerSandbox {
    pub fn new(cfg: DockerConfig) -> Self {
        let user = format!(
            "{}:{}",
            nix::unistd::getuid().as_raw(),
            nix::unistd::getgid().as_raw()
        );
        Self {
            cfg,
            user,
            scope_root: None,
        }
    }

    /// Create execution scopes under `root`; it must be visible to the daemon.
    pub fn with_scope_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scope_root = Some(root.into());
        self
    }

    /// Check the daemon is reachable and `image` is present locally.
    async fn probe(&self, image: &str) -> Result<(), String> {
        let output = Command::new(&self.cfg.binary)
            .args(["version", "--format", "{{.Server.Version}}"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| format!("failed to invoke {}: {e}", self.cfg.binary))?;

        if !output.status.success() {
            return Err(format!(
                "docker daemon unavailable: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        let output = Command::new(&self.cfg.binary)
            .args(["image", "inspect", "--format", "{{.Id}}", image])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| format!("failed to invoke {}: {e}", self.cfg.binary))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(format!(
                "image {image} is not available locally; pull it before judging"
            ))
        }
    }

    /// Arguments for `docker create`, up to and including the image.
    fn create_args(
        &self,
        name: &str,
        scope: &ExecutionScope,
        image: &str,
        limits: PhaseLimits,
        interactive: bool,
    ) -> Vec<String> {
        let mut args = vec![
            "create".to_string(),
            "--pull=never".to_string(),
            format!("--name={name}"),
            "--network=none".to_string(),
            format!("--memory={}b", limits.memory_bytes),
            format!("--memory-swap={}b", limits.memory_bytes),
            format!("--cpus={}", limits.cpu_share),
            format!("--pids-limit={}", self.cfg.pids_limit),
            "--cap-drop=ALL".to_string(),
            "--security-opt=no-new-privileges".to_string(),
            format!("--user={}", self.user),
            format!("--volume={}:{WORKDIR}:rw", scope.path().display()),
            format!("--workdir={WORKDIR}"),
            "--env=HOME=/tmp".to_string(),
            "--tmpfs=/tmp:rw,nosuid,size=64m".to_string(),
        ];
        if interactive {
            args.push("--interactive".to_string());
        }
        args.push(image.to_string());
        args
    }

    async fn create_container(
        &self,
        name: &str,
        scope: &ExecutionScope,
        image: &str,
        argv: &[String],
        limits: PhaseLimits,
        interactive: bool,
    ) -> Result<(), String> {
        let mut cmd = Command::new(&self.cfg.binary);
        cmd.args(self.create_args(name, scope, image, limits, interactive))
            .args(argv)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match tokio::time::timeout(CREATE_TIMEOUT, cmd.output()).await {
            Err(_) => Err(format!(
                "creating container {name} took longer than {}s",
                CREATE_TIMEOUT.as_secs()
            )),
            Ok(Err(e)) => Err(format!("failed to invoke {}: {e}", self.cfg.binary)),
            Ok(Ok(out)) if !out.status.success() => Err(format!(
                "failed to create container {name}: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            )),
            Ok(Ok(_)) => Ok(()),
        }
    }

    async fn run_container(
        &self,
        scope: &ExecutionScope,
        image: &str,
        argv: &[String],
        stdin: Option<&str>,
        limits: PhaseLimits,
        phase: Phase,
    ) -> Result<PhaseRun, String> {
        let name = format!(
            "codejudge-{}-{}",
            Uuid::new_v4().simple(),
            match phase {
                Phase::Compile => "compile",
                Phase::Run => "run",
            }
        );
        let container = Container::new(&self.cfg.binary, &name);
        let interactive = stdin.is_some();

        if let Err(e) = self
            .create_container(&name, scope, image, argv, limits, interactive)
            .await
        {
            container.remove().await;
            return Err(e);
        }

        let mut cmd = Command::new(&self.cfg.binary);
        cmd.args(["start", "--attach"]);
        if interactive {
            cmd.arg("--interactive");
        }
        cmd.arg(&name)
            .stdin(if interactive {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let result = match cmd.spawn() {
            Err(e) => Err(format!("failed to invoke {}: {e}", self.cfg.binary)),
            Ok(child) => {
                match supervise(child, stdin, limits.wall_clock + START_ALLOWANCE, &container).await
                {
                    Err(e) => Err(format!("lost track of container {name}: {e}")),
                    Ok(supervised) => match container.state().await {
                        Some(state) => settle(&name, supervised, state, limits.wall_clock),
                        None => Err(format!("container {name} could not be inspected")),
                    },
                }
            }
        };

        container.remove().await;
        result
    }

    async fn execute_in(
        &self,
        scope: &ExecutionScope,
        recipe: &ToolchainRecipe,
        stdin: &str,
        limits: &Limits,
    ) -> RawOutcome {
        let image = self.cfg.image_for(&recipe.language);

        if let Err(e) = self.probe(image).await {
            return RawOutcome::infra(e);
        }

        if let Some(compile) = &recipe.compile_command {
            let run = self
                .run_container(
                    scope,
                    image,
                    compile,
                    None,
                    PhaseLimits {
                        wall_clock: COMPILE_BUDGET,
                        memory_bytes: COMPILE_MEMORY_BYTES,
                        cpu_share: limits.cpu_share.max(1.0),
                    },
                    Phase::Compile,
                )
                .instrument(tracing::debug_span!("phase", phase = "compile", image))
                .await;

            match run {
                Ok(run) if run.succeeded() => {}
                Ok(run) => return RawOutcome::compile_failure(run),
                Err(e) => return RawOutcome::infra(e),
            }
        }

        let run = self
            .run_container(
                scope,
                image,
                &recipe.run_command,
                Some(stdin),
                PhaseLimits {
                    wall_clock: limits.wall_clock,
                    memory_bytes: limits.memory_bytes,
                    cpu_share: limits.cpu_share,
                },
                Phase::Run,
            )
            .instrument(tracing::debug_span!("phase", phase = "run", image))
            .await;

        match run {
            Ok(run) => RawOutcome::from_phase(Phase::Run, run),
            Err(e) => RawOutcome::infra(e),
        }
    }
}

/// Combine what the attached client saw with what the daemon recorded.
///
/// Time is taken from the container's own start/finish stamps. A container
/// that never started, or that we had to kill before it used up its limit,
/// is an infrastructure failure rather than a verdict.
fn settle(
    name: &str,
    supervised: Supervised,
    state: ContainerState,
    limit: Duration,
) -> Result<PhaseRun, String> {
    let Some(started_at) = state.started_at else {
        return Err(format!(
            "container {name} failed to start: {}",
            String::from_utf8_lossy(&supervised.stderr).trim()
        ));
    };

    let wall_time = state
        .finished_at
        .and_then(|finished| (finished - started_at).to_std().ok())
        .unwrap_or(supervised.wall_time);
    let over_limit = wall_time > limit;

    if supervised.timed_out && !over_limit && !state.oom_killed {
        return Err(format!(
            "container {name} did not get going within {}s of being started",
            START_ALLOWANCE.as_secs()
        ));
    }

    let exit_code = match state.exit_code {
        Some(code) if !supervised.timed_out => code,
        _ => exit_code_of(&supervised.status),
    };

    Ok(PhaseRun {
        exit_code,
        stdout: supervised.stdout,
        stderr: supervised.stderr,
        wall_time,
        timed_out: (supervised.timed_out || over_limit) && !state.oom_killed,
        oom_killed: state.oom_killed,
    })
}

#[async_trait]
impl SandboxExecutor for DockerSandbox {
    fn name(&self) -> &'static str {
        "docker"
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ContainerState {
    oom_killed: bool,
    /// `None` when the workload never started
    started_at: Option<DateTime<FixedOffset>>,
    finished_at: Option<DateTime<FixedOffset>>,
    exit_code: Option<i32>,
}

impl ContainerState {
    /// Parse `OOMKilled|StartedAt|FinishedAt|ExitCode` as printed by
    /// `docker inspect --format`.
    fn parse(line: &str) -> Option<Self> {
        let mut fields = line.trim().split('|');
        let oom = fields.next()?;
        let started_at = fields.next()?;
        let finished_at = fields.next()?;
        let exit_code = fields.next()?;

        Some(Self {
            oom_killed: oom == "true",
            started_at: timestamp(started_at),
            finished_at: timestamp(finished_at),
            exit_code: exit_code.parse().ok(),
        })
    }
}

/// Docker reports "never" as the zero time.
fn timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    if raw.is_empty() || raw.starts_with("0001-01-01") {
        return None;
    }
    DateTime::parse_from_rfc3339(raw).ok()
}

/// A named container that is force-removed when removed or dropped.
struct Container {
    binary: String,
    name: String,
    removed: AtomicBool,
}

impl Container {
    fn new(binary: &str, name: &str) -> Self {
        Self {
            binary: binary.to_string(),
            name: name.to_string(),
            removed: AtomicBool::new(false),
        }
    }

    /// Post-mortem container state, `None` if the container never existed.
    async fn state(&self) -> Option<ContainerState> {
        let output = Command::new(&self.binary)
            .args([
                "inspect",
                "--format",
                "{{.State.OOMKilled}}|{{.State.StartedAt}}|{{.State.FinishedAt}}|{{.State.ExitCode}}",
                &self.name,
            ])
            .stdin(Stdio::null())
            .output()
            .await;

        match output {
            Ok(out) if out.status.success() => {
                ContainerState::parse(&String::from_utf8_lossy(&out.stdout))
            }
            Ok(out) => {
                tracing::debug!(
                    container = %self.name,
                    stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                    "docker inspect failed"
                );
                None
            }
            Err(e) => {
                tracing::warn!(container = %self.name, error = %e, "docker inspect failed");
                None
            }
        }
    }

    async fn remove(&self) {
        if self.removed.swap(true, Ordering::SeqCst) {
            return;
        }
        let status = Command::new(&self.binary)
            .args(["rm", "--force", &self.name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = status {
            tracing::warn!(container = %self.name, error = %e, "failed to remove container");
        }
    }
}

#[async_trait]
impl Terminate for Container {
    async fn terminate(&self) {
        let status = Command::new(&self.binary)
            .args(["kill", &self.name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = status {
            tracing::warn!(container = %self.name, error = %e, "failed to kill container");
        }
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        if self.removed.load(Ordering::SeqCst) {
            return;
        }
        // Async teardown did not run (the call was cancelled).
        let binary = self.binary.clone();
        let name = self.name.clone();
        let remove = move || {
            let result = std::process::Command::new(&binary)
                .args(["rm", "--force", &name])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            if let Err(e) = result {
                tracing::warn!(container = %name, error = %e, "failed to remove container");
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(remove);
            }
            Err(_) => remove(),
        }
    }
}
