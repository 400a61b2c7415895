// src/sandbox/mod.rs

//! Sandbox executor.
//!
//! A sandbox takes a toolchain recipe, the submitted source, a stdin payload
//! and resource limits, and produces a `RawOutcome`. Every call owns a fresh
//! `ExecutionScope` which is removed before `execute` returns, together with
//! every process or container started for it.
//!
//! Two backends are provided:
//! - `DockerSandbox`: one container per phase, no network, kernel-enforced
//!   memory / CPU ceilings. This is the backend for untrusted code.
//! - `LocalSandbox`: plain child processes in their own process group with a
//!   sampling memory watchdog. Useful for development and tests.

use std::io;
use std::process::ExitStatus;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize, Serializer};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::watch;

use crate::toolchain::ToolchainRecipe;

pub mod docker;
pub mod process;
mod reap;
pub mod scope;

pub use docker::DockerSandbox;
pub use process::LocalSandbox;
pub use scope::ExecutionScope;

/// Wall-clock budget for the compile phase, independent of the run limit.
pub const COMPILE_BUDGET: Duration = Duration::from_secs(10);

/// Memory ceiling for the compile phase.
pub const COMPILE_MEMORY_BYTES: u64 = 1024 * 1024 * 1024;

/// Per-stream capture ceiling; output beyond it is drained and discarded.
pub const CAPTURE_LIMIT_BYTES: usize = 16 * 1024 * 1024;

/// How long output readers may keep draining once the workload has been
/// stopped. Pipes still held open after this belong to an escaped process
/// and are abandoned.
pub const READER_GRACE: Duration = Duration::from_millis(500);

/* ---------------- limits ---------------- */

/// Network policy for untrusted code. There is deliberately only one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkAccess {
    Disabled,
}

/// Resource-limit descriptor for one run. All fields are required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    /// Hard wall-clock ceiling for the run phase
    #[serde(rename = "wall_clock_seconds", with = "duration_secs")]
    pub wall_clock: Duration,

    /// Hard memory ceiling in bytes
    pub memory_bytes: u64,

    /// Fraction of one core (e.g. 0.5)
    pub cpu_share: f64,

    pub network: NetworkAccess,
}

impl Limits {
    pub fn new(wall_clock: Duration, memory_bytes: u64, cpu_share: f64) -> Self {
        Self {
            wall_clock,
            memory_bytes,
            cpu_share,
            network: NetworkAccess::Disabled,
        }
    }
}

mod duration_secs {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|e| D::Error::custom(format!("invalid wall_clock_seconds {secs}: {e}")))
    }
}

/* ---------------- raw outcome ---------------- */

/// Which phase produced a `RawOutcome`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Compile,
    Run,
}

/// Unclassified result of one sandbox call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawOutcome {
    /// `Compile` only when the compile step failed and nothing was run
    pub phase: Phase,

    #[serde(serialize_with = "lossy_utf8")]
    pub stdout: Vec<u8>,

    #[serde(serialize_with = "lossy_utf8")]
    pub stderr: Vec<u8>,

    /// Exit code; `128 + signo` when killed by a signal
    pub exit_code: i32,

    #[serde(rename = "wall_time_ms", serialize_with = "millis")]
    pub wall_time: Duration,

    pub timed_out: bool,
    pub oom_killed: bool,

    /// Set when the isolation layer itself failed; nothing ran
    pub infra_error: Option<String>,
}

impl RawOutcome {
    pub fn infra(message: impl Into<String>) -> Self {
        Self {
            phase: Phase::Run,
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_code: -1,
            wall_time: Duration::ZERO,
            timed_out: false,
            oom_killed: false,
            infra_error: Some(message.into()),
        }
    }

    /// Outcome of a finished phase process.
    pub(crate) fn from_phase(phase: Phase, run: PhaseRun) -> Self {
        Self {
            phase,
            stdout: run.stdout,
            stderr: run.stderr,
            exit_code: run.exit_code,
            wall_time: run.wall_time,
            timed_out: run.timed_out,
            oom_killed: run.oom_killed,
            infra_error: None,
        }
    }

    /// A compile step that did not succeed. Limit breaches during compilation
    /// are folded into the compiler's stderr so they classify as a compile
    /// error, never as a run-phase TLE/MLE.
    pub(crate) fn compile_failure(mut run: PhaseRun) -> Self {
        if run.timed_out {
            append_note(
                &mut run.stderr,
                &format!("compilation exceeded the {}s budget", COMPILE_BUDGET.as_secs()),
            );
        }
        if run.oom_killed {
            append_note(&mut run.stderr, "compilation exceeded its memory ceiling");
        }
        if run.exit_code == 0 {
            run.exit_code = -1;
        }
        run.timed_out = false;
        run.oom_killed = false;

        Self::from_phase(Phase::Compile, run)
    }
}

fn append_note(stderr: &mut Vec<u8>, note: &str) {
    if !stderr.is_empty() && !stderr.ends_with(b"\n") {
        stderr.push(b'\n');
    }
    stderr.extend_from_slice(note.as_bytes());
    stderr.push(b'\n');
}

fn lossy_utf8<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&String::from_utf8_lossy(bytes))
}

fn millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/* ---------------- executor contract ---------------- */

#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Materialize, compile (if the recipe says so) and run `source`.
    ///
    /// Never fails: isolation problems are reported through
    /// `RawOutcome::infra_error`.
    async fn execute(
        &self,
        recipe: &ToolchainRecipe,
        source: &str,
        stdin: &str,
        limits: &Limits,
    ) -> RawOutcome;
}

/* ---------------- phase plumbing shared by backends ---------------- */

/// What one phase process did.
#[derive(Debug, Clone, Default)]
pub(crate) struct PhaseRun {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
    pub wall_time: Duration,
    pub timed_out: bool,
    pub oom_killed: bool,
}

impl PhaseRun {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 && !self.timed_out && !self.oom_killed
    }
}

/// How a backend stops a running phase.
#[async_trait]
pub(crate) trait Terminate: Send + Sync {
    /// Called when the wall-clock limit fires.
    async fn terminate(&self);

    /// Called once the phase leader has exited, before output is collected.
    async fn sweep(&self) {}
}

pub(crate) struct Supervised {
    pub status: ExitStatus,
    pub timed_out: bool,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub wall_time: Duration,
}

/// Feed stdin, drain stdout/stderr and enforce the wall-clock limit on an
/// already spawned child.
pub(crate) async fn supervise<T>(
    mut child: Child,
    stdin: Option<&str>,
    wall_clock: Duration,
    terminator: &T,
) -> io::Result<Supervised>
where
    T: Terminate + ?Sized,
{
    let start = Instant::now();

    let feeder = match (child.stdin.take(), stdin) {
        (Some(mut pipe), Some(data)) => {
            let data = data.as_bytes().to_vec();
            Some(tokio::spawn(async move {
                // BrokenPipe just means the program stopped reading.
                let _ = pipe.write_all(&data).await;
                let _ = pipe.shutdown().await;
            }))
        }
        _ => None,
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("child stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::other("child stderr was not piped"))?;
    let (stop_readers, stop) = watch::channel(false);
    let stdout_task = tokio::spawn(read_capped(stdout, CAPTURE_LIMIT_BYTES, stop.clone()));
    let stderr_task = tokio::spawn(read_capped(stderr, CAPTURE_LIMIT_BYTES, stop));

    let (status, timed_out) = match tokio::time::timeout(wall_clock, child.wait()).await {
        Ok(status) => (status?, false),
        Err(_) => {
            terminator.terminate().await;
            // Fallback in case the backend could not reach the workload.
            let _ = child.start_kill();
            (child.wait().await?, true)
        }
    };
    let wall_time = start.elapsed();

    terminator.sweep().await;

    if let Some(feeder) = feeder {
        feeder.abort();
    }

    let readers = async { (stdout_task.await, stderr_task.await) };
    tokio::pin!(readers);
    let (stdout, stderr) = match tokio::time::timeout(READER_GRACE, readers.as_mut()).await {
        Ok(joined) => joined,
        Err(_) => {
            tracing::warn!("output pipes still open after the workload stopped; abandoning them");
            let _ = stop_readers.send(true);
            readers.await
        }
    };
    let stdout = stdout.map_err(io::Error::other)??;
    let stderr = stderr.map_err(io::Error::other)??;

    Ok(Supervised {
        status,
        timed_out,
        stdout,
        stderr,
        wall_time,
    })
}

/// Read a stream to EOF, keeping at most `cap` bytes.
///
/// Returns early with what was kept so far once `stop` flips or its sender
/// goes away.
pub(crate) async fn read_capped<R>(
    mut reader: R,
    cap: usize,
    mut stop: watch::Receiver<bool>,
) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::new();
    let mut chunk = [0u8; 8192];

    loop {
        let n = tokio::select! {
            n = reader.read(&mut chunk) => n?,
            _ = stop.changed() => break,
        };
        if n == 0 {
            break;
        }
        let room = cap.saturating_sub(kept.len());
        kept.extend_from_slice(&chunk[..n.min(room)]);
    }

    Ok(kept)
}

/// Exit code with the shell convention for signals.
pub(crate) fn exit_code_of(status: &ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_deserialize_from_descriptor() {
        let limits: Limits = serde_json::from_str(
            r#"{"wall_clock_seconds": 1.5, "memory_bytes": 268435456, "cpu_share": 0.5, "network": "disabled"}"#,
        )
        .unwrap();
        assert_eq!(limits.wall_clock, Duration::from_millis(1500));
        assert_eq!(limits, Limits::new(Duration::from_millis(1500), 268435456, 0.5));
    }

    #[test]
    fn limits_reject_network_access_and_missing_fields() {
        assert!(serde_json::from_str::<Limits>(
            r#"{"wall_clock_seconds": 1, "memory_bytes": 1, "cpu_share": 1, "network": "enabled"}"#
        )
        .is_err());
        assert!(serde_json::from_str::<Limits>(
            r#"{"wall_clock_seconds": 1, "memory_bytes": 1, "network": "disabled"}"#
        )
        .is_err());
        assert!(serde_json::from_str::<Limits>(
            r#"{"wall_clock_seconds": -1, "memory_bytes": 1, "cpu_share": 1, "network": "disabled"}"#
        )
        .is_err());
    }

    #[test]
    fn compile_timeout_becomes_plain_compile_failure() {
        let raw = RawOutcome::compile_failure(PhaseRun {
            stderr: b"partial".to_vec(),
            exit_code: 137,
            timed_out: true,
            ..PhaseRun::default()
        });
        assert_eq!(raw.phase, Phase::Compile);
        assert!(!raw.timed_out);
        assert_eq!(raw.exit_code, 137);
        let stderr = String::from_utf8(raw.stderr).unwrap();
        assert!(stderr.starts_with("partial\n"));
        assert!(stderr.contains("exceeded the 10s budget"));
    }

    #[tokio::test]
    async fn read_capped_drains_past_the_cap() {
        let data = vec![b'x'; 50_000];
        let (_keep, stop) = watch::channel(false);
        let kept = read_capped(&data[..], 1000, stop).await.unwrap();
        assert_eq!(kept.len(), 1000);
    }

    #[tokio::test]
    async fn read_capped_gives_up_on_a_pipe_that_never_closes() {
        let (mut writer, reader) = tokio::io::duplex(64);
        writer.write_all(b"partial").await.unwrap();

        let (stop_tx, stop) = watch::channel(false);
        let task = tokio::spawn(read_capped(reader, 1000, stop));
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop_tx.send(true).unwrap();

        let kept = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(kept, b"partial");
        drop(writer);
    }
}
