// src/sandbox/reap.rs

//! Sweeping processes that left a phase's process group.
//!
//! A program can detach with `setsid` (or `setpgid`) and be reparented away
//! from the phase leader, out of reach of `killpg` and of a parent/child
//! walk. Every local phase is started with `SCOPE_ENV` set to a tag unique
//! to its scope; any process still carrying that tag, or still working
//! inside the scope directory, is SIGKILLed.

use std::path::Path;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, System};

/// Environment variable tagging every process of one execution scope.
pub(crate) const SCOPE_ENV: &str = "CODEJUDGE_SCOPE";

/// A stray may fork while being swept; a few passes catch the offspring.
const PASSES: usize = 3;

/// Kill every live process tagged with `tag` or running inside `scope`.
///
/// Returns how many processes were signalled.
pub(crate) fn kill_strays(tag: &str, scope: &Path) -> usize {
    let marker = format!("{SCOPE_ENV}={tag}");
    let own = Pid::from_u32(std::process::id());
    let mut system = System::new();
    let mut killed = 0;

    for _ in 0..PASSES {
        system.refresh_processes_specifics(ProcessRefreshKind::everything());

        let strays: Vec<Pid> = system
            .processes()
            .iter()
            .filter(|(pid, process)| {
                **pid != own
                    && process.thread_kind().is_none()
                    && process.status() != ProcessStatus::Zombie
                    && (process.environ().iter().any(|var| *var == marker)
                        || process.cwd().is_some_and(|cwd| cwd.starts_with(scope)))
            })
            .map(|(pid, _)| *pid)
            .collect();

        if strays.is_empty() {
            break;
        }

        for pid in strays {
            let target = nix::unistd::Pid::from_raw(pid.as_u32() as i32);
            match kill(target, Signal::SIGKILL) {
                Ok(()) => killed += 1,
                Err(Errno::ESRCH) => {}
                Err(e) => tracing::warn!(pid = pid.as_u32(), error = %e, "failed to kill stray process"),
            }
        }
    }

    if killed > 0 {
        tracing::debug!(tag, killed, "killed processes that escaped their group");
    }
    killed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::CommandExt;
    use std::process::{Command, Stdio};
    use std::time::{Duration, Instant};

    #[test]
    fn kills_a_tagged_process_outside_any_group_we_own() {
        let scope = tempfile::tempdir().unwrap();
        let mut child = Command::new("sleep")
            .arg("30")
            .env(SCOPE_ENV, "reap-test-tag")
            .current_dir("/")
            .process_group(0)
            .stdout(Stdio::null())
            .spawn()
            .unwrap();

        // Give the new process time to show up in /proc
        std::thread::sleep(Duration::from_millis(50));
        assert!(kill_strays("reap-test-tag", scope.path()) >= 1);

        let started = Instant::now();
        let status = child.wait().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!status.success());
    }

    #[test]
    fn untagged_processes_elsewhere_are_left_alone() {
        let scope = tempfile::tempdir().unwrap();
        assert_eq!(kill_strays("no-process-has-this-tag", scope.path()), 0);
    }
}
