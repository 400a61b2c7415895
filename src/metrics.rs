// src/metrics.rs

//! Memory sampling and enforcement for locally spawned processes.
//!
//! The watchdog polls the resident set size of a process *tree* (the phase
//! leader plus every descendant) using the `sysinfo` crate. When the sum
//! exceeds the ceiling the whole process group is SIGKILLed and the run is
//! flagged as memory-limit-exceeded.
//!
//! Notes:
//! - Memory is sampled periodically (polling), so short spikes between two
//!   samples can be missed. The docker backend relies on the kernel instead.
//! - If the process cannot be inspected the watchdog simply stops sampling.

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::thread;
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use sysinfo::{Pid, System};

/// What the watchdog observed for one phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryReport {
    /// Peak RSS of the process tree in bytes, if any sample was taken.
    pub peak_bytes: Option<u64>,

    /// The ceiling was crossed and the group was killed.
    pub limit_exceeded: bool,
}

/// Samples a process tree and kills its group above `limit_bytes`.
pub struct MemoryWatchdog {
    stop: Arc<AtomicBool>,
    tripped: Arc<AtomicBool>,
    peak: Arc<Mutex<u64>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MemoryWatchdog {
    /// Start watching `pid`, which must lead its own process group.
    pub fn start(pid: u32, limit_bytes: u64, sample_every: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let tripped = Arc::new(AtomicBool::new(false));
        let peak = Arc::new(Mutex::new(0u64));

        let stop_clone = Arc::clone(&stop);
        let tripped_clone = Arc::clone(&tripped);
        let peak_clone = Arc::clone(&peak);

        let handle = thread::spawn(move || {
            let root = Pid::from_u32(pid);
            let mut system = System::new();

            while !stop_clone.load(Ordering::Relaxed) {
                system.refresh_processes();

                if system.process(root).is_none() {
                    break;
                }

                let rss = tree_rss(&system, root);
                if let Ok(mut guard) = peak_clone.lock() {
                    *guard = (*guard).max(rss);
                }

                if rss > limit_bytes {
                    tripped_clone.store(true, Ordering::SeqCst);
                    let pgid = nix::unistd::Pid::from_raw(pid as i32);
                    if let Err(e) = killpg(pgid, Signal::SIGKILL) {
                        tracing::warn!(pid, error = %e, "failed to kill process group over memory ceiling");
                    }
                    tracing::debug!(pid, rss, limit_bytes, "memory ceiling exceeded");
                    break;
                }

                thread::sleep(sample_every);
            }
        });

        Self {
            stop,
            tripped,
            peak,
            handle: Some(handle),
        }
    }

    /// Whether the ceiling has been crossed so far.
    pub fn tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    /// Stop sampling and return what was observed.
    pub fn stop_and_take(mut self) -> MemoryReport {
        self.stop.store(true, Ordering::Relaxed);

        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }

        let peak = match self.peak.lock() {
            Ok(guard) => *guard,
            Err(_) => 0,
        };

        MemoryReport {
            peak_bytes: (peak > 0).then_some(peak),
            limit_exceeded: self.tripped(),
        }
    }
}

/// Sum of RSS (bytes) over `root` and all of its descendants.
fn tree_rss(system: &System, root: Pid) -> u64 {
    let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
    for (pid, process) in system.processes() {
        // Threads are listed alongside processes and share their RSS.
        if process.thread_kind().is_some() {
            continue;
        }
        if let Some(parent) = process.parent() {
            children.entry(parent).or_default().push(*pid);
        }
    }

    let mut total = 0;
    let mut stack = vec![root];
    while let Some(pid) = stack.pop() {
        if let Some(process) = system.process(pid) {
            total += process.memory();
        }
        if let Some(kids) = children.get(&pid) {
            stack.extend(kids.iter().copied());
        }
    }

    total
}
