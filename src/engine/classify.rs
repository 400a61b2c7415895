// src/engine/classify.rs

use serde::{Deserialize, Serialize};

use crate::sandbox::{Phase, RawOutcome};

/// Typed result of one execution request. Exactly one per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    CompileError(String),
    RuntimeError(String),
    TimeLimitExceeded,
    MemoryLimitExceeded,
    InfrastructureError(String),
}

impl ExecutionStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionStatus::Success)
    }

    /// Stable label for logs and events.
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::CompileError(_) => "compile_error",
            ExecutionStatus::RuntimeError(_) => "runtime_error",
            ExecutionStatus::TimeLimitExceeded => "time_limit_exceeded",
            ExecutionStatus::MemoryLimitExceeded => "memory_limit_exceeded",
            ExecutionStatus::InfrastructureError(_) => "infrastructure_error",
        }
    }

    /// Attached diagnostic text, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            ExecutionStatus::CompileError(m)
            | ExecutionStatus::RuntimeError(m)
            | ExecutionStatus::InfrastructureError(m) => Some(m),
            _ => None,
        }
    }
}

/// Map a raw sandbox outcome to an `ExecutionStatus`.
///
/// `compiled` says whether the recipe had a compile step. Only exit codes and
/// the explicit limit flags are inspected; program output is never searched
/// for keywords.
///
/// Precedence: infrastructure, compile failure, memory, time, exit code.
/// Memory is checked before time because a process starved of memory often
/// also looks like it hangs.
pub fn classify(outcome: &RawOutcome, compiled: bool) -> ExecutionStatus {
    if let Some(err) = &outcome.infra_error {
        return ExecutionStatus::InfrastructureError(err.clone());
    }

    if compiled && outcome.phase == Phase::Compile && outcome.exit_code != 0 {
        return ExecutionStatus::CompileError(lossy(&outcome.stderr));
    }

    if outcome.oom_killed {
        return ExecutionStatus::MemoryLimitExceeded;
    }

    if outcome.timed_out {
        return ExecutionStatus::TimeLimitExceeded;
    }

    if outcome.exit_code != 0 {
        return ExecutionStatus::RuntimeError(lossy(&outcome.stderr));
    }

    ExecutionStatus::Success
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
