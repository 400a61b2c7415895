// src/lib.rs

//! codejudge
//!
//! Execution and verdict engine for untrusted code submissions.
//!
//! A submission (language, source, resource limits) is compiled if needed,
//! run against ordered test cases inside a sandbox, and folded into exactly
//! one verdict. The same engine backs the `codejudge` CLI and its HTTP
//! runtime.

pub mod auth;
pub mod checks;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod runner;
pub mod runtime;
pub mod sandbox;
pub mod sinks;
pub mod submission_id;
pub mod toolchain;
pub mod util;

pub use engine::{
    EventSink, Evaluator, ExecutionRequest, ExecutionStatus, Judgement, SubmissionTemplate,
    SubmissionVerdict, TestCase,
};
pub use error::{EngineError, EngineResult};
pub use sandbox::{DockerSandbox, Limits, LocalSandbox, RawOutcome, SandboxExecutor};
pub use toolchain::{ToolchainRecipe, ToolchainRegistry};
