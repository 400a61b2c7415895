// src/engine/evaluate.rs

//! Verdict evaluation.
//!
//! Drives the ordered test cases of one submission through the sandbox, one
//! run at a time, and folds the case results into a single verdict. The
//! first case that does not succeed with matching output decides the verdict
//! and no later case is run.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::Instrument;

use super::classify::{classify, ExecutionStatus};
use super::events::{JudgeEvent, JudgeEventKind};
use super::sink::EventSink;
use crate::checks::{outputs_match, truncate_for_display, DISPLAY_LIMIT_BYTES};
use crate::error::{EngineError, EngineResult};
use crate::sandbox::{Limits, RawOutcome, SandboxExecutor};
use crate::submission_id::SubmissionId;
use crate::toolchain::ToolchainRegistry;
use crate::util::sha256_hex;

/* ---------------- requests ---------------- */

/// One sandbox run: immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub language: String,
    pub source: String,
    #[serde(default)]
    pub stdin: String,
    pub limits: Limits,
}

/// Everything about a submission except the per-case stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionTemplate {
    pub language: String,
    pub source: String,
    pub limits: Limits,
}

impl SubmissionTemplate {
    pub fn request_for(&self, case: &TestCase) -> ExecutionRequest {
        ExecutionRequest {
            language: self.language.clone(),
            source: self.source.clone(),
            stdin: case.input.clone(),
            limits: self.limits.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
}

/* ---------------- results ---------------- */

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseResult {
    #[serde(flatten)]
    pub status: ExecutionStatus,

    /// Literal stdout; present only when `status` is `Success`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub produced_output: Option<String>,
}

impl CaseResult {
    pub fn from_outcome(outcome: &RawOutcome, compiled: bool) -> Self {
        let status = classify(outcome, compiled);
        let produced_output = status
            .is_success()
            .then(|| String::from_utf8_lossy(&outcome.stdout).into_owned());

        Self {
            status,
            produced_output,
        }
    }

    /// Copy with every piece of captured text bounded for display.
    pub fn for_display(&self) -> Self {
        let status = match &self.status {
            ExecutionStatus::CompileError(m) => {
                ExecutionStatus::CompileError(truncate_for_display(m, DISPLAY_LIMIT_BYTES))
            }
            ExecutionStatus::RuntimeError(m) => {
                ExecutionStatus::RuntimeError(truncate_for_display(m, DISPLAY_LIMIT_BYTES))
            }
            ExecutionStatus::InfrastructureError(m) => ExecutionStatus::InfrastructureError(
                truncate_for_display(m, DISPLAY_LIMIT_BYTES),
            ),
            other => other.clone(),
        };

        Self {
            status,
            produced_output: self
                .produced_output
                .as_deref()
                .map(|out| truncate_for_display(out, DISPLAY_LIMIT_BYTES)),
        }
    }
}

/// Final classification of a submission. Exactly one per submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionVerdict {
    Accepted,
    WrongAnswer,
    CompileError,
    RuntimeError,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    InfrastructureError,
    NoTestCases,
}

impl SubmissionVerdict {
    /// Verdict decided by a non-successful case status.
    pub fn from_failure(status: &ExecutionStatus) -> Option<Self> {
        match status {
            ExecutionStatus::Success => None,
            ExecutionStatus::CompileError(_) => Some(Self::CompileError),
            ExecutionStatus::RuntimeError(_) => Some(Self::RuntimeError),
            ExecutionStatus::TimeLimitExceeded => Some(Self::TimeLimitExceeded),
            ExecutionStatus::MemoryLimitExceeded => Some(Self::MemoryLimitExceeded),
            ExecutionStatus::InfrastructureError(_) => Some(Self::InfrastructureError),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Accepted => "Accepted",
            Self::WrongAnswer => "Wrong Answer",
            Self::CompileError => "Compilation Error",
            Self::RuntimeError => "Runtime Error",
            Self::TimeLimitExceeded => "Time Limit Exceeded",
            Self::MemoryLimitExceeded => "Memory Limit Exceeded",
            Self::InfrastructureError => "System Error",
            Self::NoTestCases => "System Error: No Test Cases",
        }
    }
}

/// The case that determined a non-Accepted verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecidingCase {
    /// Zero-based position in the supplied order
    pub index: usize,
    pub result: CaseResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct Judgement {
    pub submission_id: SubmissionId,
    pub verdict: SubmissionVerdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deciding_case: Option<DecidingCase>,
    pub cases_run: usize,
    pub source_digest: String,
}

/// Single-run ("run code") result: the raw outcome and its classification.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    #[serde(flatten)]
    pub status: ExecutionStatus,
    pub outcome: RawOutcome,
}

/* ---------------- evaluator ---------------- */

/// Stateless driver shared by concurrent submissions.
///
/// The only shared state is the read-only registry and the sandbox backend;
/// every call creates its own execution scope.
#[derive(Clone)]
pub struct Evaluator {
    registry: Arc<ToolchainRegistry>,
    sandbox: Arc<dyn SandboxExecutor>,
}

impl Evaluator {
    pub fn new(registry: Arc<ToolchainRegistry>, sandbox: Arc<dyn SandboxExecutor>) -> Self {
        Self { registry, sandbox }
    }

    pub fn registry(&self) -> &ToolchainRegistry {
        &self.registry
    }

    pub fn backend(&self) -> &'static str {
        self.sandbox.name()
    }

    /// Run one request and classify it.
    pub async fn run_single(&self, request: &ExecutionRequest) -> EngineResult<RunReport> {
        let recipe = self.registry.resolve(&request.language)?;

        let outcome = self
            .sandbox
            .execute(recipe, &request.source, &request.stdin, &request.limits)
            .instrument(tracing::info_span!(
                "run_single",
                language = %recipe.language,
                backend = self.sandbox.name()
            ))
            .await;
        let status = classify(&outcome, recipe.has_compile_step());

        tracing::info!(
            language = %recipe.language,
            status = status.label(),
            wall_ms = outcome.wall_time.as_millis() as u64,
            "single run finished"
        );

        Ok(RunReport { outcome, status })
    }

    /// Evaluate `cases` in order with first-failure-wins semantics.
    pub async fn evaluate(
        &self,
        submission_id: &SubmissionId,
        template: &SubmissionTemplate,
        cases: &[TestCase],
        sink: &mut dyn EventSink,
    ) -> EngineResult<Judgement> {
        let span = tracing::info_span!(
            "evaluate",
            submission_id = %submission_id,
            language = %template.language,
            cases = cases.len(),
            backend = self.sandbox.name()
        );

        self.fold_cases(submission_id, template, cases, sink)
            .instrument(span)
            .await
    }

    /// `evaluate`, abandoned as soon as `cancel` completes.
    ///
    /// Dropping the in-flight run tears down its scope, processes and
    /// containers through their guards.
    pub async fn evaluate_until<F>(
        &self,
        submission_id: &SubmissionId,
        template: &SubmissionTemplate,
        cases: &[TestCase],
        sink: &mut dyn EventSink,
        cancel: F,
    ) -> EngineResult<Judgement>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            judgement = self.evaluate(submission_id, template, cases, sink) => judgement,
            _ = cancel => {
                tracing::warn!(submission_id = %submission_id, "evaluation cancelled");
                Err(EngineError::Cancelled)
            }
        }
    }

    async fn fold_cases(
        &self,
        submission_id: &SubmissionId,
        template: &SubmissionTemplate,
        cases: &[TestCase],
        sink: &mut dyn EventSink,
    ) -> EngineResult<Judgement> {
        let source_digest = sha256_hex(template.source.as_bytes());
        let judgement = |verdict, deciding_case, cases_run| Judgement {
            submission_id: submission_id.clone(),
            verdict,
            deciding_case,
            cases_run,
            source_digest: source_digest.clone(),
        };

        if cases.is_empty() {
            tracing::warn!("no test cases supplied");
            return Ok(self.conclude(sink, judgement(SubmissionVerdict::NoTestCases, None, 0)));
        }

        let recipe = self.registry.resolve(&template.language)?;
        let compiled = recipe.has_compile_step();

        for (index, case) in cases.iter().enumerate() {
            sink.emit(JudgeEvent::now(
                submission_id,
                JudgeEventKind::CaseStarted { index },
            ));

            let request = template.request_for(case);
            let outcome = self
                .sandbox
                .execute(recipe, &request.source, &request.stdin, &request.limits)
                .instrument(tracing::debug_span!("case", index))
                .await;
            let result = CaseResult::from_outcome(&outcome, compiled);

            sink.emit(JudgeEvent::now(
                submission_id,
                JudgeEventKind::CaseFinished {
                    index,
                    status: result.status.label().to_string(),
                },
            ));
            tracing::debug!(
                index,
                status = result.status.label(),
                wall_ms = outcome.wall_time.as_millis() as u64,
                "case finished"
            );

            let verdict = match SubmissionVerdict::from_failure(&result.status) {
                Some(verdict) => Some(verdict),
                None => {
                    let produced = result.produced_output.as_deref().unwrap_or_default();
                    (!outputs_match(&case.expected_output, produced))
                        .then_some(SubmissionVerdict::WrongAnswer)
                }
            };

            if let Some(verdict) = verdict {
                let deciding = DecidingCase {
                    index,
                    result: result.for_display(),
                };
                return Ok(self.conclude(sink, judgement(verdict, Some(deciding), index + 1)));
            }
        }

        Ok(self.conclude(
            sink,
            judgement(SubmissionVerdict::Accepted, None, cases.len()),
        ))
    }

    fn conclude(&self, sink: &mut dyn EventSink, judgement: Judgement) -> Judgement {
        sink.emit(JudgeEvent::now(
            &judgement.submission_id,
            JudgeEventKind::VerdictReached {
                verdict: judgement.verdict,
            },
        ));
        tracing::info!(
            verdict = judgement.verdict.label(),
            cases_run = judgement.cases_run,
            deciding_case = ?judgement.deciding_case.as_ref().map(|d| d.index),
            "verdict reached"
        );
        judgement
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_map_to_matching_verdicts() {
        assert_eq!(SubmissionVerdict::from_failure(&ExecutionStatus::Success), None);
        assert_eq!(
            SubmissionVerdict::from_failure(&ExecutionStatus::CompileError("x".into())),
            Some(SubmissionVerdict::CompileError)
        );
        assert_eq!(
            SubmissionVerdict::from_failure(&ExecutionStatus::TimeLimitExceeded),
            Some(SubmissionVerdict::TimeLimitExceeded)
        );
        assert_eq!(
            SubmissionVerdict::from_failure(&ExecutionStatus::InfrastructureError("x".into())),
            Some(SubmissionVerdict::InfrastructureError)
        );
    }

    #[test]
    fn request_takes_stdin_from_the_case() {
        let template = SubmissionTemplate {
            language: "py".into(),
            source: "print(input())".into(),
            limits: Limits::new(std::time::Duration::from_secs(1), 1 << 26, 1.0),
        };
        let req = template.request_for(&TestCase {
            input: "7\n".into(),
            expected_output: "7".into(),
        });
        assert_eq!(req.stdin, "7\n");
        assert_eq!(req.language, "py");
        assert_eq!(req.limits, template.limits);
    }

    #[test]
    fn display_copy_bounds_captured_text() {
        let result = CaseResult {
            status: ExecutionStatus::RuntimeError("e".repeat(DISPLAY_LIMIT_BYTES * 2)),
            produced_output: None,
        };
        let shown = result.for_display();
        assert!(shown.status.message().unwrap().len() < DISPLAY_LIMIT_BYTES + 64);
    }

    #[test]
    fn verdict_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&SubmissionVerdict::NoTestCases).unwrap(),
            "\"no_test_cases\""
        );
    }
}
