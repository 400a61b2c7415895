use serde::Serialize;

pub mod classify;
pub mod evaluate;
pub mod events;
pub mod run;
pub mod sink;
pub mod validate;

pub use classify::{classify, ExecutionStatus};
pub use evaluate::{
    CaseResult, DecidingCase, Evaluator, ExecutionRequest, Judgement, RunReport,
    SubmissionTemplate, SubmissionVerdict, TestCase,
};
pub use events::{JudgeEvent, JudgeEventKind};
pub use sink::{EventSink, NullEventSink};
pub use validate::validate_submission;

/* ---------------- validation ---------------- */

#[derive(Debug, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
}

#[derive(Debug, Serialize)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn push_error(&mut self, code: &'static str, message: impl Into<String>) {
        self.valid = false;
        self.errors.push(ValidationError {
            code,
            message: message.into(),
        });
    }

    pub fn is_valid(&self) -> bool {
        self.valid && self.errors.is_empty()
    }

    /// One-line summary of every error, for logs and CLI output.
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.code, e.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}
