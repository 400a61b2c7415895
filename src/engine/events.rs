use crate::submission_id::SubmissionId;
use serde::{Deserialize, Serialize};

use super::SubmissionVerdict;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JudgeEventKind {
    SubmissionReceived,
    ValidationStarted,
    ValidationFailed,
    CaseStarted { index: usize },
    CaseFinished { index: usize, status: String },
    VerdictReached { verdict: SubmissionVerdict },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JudgeEvent {
    pub submission_id: SubmissionId,
    pub kind: JudgeEventKind,
    /// RFC 3339, UTC
    pub timestamp: String,
}

impl JudgeEvent {
    pub fn now(submission_id: &SubmissionId, kind: JudgeEventKind) -> Self {
        Self {
            submission_id: submission_id.clone(),
            kind,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
