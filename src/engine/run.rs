use std::future::Future;

use serde::Serialize;

use crate::engine::events::{JudgeEvent, JudgeEventKind};
use crate::engine::sink::EventSink;
use crate::engine::validate::validate_submission;
use crate::engine::{Evaluator, Judgement, SubmissionTemplate, TestCase, ValidationResult};
use crate::error::EngineResult;
use crate::sinks::collecting::CollectingEventSink;
use crate::submission_id::SubmissionId;

/// What happened to one submission.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmissionReport {
    /// Validation passed and every needed case was run
    Judged { judgement: Judgement },

    /// Validation failed; nothing was executed
    Rejected {
        submission_id: SubmissionId,
        validation: ValidationResult,
    },
}

impl SubmissionReport {
    pub fn submission_id(&self) -> &SubmissionId {
        match self {
            SubmissionReport::Judged { judgement } => &judgement.submission_id,
            SubmissionReport::Rejected { submission_id, .. } => submission_id,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmissionReport::Judged { judgement } if judgement.verdict.is_accepted())
    }
}

/// Validate and judge a submission, collecting every emitted event.
///
/// The sink is owned here rather than borrowed from the caller so the
/// returned future stays `Send` for the HTTP handlers.
pub async fn judge_submission<F>(
    evaluator: &Evaluator,
    template: SubmissionTemplate,
    cases: Vec<TestCase>,
    cancel: F,
) -> EngineResult<(SubmissionReport, CollectingEventSink)>
where
    F: Future<Output = ()>,
{
    let mut sink = CollectingEventSink::new();
    let submission_id = SubmissionId::new();

    sink.emit(JudgeEvent::now(
        &submission_id,
        JudgeEventKind::SubmissionReceived,
    ));
    sink.emit(JudgeEvent::now(
        &submission_id,
        JudgeEventKind::ValidationStarted,
    ));

    let validation = validate_submission(evaluator.registry(), &template);

    if !validation.is_valid() {
        sink.emit(JudgeEvent::now(
            &submission_id,
            JudgeEventKind::ValidationFailed,
        ));
        tracing::info!(
            submission_id = %submission_id,
            errors = %validation.summary(),
            "submission rejected"
        );

        return Ok((
            SubmissionReport::Rejected {
                submission_id,
                validation,
            },
            sink,
        ));
    }

    let judgement = evaluator
        .evaluate_until(&submission_id, &template, &cases, &mut sink, cancel)
        .await?;

    Ok((SubmissionReport::Judged { judgement }, sink))
}
