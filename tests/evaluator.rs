use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use codejudge::engine::run::{judge_submission, SubmissionReport};
use codejudge::engine::{
    Evaluator, ExecutionStatus, JudgeEventKind, NullEventSink, SubmissionTemplate,
    SubmissionVerdict, TestCase,
};
use codejudge::sandbox::{Limits, Phase, RawOutcome, SandboxExecutor};
use codejudge::sinks::collecting::CollectingEventSink;
use codejudge::submission_id::SubmissionId;
use codejudge::toolchain::{ToolchainRecipe, ToolchainRegistry};
use codejudge::EngineError;

/* ---------------- scripted sandbox ---------------- */

/// Replays queued outcomes and counts calls.
#[derive(Default)]
struct ScriptedSandbox {
    outcomes: Mutex<VecDeque<RawOutcome>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedSandbox {
    fn new(outcomes: Vec<RawOutcome>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            ..Default::default()
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SandboxExecutor for ScriptedSandbox {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn execute(
        &self,
        _recipe: &ToolchainRecipe,
        _source: &str,
        _stdin: &str,
        _limits: &Limits,
    ) -> RawOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| RawOutcome::infra("script exhausted"))
    }
}

fn stdout(text: &str) -> RawOutcome {
    RawOutcome {
        phase: Phase::Run,
        stdout: text.as_bytes().to_vec(),
        stderr: Vec::new(),
        exit_code: 0,
        wall_time: Duration::from_millis(3),
        timed_out: false,
        oom_killed: false,
        infra_error: None,
    }
}

fn timed_out() -> RawOutcome {
    RawOutcome {
        exit_code: 137,
        timed_out: true,
        ..stdout("")
    }
}

fn evaluator(sandbox: Arc<ScriptedSandbox>) -> Evaluator {
    let registry = ToolchainRegistry::from_recipes([
        ("sh", ToolchainRecipe::interpreted("main.sh", &["sh", "main.sh"])),
        (
            "cc",
            ToolchainRecipe::compiled("main.c", &["cc", "main.c"], &["./a.out"]),
        ),
    ]);
    Evaluator::new(Arc::new(registry), sandbox)
}

fn template(language: &str) -> SubmissionTemplate {
    SubmissionTemplate {
        language: language.into(),
        source: "cat".into(),
        limits: Limits::new(Duration::from_secs(1), 64 * 1024 * 1024, 1.0),
    }
}

fn case(input: &str, expected: &str) -> TestCase {
    TestCase {
        input: input.into(),
        expected_output: expected.into(),
    }
}

/* ---------------- verdicts ---------------- */

#[tokio::test]
async fn no_cases_means_no_test_cases_and_no_runs() {
    let sandbox = ScriptedSandbox::new(vec![]);
    let judgement = evaluator(sandbox.clone())
        .evaluate(&SubmissionId::new(), &template("sh"), &[], &mut NullEventSink)
        .await
        .unwrap();

    assert_eq!(judgement.verdict, SubmissionVerdict::NoTestCases);
    assert_eq!(judgement.cases_run, 0);
    assert_eq!(sandbox.calls(), 0);
}

#[tokio::test]
async fn unsupported_language_is_refused_before_any_run() {
    let sandbox = ScriptedSandbox::new(vec![stdout("1")]);
    let err = evaluator(sandbox.clone())
        .evaluate(
            &SubmissionId::new(),
            &template("brainfuck"),
            &[case("", "1")],
            &mut NullEventSink,
        )
        .await
        .unwrap_err();

    assert_eq!(err, EngineError::UnsupportedLanguage("brainfuck".into()));
    assert_eq!(sandbox.calls(), 0);
}

#[tokio::test]
async fn all_matching_cases_are_accepted() {
    let sandbox = ScriptedSandbox::new(vec![stdout("5\n"), stdout("  7  \n\n")]);
    let judgement = evaluator(sandbox.clone())
        .evaluate(
            &SubmissionId::new(),
            &template("SH"),
            &[case("5", "5"), case("7", "7\n")],
            &mut NullEventSink,
        )
        .await
        .unwrap();

    assert_eq!(judgement.verdict, SubmissionVerdict::Accepted);
    assert!(judgement.deciding_case.is_none());
    assert_eq!(judgement.cases_run, 2);
    assert_eq!(sandbox.calls(), 2);
    assert_eq!(judgement.source_digest.len(), 64);
}

#[tokio::test]
async fn first_failing_case_stops_evaluation() {
    let sandbox = ScriptedSandbox::new(vec![stdout("wrong"), stdout("2")]);
    let judgement = evaluator(sandbox.clone())
        .evaluate(
            &SubmissionId::new(),
            &template("sh"),
            &[case("1", "1"), case("2", "2")],
            &mut NullEventSink,
        )
        .await
        .unwrap();

    assert_eq!(judgement.verdict, SubmissionVerdict::WrongAnswer);
    assert_eq!(sandbox.calls(), 1);

    let deciding = judgement.deciding_case.unwrap();
    assert_eq!(deciding.index, 0);
    assert_eq!(deciding.result.produced_output.as_deref(), Some("wrong"));
}

#[tokio::test]
async fn internal_whitespace_differences_are_wrong_answers() {
    let sandbox = ScriptedSandbox::new(vec![stdout("1  2\n")]);
    let judgement = evaluator(sandbox)
        .evaluate(
            &SubmissionId::new(),
            &template("sh"),
            &[case("", "1 2")],
            &mut NullEventSink,
        )
        .await
        .unwrap();

    assert_eq!(judgement.verdict, SubmissionVerdict::WrongAnswer);
}

#[tokio::test]
async fn timeout_on_a_later_case_decides_the_verdict() {
    let sandbox = ScriptedSandbox::new(vec![stdout("1"), timed_out(), stdout("3")]);
    let judgement = evaluator(sandbox.clone())
        .evaluate(
            &SubmissionId::new(),
            &template("sh"),
            &[case("", "1"), case("", "2"), case("", "3")],
            &mut NullEventSink,
        )
        .await
        .unwrap();

    assert_eq!(judgement.verdict, SubmissionVerdict::TimeLimitExceeded);
    assert_eq!(judgement.cases_run, 2);
    assert_eq!(sandbox.calls(), 2);
    assert_eq!(
        judgement.deciding_case.unwrap().result.status,
        ExecutionStatus::TimeLimitExceeded
    );
}

#[tokio::test]
async fn compile_failure_reports_compiler_output() {
    let failed = RawOutcome {
        phase: Phase::Compile,
        stderr: b"main.c:1: error: expected ';'".to_vec(),
        exit_code: 1,
        ..stdout("")
    };
    let sandbox = ScriptedSandbox::new(vec![failed]);
    let judgement = evaluator(sandbox.clone())
        .evaluate(
            &SubmissionId::new(),
            &template("cc"),
            &[case("", "1"), case("", "2")],
            &mut NullEventSink,
        )
        .await
        .unwrap();

    assert_eq!(judgement.verdict, SubmissionVerdict::CompileError);
    assert_eq!(sandbox.calls(), 1);
    assert_eq!(
        judgement.deciding_case.unwrap().result.status,
        ExecutionStatus::CompileError("main.c:1: error: expected ';'".into())
    );
}

#[tokio::test]
async fn infrastructure_failure_is_not_blamed_on_the_submission() {
    let sandbox = ScriptedSandbox::new(vec![RawOutcome::infra("docker daemon unreachable")]);
    let judgement = evaluator(sandbox)
        .evaluate(
            &SubmissionId::new(),
            &template("sh"),
            &[case("", "1")],
            &mut NullEventSink,
        )
        .await
        .unwrap();

    assert_eq!(judgement.verdict, SubmissionVerdict::InfrastructureError);
}

/* ---------------- events & cancellation ---------------- */

#[tokio::test]
async fn events_follow_case_order_and_end_with_the_verdict() {
    let sandbox = ScriptedSandbox::new(vec![stdout("1"), stdout("x")]);
    let mut sink = CollectingEventSink::new();
    evaluator(sandbox)
        .evaluate(
            &SubmissionId::new(),
            &template("sh"),
            &[case("", "1"), case("", "2")],
            &mut sink,
        )
        .await
        .unwrap();

    let kinds: Vec<_> = sink.into_events().into_iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            JudgeEventKind::CaseStarted { index: 0 },
            JudgeEventKind::CaseFinished {
                index: 0,
                status: "success".into()
            },
            JudgeEventKind::CaseStarted { index: 1 },
            JudgeEventKind::CaseFinished {
                index: 1,
                status: "success".into()
            },
            JudgeEventKind::VerdictReached {
                verdict: SubmissionVerdict::WrongAnswer
            },
        ]
    );
}

#[tokio::test]
async fn cancelled_evaluation_returns_cancelled() {
    let sandbox = Arc::new(ScriptedSandbox {
        outcomes: Mutex::new(VecDeque::from(vec![stdout("1")])),
        delay: Some(Duration::from_secs(30)),
        ..Default::default()
    });

    let result = evaluator(sandbox)
        .evaluate_until(
            &SubmissionId::new(),
            &template("sh"),
            &[case("", "1")],
            &mut NullEventSink,
            tokio::time::sleep(Duration::from_millis(20)),
        )
        .await;

    assert_eq!(result.unwrap_err(), EngineError::Cancelled);
}

#[tokio::test]
async fn invalid_submission_is_rejected_without_running() {
    let sandbox = ScriptedSandbox::new(vec![stdout("1")]);
    let mut bad = template("sh");
    bad.source = "   ".into();

    let (report, sink) = judge_submission(
        &evaluator(sandbox.clone()),
        bad,
        vec![case("", "1")],
        std::future::pending(),
    )
    .await
    .unwrap();

    assert!(matches!(report, SubmissionReport::Rejected { .. }));
    assert!(!report.is_accepted());
    assert_eq!(sandbox.calls(), 0);

    let kinds: Vec<_> = sink.events().iter().map(|e| e.kind.clone()).collect();
    assert_eq!(
        kinds,
        vec![
            JudgeEventKind::SubmissionReceived,
            JudgeEventKind::ValidationStarted,
            JudgeEventKind::ValidationFailed,
        ]
    );
}

#[tokio::test]
async fn valid_submission_is_judged_with_one_id_throughout() {
    let sandbox = ScriptedSandbox::new(vec![stdout("1")]);
    let (report, sink) = judge_submission(
        &evaluator(sandbox),
        template("sh"),
        vec![case("", "1")],
        std::future::pending(),
    )
    .await
    .unwrap();

    assert!(report.is_accepted());
    let id = report.submission_id().clone();
    assert!(sink.events().iter().all(|e| e.submission_id == id));
    assert_eq!(sink.events().len(), 5);
}
