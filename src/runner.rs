// src/runner.rs

use crate::checks::{truncate_for_display, DISPLAY_LIMIT_BYTES};
use crate::cli::{Cli, Command};
use crate::config::{BackendKind, Config, OutputMode, SubmissionFile};
use crate::engine::run::{judge_submission, SubmissionReport};
use crate::engine::{
    validate_submission, Evaluator, ExecutionRequest, RunReport, SubmissionTemplate,
};
use crate::sandbox::{DockerSandbox, Limits, LocalSandbox, SandboxExecutor};
use crate::toolchain::ToolchainRegistry;
use crate::util::{ensure_dir, load_cases_dir, read_to_string, resolve_relative_to};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Entry point from `main.rs`.
pub async fn run(cli: Cli) -> Result<()> {
    if let Command::Init { language } = &cli.command {
        return init_scaffold(language);
    }

    let mut cfg = Config::load_or_default(&cli.config)?;

    // CLI overrides
    if let Some(backend) = cli.backend {
        cfg.sandbox.backend = backend;
    }
    if let Some(mode) = cli.output {
        cfg.output.mode = mode;
    }

    match cli.command {
        Command::Init { .. } => Ok(()),

        Command::Languages => {
            let registry = ToolchainRegistry::builtin(cfg.toolchain_runtime());
            for (name, recipe) in registry.languages() {
                let kind = if recipe.has_compile_step() {
                    "compiled"
                } else {
                    "interpreted"
                };
                println!("{:<6} {:<12} {}", name, kind, recipe.source_filename);
            }
            Ok(())
        }

        Command::Serve { addr } => {
            let evaluator = build_evaluator(&cfg)?;
            let addr = addr.unwrap_or_else(|| cfg.server.addr.clone());
            crate::runtime::serve(&addr, evaluator).await
        }

        Command::Run {
            source,
            language,
            stdin,
            time,
            memory,
            cpus,
        } => {
            let language = match language {
                Some(l) => l,
                None => source
                    .extension()
                    .and_then(|s| s.to_str())
                    .map(str::to_string)
                    .with_context(|| {
                        format!("Cannot infer language from {:?}; pass --language", source)
                    })?,
            };
            let wall_clock = Duration::try_from_secs_f64(time)
                .with_context(|| format!("Invalid time limit: {}", time))?;

            let request = ExecutionRequest {
                language,
                source: read_to_string(&source)?,
                stdin: match stdin {
                    Some(p) => read_to_string(&p)?,
                    None => String::new(),
                },
                limits: Limits::new(wall_clock, memory.saturating_mul(1024 * 1024), cpus),
            };

            run_once(&cfg, request).await
        }

        Command::Judge { submission } => judge_file(&cfg, &submission).await,
    }
}

/// Build the evaluator for the configured backend.
pub fn build_evaluator(cfg: &Config) -> Result<Evaluator> {
    let registry = Arc::new(ToolchainRegistry::builtin(cfg.toolchain_runtime()));
    let scope_root = cfg.sandbox.scope_root.as_deref();

    let sandbox: Arc<dyn SandboxExecutor> = match cfg.sandbox.backend {
        BackendKind::Docker => {
            let docker = DockerSandbox::new(cfg.sandbox.docker.clone());
            match scope_root {
                Some(root) => Arc::new(docker.with_scope_root(root)),
                None => Arc::new(docker),
            }
        }
        BackendKind::Local => {
            let local = LocalSandbox::new();
            match scope_root {
                Some(root) => Arc::new(local.with_scope_root(root)),
                None => Arc::new(local),
            }
        }
    };

    tracing::debug!(backend = sandbox.name(), "evaluator ready");

    Ok(Evaluator::new(registry, sandbox))
}

/* ---------------- run (single execution) ---------------- */

async fn run_once(cfg: &Config, request: ExecutionRequest) -> Result<()> {
    let evaluator = build_evaluator(cfg)?;

    let template = SubmissionTemplate {
        language: request.language.clone(),
        source: request.source.clone(),
        limits: request.limits.clone(),
    };
    let validation = validate_submission(evaluator.registry(), &template);
    if !validation.is_valid() {
        bail!("Invalid request: {}", validation.summary());
    }

    let report = evaluator.run_single(&request).await?;

    let rendered = match cfg.output.mode {
        OutputMode::Simple => format_run_simple(&report, should_use_color()),
        mode => render_json(mode, &report)?,
    };
    println!("{}", rendered);

    Ok(())
}

fn format_run_simple(report: &RunReport, use_color: bool) -> String {
    let ok = report.status.is_success();
    let status = paint(report.status.label(), if ok { "32" } else { "31" }, use_color);

    let mut out = String::new();
    out.push_str(&format!("{}\n", status));
    out.push_str(&format!("exit: {}\n", report.outcome.exit_code));
    out.push_str(&format!("time: {}ms\n", report.outcome.wall_time.as_millis()));

    if let Some(err) = &report.outcome.infra_error {
        out.push_str(&format!("error: {}\n", err));
    }

    let stdout = String::from_utf8_lossy(&report.outcome.stdout);
    if !stdout.trim().is_empty() {
        out.push_str("stdout:\n");
        out.push_str(&truncate_for_display(&stdout, DISPLAY_LIMIT_BYTES));
        out.push('\n');
    }

    let stderr = String::from_utf8_lossy(&report.outcome.stderr);
    if !stderr.trim().is_empty() {
        out.push_str("stderr:\n");
        out.push_str(&truncate_for_display(&stderr, DISPLAY_LIMIT_BYTES));
        out.push('\n');
    }

    out.trim_end().to_string()
}

/* ---------------- judge (verdict mode) ---------------- */

async fn judge_file(cfg: &Config, path: &Path) -> Result<()> {
    let file = SubmissionFile::load(path)?;

    let source_path = resolve_relative_to(path, &file.source);
    let source = read_to_string(&source_path)?;

    let mut cases = file.cases;
    if let Some(dir) = &file.cases_dir {
        let dir = resolve_relative_to(path, dir);
        cases.extend(load_cases_dir(&dir)?);
    }

    tracing::info!(
        submission = %path.display(),
        language = %file.language,
        cases = cases.len(),
        "judging submission"
    );

    let evaluator = build_evaluator(cfg)?;
    let template = SubmissionTemplate {
        language: file.language,
        source,
        limits: file.limits,
    };

    let cancel = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let (report, sink) = judge_submission(&evaluator, template, cases, cancel).await?;

    tracing::debug!(events = sink.events().len(), "submission finished");

    let rendered = match cfg.output.mode {
        OutputMode::Simple => format_judge_simple(&report, should_use_color()),
        mode => render_json(mode, &report)?,
    };
    println!("{}", rendered);

    if !report.is_accepted() {
        bail!("Submission was not accepted");
    }
    Ok(())
}

fn format_judge_simple(report: &SubmissionReport, use_color: bool) -> String {
    let mut out = String::new();

    match report {
        SubmissionReport::Rejected { validation, .. } => {
            out.push_str(&format!("{}\n", paint("Rejected", "31", use_color)));
            for e in &validation.errors {
                out.push_str(&format!("- {}: {}\n", e.code, e.message));
            }
        }
        SubmissionReport::Judged { judgement } => {
            let ok = judgement.verdict.is_accepted();
            let verdict = paint(judgement.verdict.label(), if ok { "32" } else { "31" }, use_color);
            out.push_str(&format!("{}\n", verdict));
            out.push_str(&format!("cases run: {}\n", judgement.cases_run));

            if let Some(deciding) = &judgement.deciding_case {
                out.push_str(&format!("failed on case: {}\n", deciding.index + 1));
                if let Some(message) = deciding.result.status.message() {
                    if !message.trim().is_empty() {
                        out.push_str("details:\n");
                        out.push_str(message);
                        out.push('\n');
                    }
                }
                if let Some(produced) = &deciding.result.produced_output {
                    out.push_str("output:\n");
                    out.push_str(produced);
                    out.push('\n');
                }
            }
        }
    }

    out.push_str(&format!("submission: {}", report.submission_id()));
    out
}

/* ---------------- rendering ---------------- */

fn render_json<T: Serialize>(mode: OutputMode, value: &T) -> Result<String> {
    match mode {
        OutputMode::Pretty => {
            serde_json::to_string_pretty(value).context("Failed to format output as pretty JSON")
        }
        _ => serde_json::to_string(value).context("Failed to format output as JSON"),
    }
}

fn should_use_color() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    std::io::stdout().is_terminal()
}

fn paint(text: &str, color: &str, use_color: bool) -> String {
    if use_color {
        format!("\x1b[{}m{}\x1b[0m", color, text)
    } else {
        text.to_string()
    }
}

/* -------------------------------------------------
   init_scaffold + defaults
-------------------------------------------------- */

fn init_scaffold(language: &str) -> Result<()> {
    let (solution, body) = starter_solution(language)?;

    write_if_missing(Path::new("judge.yaml"), default_config_yaml())?;
    write_if_missing(
        Path::new("submission.yaml"),
        &default_submission_yaml(language, solution),
    )?;

    ensure_dir(Path::new("cases"))?;
    write_if_missing(Path::new("cases/sample.in"), "21\n")?;
    write_if_missing(Path::new("cases/sample.out"), "42\n")?;

    write_if_missing(Path::new(solution), body)?;

    Ok(())
}

fn write_if_missing(path: &Path, contents: &str) -> Result<()> {
    if path.exists() {
        eprintln!("{} already exists (skipping)", path.display());
        return Ok(());
    }

    std::fs::write(path, contents)
        .with_context(|| format!("Failed to write {:?}", path))?;
    eprintln!("Created {}", path.display());
    Ok(())
}

fn starter_solution(language: &str) -> Result<(&'static str, &'static str)> {
    Ok(match language {
        "py" => ("solution.py", STARTER_PY),
        "cpp" => ("solution.cpp", STARTER_CPP),
        "c" => ("solution.c", STARTER_C),
        "java" => ("Main.java", STARTER_JAVA),
        "js" => ("solution.js", STARTER_JS),
        other => bail!("No starter solution for language {:?}", other),
    })
}

fn default_config_yaml() -> &'static str {
    r#"
sandbox:
  backend: docker # docker | local
  docker:
    binary: docker
    pids_limit: 64
    images:
      py: python:3.12-slim
      cpp: gcc:14
      c: gcc:14
      java: eclipse-temurin:21-jdk
      js: node:20-slim

# host binaries, used by the local backend only
runtime:
  python: python3
  node: node
  gxx: g++
  gcc: gcc
  javac: javac
  java: java

server:
  addr: 127.0.0.1:8080

output:
  mode: simple # simple | json | pretty
"#
}

fn default_submission_yaml(language: &str, solution: &str) -> String {
    format!(
        r#"
language: {language}
source: {solution}
limits:
  wall_clock_seconds: 2
  memory_bytes: 268435456
  cpu_share: 1.0
  network: disabled
cases_dir: cases
"#
    )
}

const STARTER_PY: &str = r#"def solve():
    n = int(input())
    print(n * 2)


solve()
"#;

const STARTER_CPP: &str = r#"#include <iostream>

int main() {
    long long n;
    std::cin >> n;
    std::cout << n * 2 << "\n";
    return 0;
}
"#;

const STARTER_C: &str = r#"#include <stdio.h>

int main(void) {
    long long n;
    if (scanf("%lld", &n) != 1) return 1;
    printf("%lld\n", n * 2);
    return 0;
}
"#;

const STARTER_JAVA: &str = r#"import java.util.Scanner;

public class Main {
    public static void main(String[] args) {
        Scanner in = new Scanner(System.in);
        long n = in.nextLong();
        System.out.println(n * 2);
    }
}
"#;

const STARTER_JS: &str = r#"const lines = require("fs").readFileSync(0, "utf8").trim().split("\n");
const n = Number(lines[0]);
console.log(n * 2);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ExecutionStatus;
    use crate::sandbox::{Phase, RawOutcome};

    #[test]
    fn simple_run_output_shows_status_and_streams() {
        let report = RunReport {
            status: ExecutionStatus::RuntimeError("boom".into()),
            outcome: RawOutcome {
                phase: Phase::Run,
                stdout: b"partial\n".to_vec(),
                stderr: b"boom".to_vec(),
                exit_code: 1,
                wall_time: Duration::from_millis(12),
                timed_out: false,
                oom_killed: false,
                infra_error: None,
            },
        };

        let out = format_run_simple(&report, false);
        assert!(out.starts_with("runtime_error\nexit: 1\ntime: 12ms"));
        assert!(out.contains("stdout:\npartial"));
        assert!(out.ends_with("stderr:\nboom"));
    }

    #[test]
    fn every_init_language_has_a_starter() {
        for lang in ["py", "cpp", "c", "java", "js"] {
            assert!(starter_solution(lang).is_ok(), "{lang}");
        }
        assert!(starter_solution("cobol").is_err());
    }

    #[test]
    fn scaffold_submission_parses() {
        let yaml = default_submission_yaml("py", "solution.py");
        let sub: SubmissionFile = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(sub.language, "py");
        assert_eq!(sub.cases_dir.as_deref(), Some("cases"));
    }

    #[test]
    fn scaffold_config_parses() {
        let cfg: Config = serde_yaml::from_str(default_config_yaml()).unwrap();
        assert_eq!(cfg.sandbox.backend, BackendKind::Docker);
        assert_eq!(cfg.output.mode, OutputMode::Simple);
    }
}
