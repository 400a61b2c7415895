use crate::engine::{SubmissionTemplate, ValidationResult};
use crate::sandbox::Limits;
use crate::toolchain::ToolchainRegistry;

/// Upper bound accepted for a per-run wall clock.
const MAX_WALL_CLOCK_SECS: f64 = 60.0;

/// Smallest memory ceiling a program can plausibly start under.
const MIN_MEMORY_BYTES: u64 = 4 * 1024 * 1024;

pub fn validate_submission(
    registry: &ToolchainRegistry,
    template: &SubmissionTemplate,
) -> ValidationResult {
    let mut result = ValidationResult::ok();

    validate_language(registry, &template.language, &mut result);
    validate_source(&template.source, &mut result);
    validate_limits(&template.limits, &mut result);

    result
}

/* ---------------- language ---------------- */

fn validate_language(registry: &ToolchainRegistry, language: &str, result: &mut ValidationResult) {
    if !registry.is_registered(language) {
        result.push_error(
            "LANGUAGE_UNSUPPORTED",
            format!(
                "Language '{}' is not supported (available: {})",
                language.trim(),
                registry
                    .languages()
                    .map(|(name, _)| name)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        );
    }
}

/* ---------------- source ---------------- */

fn validate_source(source: &str, result: &mut ValidationResult) {
    if source.trim().is_empty() {
        result.push_error("SOURCE_EMPTY", "Source code must not be empty");
    }
}

/* ---------------- limits ---------------- */

fn validate_limits(limits: &Limits, result: &mut ValidationResult) {
    let secs = limits.wall_clock.as_secs_f64();
    if secs <= 0.0 || secs > MAX_WALL_CLOCK_SECS {
        result.push_error(
            "TIME_LIMIT_INVALID",
            format!("wall_clock_seconds must be in (0, {MAX_WALL_CLOCK_SECS}]"),
        );
    }

    if limits.memory_bytes < MIN_MEMORY_BYTES {
        result.push_error(
            "MEMORY_LIMIT_INVALID",
            format!("memory_bytes must be at least {MIN_MEMORY_BYTES}"),
        );
    }

    if !limits.cpu_share.is_finite() || limits.cpu_share <= 0.0 {
        result.push_error(
            "CPU_SHARE_INVALID",
            "cpu_share must be a positive number of cores",
        );
    }
}
