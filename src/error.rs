// src/error.rs

//! Caller-facing engine errors.
//!
//! These are the failures that happen *before* or *around* a sandbox run and
//! are never a property of the submitted program. Everything the program
//! itself does is reported through `ExecutionStatus` / `SubmissionVerdict`.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The language id has no registered toolchain recipe.
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// The caller aborted the evaluation while a run was in flight.
    #[error("evaluation cancelled")]
    Cancelled,
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
