// src/cli.rs

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{BackendKind, OutputMode};

/// Compile, run and judge untrusted submissions.
///
/// `judge.yaml` is the primary source of truth.
/// CLI flags only override config values.
#[derive(Parser, Debug)]
#[command(name = "codejudge", version, disable_help_subcommand = true)]
pub struct Cli {
    /// Path to config file
    ///
    /// A missing file means all defaults.
    #[arg(short, long, global = true, default_value = "judge.yaml")]
    pub config: PathBuf,

    /// Override sandbox backend
    #[arg(long, global = true, value_enum)]
    pub backend: Option<BackendKind>,

    /// Override output mode
    #[arg(long, global = true, value_enum)]
    pub output: Option<OutputMode>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// All supported CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a source file once and print the raw outcome.
    ///
    /// No expected output is involved; this is the "run code" mode.
    Run {
        /// Source file to run
        source: PathBuf,

        /// Language identifier (defaults to the file extension)
        #[arg(short, long)]
        language: Option<String>,

        /// File fed to stdin (defaults to empty input)
        #[arg(long)]
        stdin: Option<PathBuf>,

        /// Wall-clock limit in seconds
        #[arg(long, default_value_t = 2.0)]
        time: f64,

        /// Memory limit in MiB
        #[arg(long, default_value_t = 256)]
        memory: u64,

        /// CPU share in cores
        #[arg(long, default_value_t = 1.0)]
        cpus: f64,
    },

    /// Judge a submission against its test cases.
    ///
    /// Exits non-zero unless the verdict is Accepted.
    Judge {
        /// Submission file (YAML)
        #[arg(default_value = "submission.yaml")]
        submission: PathBuf,
    },

    /// Serve the HTTP runtime.
    Serve {
        /// Override listen address
        #[arg(long)]
        addr: Option<String>,
    },

    /// List registered languages.
    Languages,

    /// Initialise a project scaffold.
    ///
    /// Creates:
    /// - judge.yaml
    /// - submission.yaml
    /// - cases/sample.in, cases/sample.out
    /// - a starter solution for the chosen language
    Init {
        /// Starter solution language
        #[arg(value_parser = ["py", "cpp", "c", "java", "js"], default_value = "py")]
        language: String,
    },
}
