// src/config.rs

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{collections::BTreeMap, fs, path::Path};

use crate::engine::TestCase;
use crate::sandbox::Limits;

/// Root configuration loaded from `judge.yaml`.
///
/// This file controls:
/// - Which sandbox backend runs submissions (docker or local)
/// - Which container image each language runs in
/// - Which compiler / interpreter binaries the toolchain recipes invoke
/// - Where the HTTP runtime listens
///
/// Every section is optional; a missing file means "all defaults".
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Host compiler / interpreter binaries, used by the local backend.
    /// The docker backend takes `sandbox.docker.runtime` instead.
    #[serde(default)]
    pub runtime: Runtime,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

/// Sandbox section.
///
/// Example in judge.yaml:
///
/// sandbox:
///   backend: docker
///   docker:
///     images:
///       py: python:3.12-slim
#[derive(Debug, Deserialize, Default, Clone)]
pub struct SandboxConfig {
    #[serde(default)]
    pub backend: BackendKind,

    #[serde(default)]
    pub docker: DockerConfig,

    /// Directory execution scopes are created in (system temp dir if unset)
    #[serde(default)]
    pub scope_root: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// One container per phase, no network, kernel-enforced limits.
    #[default]
    Docker,

    /// Plain child processes with a memory watchdog. Development only.
    Local,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DockerConfig {
    #[serde(default = "default_docker_binary")]
    pub binary: String,

    /// Image used for languages missing from `images`
    #[serde(default = "default_image")]
    pub default_image: String,

    /// Language id -> image
    #[serde(default = "default_images")]
    pub images: BTreeMap<String, String>,

    #[serde(default = "default_pids_limit")]
    pub pids_limit: u32,

    /// Binaries as named inside the images
    #[serde(default)]
    pub runtime: Runtime,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            binary: default_docker_binary(),
            default_image: default_image(),
            images: default_images(),
            pids_limit: default_pids_limit(),
            runtime: Runtime::default(),
        }
    }
}

impl DockerConfig {
    pub fn image_for(&self, language: &str) -> &str {
        self.images
            .get(language)
            .map(String::as_str)
            .unwrap_or(&self.default_image)
    }
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_image() -> String {
    "buildpack-deps:bookworm".to_string()
}

fn default_images() -> BTreeMap<String, String> {
    [
        ("py", "python:3.12-slim"),
        ("cpp", "gcc:14"),
        ("c", "gcc:14"),
        ("java", "eclipse-temurin:21-jdk"),
        ("js", "node:20-slim"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_pids_limit() -> u32 {
    64
}

/// Runtime binary configuration.
///
/// Example:
///
/// runtime:
///   python: python3
///   gxx: g++
#[derive(Debug, Deserialize, Clone)]
pub struct Runtime {
    #[serde(default = "default_python")]
    pub python: String,

    #[serde(default = "default_node")]
    pub node: String,

    #[serde(default = "default_gxx")]
    pub gxx: String,

    #[serde(default = "default_gcc")]
    pub gcc: String,

    #[serde(default = "default_javac")]
    pub javac: String,

    #[serde(default = "default_java")]
    pub java: String,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            python: default_python(),
            node: default_node(),
            gxx: default_gxx(),
            gcc: default_gcc(),
            javac: default_javac(),
            java: default_java(),
        }
    }
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_node() -> String {
    "node".to_string()
}

fn default_gxx() -> String {
    "g++".to_string()
}

fn default_gcc() -> String {
    "gcc".to_string()
}

fn default_javac() -> String {
    "javac".to_string()
}

fn default_java() -> String {
    "java".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_addr")]
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
        }
    }
}

fn default_addr() -> String {
    "127.0.0.1:8080".to_string()
}

/// Output configuration.
///
/// Controls how CLI results are rendered.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct OutputConfig {
    #[serde(default)]
    pub mode: OutputMode,
}

/// Supported output modes.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Human-readable summary
    #[default]
    Simple,

    /// Compact JSON (machine-readable)
    Json,

    /// Pretty-printed JSON
    Pretty,
}

impl Config {
    /// Binaries the toolchain recipes invoke under the selected backend.
    pub fn toolchain_runtime(&self) -> &Runtime {
        match self.sandbox.backend {
            BackendKind::Docker => &self.sandbox.docker.runtime,
            BackendKind::Local => &self.runtime,
        }
    }

    /// Load and parse `judge.yaml` from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let cfg: Config =
            serde_yaml::from_str(&raw).context("Failed to parse YAML config")?;

        Ok(cfg)
    }

    /// Like `load`, but a missing file yields the default configuration.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }
}

/// A submission described on disk, consumed by `codejudge judge`.
///
/// Example:
///
/// language: cpp
/// source: solution.cpp
/// limits:
///   wall_clock_seconds: 2
///   memory_bytes: 268435456
///   cpu_share: 1.0
///   network: disabled
/// cases_dir: cases
#[derive(Debug, Deserialize)]
pub struct SubmissionFile {
    pub language: String,

    /// Path to the source file, relative to the submission file
    pub source: String,

    pub limits: Limits,

    /// Inline test cases, evaluated before any from `cases_dir`
    #[serde(default)]
    pub cases: Vec<TestCase>,

    /// Directory of `NAME.in` / `NAME.out` pairs
    #[serde(default)]
    pub cases_dir: Option<String>,
}

impl SubmissionFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read submission file: {:?}", path))?;

        serde_yaml::from_str(&raw).context("Failed to parse submission YAML")
    }
}
