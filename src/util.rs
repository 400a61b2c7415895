// src/util.rs

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::engine::TestCase;

/// Resolve a path relative to the file that referenced it.
///
/// Example:
/// submission.yaml at `/work/submission.yaml`
/// source = "solution.cpp"
/// → resolves to `/work/solution.cpp`
pub fn resolve_relative_to(referrer: &Path, rel: &str) -> PathBuf {
    let rel = Path::new(rel);
    if rel.is_absolute() {
        return rel.to_path_buf();
    }
    referrer
        .parent()
        .map(|base| base.join(rel))
        .unwrap_or_else(|| rel.to_path_buf())
}

/// Read a UTF-8 file into a String with a clear error message.
pub fn read_to_string(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read file {:?}", path))
}

/// Ensure a directory exists (create it if missing).
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory {:?}", path))
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Load test cases from a directory of `NAME.in` / `NAME.out` pairs.
///
/// Cases are ordered by `NAME`. Only the top level of `dir` is read. An
/// input without a matching output (or the reverse) is an error.
pub fn load_cases_dir(dir: &Path) -> Result<Vec<TestCase>> {
    let mut inputs: BTreeMap<String, PathBuf> = BTreeMap::new();
    let mut outputs: BTreeMap<String, PathBuf> = BTreeMap::new();

    for entry in walkdir::WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry =
            entry.with_context(|| format!("Failed to list cases directory {:?}", dir))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        match path.extension().and_then(|s| s.to_str()) {
            Some("in") => {
                inputs.insert(stem.to_string(), path.to_path_buf());
            }
            Some("out") => {
                outputs.insert(stem.to_string(), path.to_path_buf());
            }
            _ => {}
        }
    }

    if let Some(name) = outputs.keys().find(|name| !inputs.contains_key(*name)) {
        bail!("Case {:?} has an .out file but no .in file in {:?}", name, dir);
    }

    inputs
        .into_iter()
        .map(|(name, input)| {
            let output = outputs
                .get(&name)
                .with_context(|| format!("Case {:?} has no .out file in {:?}", name, dir))?;
            Ok(TestCase {
                input: read_to_string(&input)?,
                expected_output: read_to_string(output)?,
            })
        })
        .collect()
}
