// src/sandbox/scope.rs

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::toolchain::ToolchainRecipe;

/// Exclusively-owned filesystem scope for one sandbox call.
///
/// Created fresh per call and never reused. The directory is removed when the
/// scope is closed or dropped, so an aborted evaluation cannot leave files
/// behind for the next submission to see.
#[derive(Debug)]
pub struct ExecutionScope {
    dir: TempDir,
    source_path: PathBuf,
}

impl ExecutionScope {
    /// Create a new scope in the system temp directory and write `source`
    /// under the recipe's filename.
    pub fn create(recipe: &ToolchainRecipe, source: &str) -> io::Result<Self> {
        Self::create_in(None, recipe, source)
    }

    /// Like `create`, under `root` when given.
    pub fn create_in(
        root: Option<&Path>,
        recipe: &ToolchainRecipe,
        source: &str,
    ) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("codejudge-");
        let dir = match root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };

        let source_path = dir.path().join(&recipe.source_filename);
        std::fs::write(&source_path, source)?;

        Ok(Self { dir, source_path })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Name unique to this scope, used to tag its processes.
    pub fn tag(&self) -> &str {
        self.dir
            .path()
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("codejudge")
    }

    /// Remove the scope, reporting removal failures instead of ignoring them.
    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn materializes_source_under_recipe_filename() {
        let recipe = ToolchainRecipe::interpreted("Main.java", &["java", "Main"]);
        let scope = ExecutionScope::create(&recipe, "class Main {}").unwrap();

        assert_eq!(scope.source_path().file_name().unwrap(), "Main.java");
        assert_eq!(
            std::fs::read_to_string(scope.source_path()).unwrap(),
            "class Main {}"
        );
    }

    #[test]
    fn scopes_are_distinct_and_removed() {
        let recipe = ToolchainRecipe::interpreted("main.py", &["python3", "main.py"]);
        let a = ExecutionScope::create(&recipe, "").unwrap();
        let b = ExecutionScope::create(&recipe, "").unwrap();
        assert_ne!(a.path(), b.path());

        let a_path = a.path().to_path_buf();
        let b_path = b.path().to_path_buf();
        a.close().unwrap();
        drop(b);

        assert!(!a_path.exists());
        assert!(!b_path.exists());
    }

    #[test]
    fn scopes_can_live_under_a_configured_root() {
        let root = tempfile::tempdir().unwrap();
        let recipe = ToolchainRecipe::interpreted("main.py", &["python3", "main.py"]);
        let scope = ExecutionScope::create_in(Some(root.path()), &recipe, "").unwrap();

        assert!(scope.path().starts_with(root.path()));
        assert!(scope.tag().starts_with("codejudge-"));
        scope.close().unwrap();
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }
}
