// src/toolchain.rs

//! Toolchain registry.
//!
//! Maps a language id (`py`, `cpp`, `java`, ...) to the recipe used to
//! materialize, compile and run a submission. The registry is built once at
//! startup from the `runtime` section of the config and never mutated
//! afterwards, so it can be shared behind an `Arc` by every concurrent
//! evaluation without locking.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::Runtime;
use crate::error::{EngineError, EngineResult};

/// Language-specific compile/run commands and canonical source filename.
///
/// Commands are argv vectors executed with the isolated scope as working
/// directory, so every path in them is relative to that scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolchainRecipe {
    /// Canonical language id this recipe is registered under
    pub language: String,
    pub source_filename: String,
    pub compile_command: Option<Vec<String>>,
    pub run_command: Vec<String>,
}

impl ToolchainRecipe {
    pub fn interpreted(source_filename: &str, run: &[&str]) -> Self {
        Self {
            language: String::new(),
            source_filename: source_filename.to_string(),
            compile_command: None,
            run_command: argv(run),
        }
    }

    pub fn compiled(source_filename: &str, compile: &[&str], run: &[&str]) -> Self {
        Self {
            language: String::new(),
            source_filename: source_filename.to_string(),
            compile_command: Some(argv(compile)),
            run_command: argv(run),
        }
    }

    pub fn has_compile_step(&self) -> bool {
        self.compile_command.is_some()
    }

    fn registered_as(mut self, language: &str) -> Self {
        self.language = language.to_string();
        self
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Read-only language id -> recipe table.
#[derive(Debug, Clone, Default)]
pub struct ToolchainRegistry {
    recipes: BTreeMap<String, ToolchainRecipe>,
    aliases: BTreeMap<String, String>,
}

impl ToolchainRegistry {
    /// Built-in languages, using the interpreter/compiler binaries from config.
    pub fn builtin(runtime: &Runtime) -> Self {
        let recipes = [
            (
                "py",
                ToolchainRecipe::interpreted("main.py", &[&runtime.python, "main.py"]),
            ),
            (
                "cpp",
                ToolchainRecipe::compiled(
                    "main.cpp",
                    &[&runtime.gxx, "-O2", "-std=c++17", "-o", "main", "main.cpp"],
                    &["./main"],
                ),
            ),
            (
                "c",
                ToolchainRecipe::compiled(
                    "main.c",
                    &[&runtime.gcc, "-O2", "-std=c11", "-o", "main", "main.c", "-lm"],
                    &["./main"],
                ),
            ),
            (
                "java",
                ToolchainRecipe::compiled(
                    "Main.java",
                    &[&runtime.javac, "Main.java"],
                    &[&runtime.java, "-cp", ".", "Main"],
                ),
            ),
            (
                "js",
                ToolchainRecipe::interpreted("main.js", &[&runtime.node, "main.js"]),
            ),
        ];
        let mut registry = Self::from_recipes(recipes);

        let aliases = [
            ("python", "py"),
            ("python3", "py"),
            ("c++", "cpp"),
            ("javascript", "js"),
            ("node", "js"),
        ]
        .into_iter()
        .map(|(a, id)| (a.to_string(), id.to_string()))
        .collect();

        registry.aliases = aliases;
        registry
    }

    /// Registry with exactly the given recipes and no aliases.
    pub fn from_recipes<I, S>(recipes: I) -> Self
    where
        I: IntoIterator<Item = (S, ToolchainRecipe)>,
        S: Into<String>,
    {
        let recipes = recipes
            .into_iter()
            .map(|(id, recipe)| {
                let id: String = id.into();
                let recipe = recipe.registered_as(&id);
                (id, recipe)
            })
            .collect();

        Self {
            recipes,
            aliases: BTreeMap::new(),
        }
    }

    /// Look up the recipe for a language id (case-insensitive, aliases allowed).
    pub fn resolve(&self, language: &str) -> EngineResult<&ToolchainRecipe> {
        let key = language.trim().to_lowercase();
        let key = self.aliases.get(&key).unwrap_or(&key);

        self.recipes
            .get(key)
            .ok_or_else(|| EngineError::UnsupportedLanguage(language.to_string()))
    }

    pub fn is_registered(&self, language: &str) -> bool {
        self.resolve(language).is_ok()
    }

    /// Canonical language ids in stable order.
    pub fn languages(&self) -> impl Iterator<Item = (&str, &ToolchainRecipe)> {
        self.recipes.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ToolchainRegistry {
        ToolchainRegistry::builtin(&Runtime::default())
    }

    #[test]
    fn resolves_builtin_languages() {
        let reg = registry();

        let py = reg.resolve("py").unwrap();
        assert_eq!(py.source_filename, "main.py");
        assert!(!py.has_compile_step());
        assert_eq!(py.run_command, vec!["python3", "main.py"]);

        let cpp = reg.resolve("cpp").unwrap();
        assert!(cpp.has_compile_step());
        assert_eq!(cpp.run_command, vec!["./main"]);

        let java = reg.resolve("java").unwrap();
        assert_eq!(java.source_filename, "Main.java");
        assert_eq!(java.language, "java");
    }

    #[test]
    fn aliases_and_case_are_normalised() {
        let reg = registry();
        assert_eq!(reg.resolve("Python").unwrap(), reg.resolve("py").unwrap());
        assert_eq!(reg.resolve("C++").unwrap(), reg.resolve("cpp").unwrap());
    }

    #[test]
    fn unknown_language_is_rejected() {
        let err = registry().resolve("brainfuck").unwrap_err();
        assert_eq!(err, EngineError::UnsupportedLanguage("brainfuck".to_string()));
    }

    #[test]
    fn runtime_overrides_flow_into_recipes() {
        let runtime = Runtime {
            python: "/opt/py/bin/python3.12".to_string(),
            ..Runtime::default()
        };
        let reg = ToolchainRegistry::builtin(&runtime);
        assert_eq!(reg.resolve("py").unwrap().run_command[0], "/opt/py/bin/python3.12");
    }
}
