// src/supervise/entry_point.rs

//! Locating the training function for accelerator-pod workers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use tracing::debug;

use crate::errors::{LaunchError, Result};
use crate::fs::FileSystem;

/// A function workers import and call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    /// Importable module name.
    pub module: String,
    /// Directory to put on the import path, when the module came from a
    /// script file.
    pub search_path: Option<PathBuf>,
    pub function: String,
}

pub trait EntryPointResolver: Send + Sync {
    /// Resolve `function` inside `script` (a file path, or a dotted module
    /// name when `module` is set).
    fn resolve(&self, script: &str, module: bool, function: &str) -> Result<EntryPoint>;
}

/// Reads the candidate source file and looks for a top-level definition.
#[derive(Debug, Clone)]
pub struct FsEntryPointResolver {
    fs: Arc<dyn FileSystem>,
    /// Roots searched for dotted module names.
    module_roots: Vec<PathBuf>,
}

impl FsEntryPointResolver {
    pub fn new(fs: Arc<dyn FileSystem>, module_roots: Vec<PathBuf>) -> Self {
        Self { fs, module_roots }
    }

    fn module_source(&self, dotted: &str) -> Option<PathBuf> {
        let relative: PathBuf = dotted.split('.').collect();
        self.module_roots.iter().find_map(|root| {
            let base = root.join(&relative);
            [base.with_extension("py"), base.join("__init__.py")]
                .into_iter()
                .find(|candidate| self.fs.is_file(candidate))
        })
    }
}

impl EntryPointResolver for FsEntryPointResolver {
    fn resolve(&self, script: &str, module: bool, function: &str) -> Result<EntryPoint> {
        let (source, module_name, search_path) = if module {
            let source = self.module_source(script).ok_or_else(|| {
                LaunchError::EntryPoint(format!("cannot locate module `{script}`"))
            })?;
            (source, script.to_string(), None)
        } else {
            let path = Path::new(script);
            if !self.fs.is_file(path) {
                return Err(LaunchError::EntryPoint(format!(
                    "training script `{script}` does not exist"
                )));
            }
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| LaunchError::EntryPoint(format!("`{script}` is not an importable file name")))?;
            let dir = match path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                _ => PathBuf::from("."),
            };
            (path.to_path_buf(), stem.to_string(), Some(dir))
        };

        let text = self.fs.read_to_string(&source).map_err(|e| {
            LaunchError::EntryPoint(format!("cannot read {}: {e:#}", source.display()))
        })?;
        if !defines_function(&text, function) {
            return Err(LaunchError::EntryPoint(format!(
                "Your training script should have a function named {function}, or you should pass a different value to `--main_training_function`."
            )));
        }

        debug!(module = %module_name, function, "entry point resolved");
        Ok(EntryPoint {
            module: module_name,
            search_path,
            function: function.to_string(),
        })
    }
}

/// Whether `source` has a top-level `def function(`.
pub fn defines_function(source: &str, function: &str) -> bool {
    let pattern = format!(r"(?m)^(?:async\s+)?def\s+{}\s*\(", regex::escape(function));
    Regex::new(&pattern).is_ok_and(|re| re.is_match(source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    fn resolver(fs: &MockFileSystem) -> FsEntryPointResolver {
        FsEntryPointResolver::new(Arc::new(fs.clone()), vec![PathBuf::from("src")])
    }

    #[test]
    fn finds_top_level_function_in_script() {
        let fs = MockFileSystem::new();
        fs.add_file("jobs/train.py", "import os\n\ndef main():\n    pass\n");

        let entry = resolver(&fs).resolve("jobs/train.py", false, "main").unwrap();
        assert_eq!(entry.module, "train");
        assert_eq!(entry.search_path, Some(PathBuf::from("jobs")));
    }

    #[test]
    fn nested_definition_does_not_count() {
        let fs = MockFileSystem::new();
        fs.add_file("train.py", "class T:\n    def main(self):\n        pass\n");

        let err = resolver(&fs).resolve("train.py", false, "main").unwrap_err();
        assert!(matches!(err, LaunchError::EntryPoint(_)));
    }

    #[test]
    fn dotted_module_resolves_to_package_init() {
        let fs = MockFileSystem::new();
        fs.add_file("src/pkg/trainer/__init__.py", "async def run():\n    pass\n");

        let entry = resolver(&fs).resolve("pkg.trainer", true, "run").unwrap();
        assert_eq!(entry.module, "pkg.trainer");
        assert_eq!(entry.search_path, None);
    }
}
