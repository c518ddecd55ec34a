// src/fs/mod.rs

use std::fmt::Debug;
use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

pub mod mock;

/// Filesystem access needed while planning a launch.
///
/// The plan builder reads side files (managed-cloud inputs and metrics) and
/// appends the auxiliary env file; the entry-point resolver reads training
/// scripts. Tests swap in [`mock::MockFileSystem`].
pub trait FileSystem: Send + Sync + Debug {
    fn read_to_string(&self, path: &Path) -> Result<String>;
    /// Append to `path`, creating it when missing.
    fn append(&self, path: &Path, contents: &[u8]) -> Result<()>;
    fn is_file(&self, path: &Path) -> bool;
}

/// Implementation that uses `std::fs`.
#[derive(Debug, Clone, Default)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).with_context(|| format!("reading file {:?}", path))
    }

    fn append(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening {:?} for append", path))?;
        file.write_all(contents).with_context(|| format!("appending to file {:?}", path))?;
        Ok(())
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }
}

/// Reads through to `inner`; appends are logged and dropped. Used by
/// `--dry_run` so planning has no side effects.
#[derive(Debug)]
pub struct ReadOnlyFileSystem<F> {
    inner: F,
}

impl<F: FileSystem> ReadOnlyFileSystem<F> {
    pub fn new(inner: F) -> Self {
        Self { inner }
    }
}

impl<F: FileSystem> FileSystem for ReadOnlyFileSystem<F> {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        self.inner.read_to_string(path)
    }

    fn append(&self, path: &Path, contents: &[u8]) -> Result<()> {
        info!(path = %path.display(), bytes = contents.len(), "dry run: skipping append");
        Ok(())
    }

    fn is_file(&self, path: &Path) -> bool {
        self.inner.is_file(path)
    }
}
