//! Managed temporary directory for tests.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// A temporary directory removed on drop.
pub struct TestDir {
    dir: TempDir,
}

impl TestDir {
    /// Creates a fresh temporary directory.
    pub fn new() -> Self {
        Self { dir: tempfile::tempdir().expect("create temp dir") }
    }

    /// The directory path.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// A path inside the directory.
    pub fn join(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.dir.path().join(rel)
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}
