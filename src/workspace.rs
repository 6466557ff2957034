//! Exclusive per-run scratch directories for repository ingestion.
//!
//! Every run gets a fresh, uniquely named directory under the configured
//! root. The directory is deleted when the [`Workspace`] is released or
//! dropped, which covers early returns, panics and cancelled futures.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;

#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create an empty directory named `clone-XXXXXX` under `root`,
    /// creating `root` first if needed.
    pub fn acquire(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)
            .with_context(|| format!("Failed to create workspace root {}", root.display()))?;
        let dir = tempfile::Builder::new()
            .prefix("clone-")
            .tempdir_in(root)
            .with_context(|| format!("Failed to create workspace under {}", root.display()))?;
        tracing::debug!(path = %dir.path().display(), "workspace acquired");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Delete the directory, reporting failure instead of ignoring it.
    pub fn release(self) -> Result<()> {
        let path: PathBuf = self.dir.path().to_path_buf();
        self.dir
            .close()
            .with_context(|| format!("Failed to remove workspace {}", path.display()))?;
        tracing::debug!(path = %path.display(), "workspace released");
        Ok(())
    }
}
