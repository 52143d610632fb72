//! File system utils.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::Context;
use fs2::FileExt;

pub struct FsHandler;

impl FsHandler {
    /// Create a directory (and its parents) if it doesn't exist.
    pub fn create_dir(path: &Path) -> anyhow::Result<()> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory {}", path.display()))?;
        tracing::debug!("Created directory: {}", path.display());
        Ok(())
    }

    /// Replace `path` with `content` so that readers observe either the old or the new file.
    ///
    /// The content is written to a temporary sibling, flushed to disk, then renamed over the
    /// destination.
    pub fn write_atomic(path: &Path, content: &[u8]) -> anyhow::Result<()> {
        let parent = path
            .parent()
            .context("File path must have a parent directory")?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .context("File path must end with a file name")?;
        let tmp_path = parent.join(format!(".{file_name}.tmp"));

        {
            let mut file = File::create(&tmp_path)
                .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
            file.write_all(content)
                .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
            file.sync_all()
                .with_context(|| format!("Failed to flush {}", tmp_path.display()))?;
        }

        std::fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "Failed to move {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        // Persist the rename itself. Not supported on every platform.
        #[cfg(unix)]
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }

        Ok(())
    }

    /// Take an exclusive advisory lock on `path`, failing immediately if it is held.
    pub fn try_lock(path: &Path) -> anyhow::Result<FileLock> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open lock file {}", path.display()))?;

        file.try_lock_exclusive().with_context(|| {
            format!(
                "{} is locked: another run is using this deployment",
                path.display()
            )
        })?;

        Ok(FileLock {
            file,
            path: path.to_path_buf(),
        })
    }
}

/// An advisory lock released on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %err, "Failed to release lock");
        }
    }
}
