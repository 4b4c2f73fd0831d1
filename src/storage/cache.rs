//! Local copies of remote objects.
//!
//! A blob is downloaded into a staging file next to its final location and
//! only renamed into place once the download finished, so an interrupted
//! download never leaves a file that looks complete. Entries are write-once:
//! nothing here refreshes a blob that already exists.

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct BlobCache {
    dir: PathBuf,
}

impl BlobCache {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Location of `filename` inside the cache directory.
    ///
    /// Object names are relative keys; absolute paths and `..` parts would
    /// escape the cache and are rejected.
    pub fn path_for(&self, filename: &str) -> Result<PathBuf> {
        let mut path = self.dir.clone();
        let mut parts = 0usize;
        for component in Path::new(filename).components() {
            match component {
                Component::Normal(part) => {
                    path.push(part);
                    parts += 1;
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(Error::Usage(format!(
                        "Invalid remote object name '{}': must be a relative key",
                        filename
                    )))
                }
            }
        }
        if parts == 0 {
            return Err(Error::Usage(format!(
                "Invalid remote object name '{}'",
                filename
            )));
        }
        Ok(path)
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.path_for(filename).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Path of the cached copy of `filename`, calling `download` to create it
    /// when absent. `download` writes the full object and returns the byte
    /// count.
    pub fn fetch<F>(&self, filename: &str, download: F) -> Result<PathBuf>
    where
        F: FnOnce(&mut dyn Write) -> Result<u64>,
    {
        let path = self.path_for(filename)?;
        if path.is_file() {
            debug!(filename, "Blob cache hit");
            return Ok(path);
        }

        let parent = path.parent().unwrap_or(&self.dir);
        fs::create_dir_all(parent)?;

        // Dropped (and deleted) on any early return below.
        let mut staging = NamedTempFile::new_in(parent)?;
        let bytes = download(staging.as_file_mut())?;
        staging.as_file_mut().flush()?;
        staging.as_file().sync_all()?;
        staging.persist(&path).map_err(|e| Error::Io(e.error))?;

        info!(filename, bytes, path = %path.display(), "Cached remote blob");
        Ok(path)
    }
}
