use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{FileHandle, OpenMode};
use crate::error::{Error, Result};

/// Files under a directory on local disk.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Direct entries of the root directory, sorted by name.
    pub fn list_contents(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    pub fn open(&self, filename: &str, mode: OpenMode) -> Result<FileHandle> {
        let path = self.root.join(filename);
        debug!(path = %path.display(), ?mode, "Opening local file");
        let file = File::open(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
            _ => Error::Io(e),
        })?;
        Ok(FileHandle::new(filename, mode, file))
    }
}
