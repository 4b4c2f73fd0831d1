//! Storage backends.
//!
//! A [`StorageContext`] is created once per process from [`Settings`] and
//! resolves to exactly one [`StorageBackend`]: local disk in development and
//! test, a remote bucket fronted by a [`BlobCache`] in production. Every reader
//! obtains its backend through the context.

pub mod cache;
pub mod local;
pub mod remote;

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};

use once_cell::sync::OnceCell;
use tracing::info;

use crate::error::Result;
use crate::settings::Settings;

pub use cache::BlobCache;
pub use local::LocalStorage;
pub use remote::{BlobClient, ObjectStoreClient, RemoteStorage};

/// How the caller intends to decode the bytes of a file.
///
/// A tag carried by the handle for the caller and for logging. Both modes
/// yield the file's raw bytes; decoding is the reader's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Text,
    Binary,
}

/// A readable file bound to one logical filename.
///
/// The underlying descriptor is closed when the handle is dropped, on every
/// exit path of the caller.
#[derive(Debug)]
pub struct FileHandle {
    filename: String,
    mode: OpenMode,
    reader: BufReader<File>,
}

impl FileHandle {
    pub(crate) fn new(filename: &str, mode: OpenMode, file: File) -> Self {
        Self {
            filename: filename.to_string(),
            mode,
            reader: BufReader::new(file),
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Give up buffering and take the raw file, e.g. for random access.
    pub fn into_file(self) -> File {
        self.reader.into_inner()
    }
}

impl Read for FileHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl BufRead for FileHandle {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.reader.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.reader.consume(amt)
    }
}

/// Where datasets live.
pub enum StorageBackend {
    Local(LocalStorage),
    Remote(RemoteStorage),
}

impl StorageBackend {
    /// Build the backend the environment asks for.
    ///
    /// Constructing the remote variant creates the object-store client up
    /// front, so credential or bucket problems surface here.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let backend = if settings.environment.is_remote() {
            StorageBackend::Remote(RemoteStorage::connect(
                &settings.bucket,
                &settings.cache_dir,
            )?)
        } else {
            StorageBackend::Local(LocalStorage::new(&settings.data_dir))
        };
        info!(
            environment = %settings.environment,
            backend = backend.kind(),
            "Resolved storage backend"
        );
        Ok(backend)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StorageBackend::Local(_) => "local",
            StorageBackend::Remote(_) => "remote",
        }
    }

    /// Names of everything under the backend root.
    pub fn list_contents(&self) -> Result<Vec<String>> {
        match self {
            StorageBackend::Local(local) => local.list_contents(),
            StorageBackend::Remote(remote) => remote.list_contents(),
        }
    }

    pub fn open(&self, filename: &str, mode: OpenMode) -> Result<FileHandle> {
        match self {
            StorageBackend::Local(local) => local.open(filename, mode),
            StorageBackend::Remote(remote) => remote.open(filename, mode),
        }
    }
}

/// Settings plus the backend they resolve to, resolved at most once.
pub struct StorageContext {
    settings: Settings,
    backend: OnceCell<StorageBackend>,
}

impl StorageContext {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            backend: OnceCell::new(),
        }
    }

    /// Context whose backend is already decided.
    pub fn with_backend(settings: Settings, backend: StorageBackend) -> Self {
        Self {
            settings,
            backend: OnceCell::with_value(backend),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The backend for this context. The first successful call decides it;
    /// later calls return the same instance without re-reading settings.
    pub fn resolve(&self) -> Result<&StorageBackend> {
        self.backend
            .get_or_try_init(|| StorageBackend::from_settings(&self.settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::settings::Environment;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_resolve_is_idempotent() {
        let dir = tempdir().unwrap();
        let context = StorageContext::new(Settings::local(dir.path()));

        let first = context.resolve().unwrap() as *const StorageBackend;
        let second = context.resolve().unwrap() as *const StorageBackend;
        assert_eq!(first, second);
        assert_eq!(context.resolve().unwrap().kind(), "local");
    }

    #[test]
    fn test_test_environment_resolves_local() {
        let dir = tempdir().unwrap();
        let mut settings = Settings::local(dir.path());
        settings.environment = Environment::Test;
        let context = StorageContext::new(settings);
        assert_eq!(context.resolve().unwrap().kind(), "local");
    }

    #[test]
    fn test_production_without_bucket_fails_at_resolution() {
        let mut settings = Settings::local("unused");
        settings.environment = Environment::Production;
        let context = StorageContext::new(settings);

        assert!(matches!(context.resolve(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_file_handle_reads_and_reports_mode() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        let backend = StorageBackend::Local(LocalStorage::new(dir.path()));

        let mut handle = backend.open("notes.txt", OpenMode::Text).unwrap();
        assert_eq!(handle.filename(), "notes.txt");
        assert_eq!(handle.mode(), OpenMode::Text);

        let mut contents = String::new();
        handle.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "hello");
    }

    #[test]
    fn test_open_modes_yield_same_bytes() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("mixed.bin"), b"a|b\r\n\xff\x00").unwrap();
        let backend = StorageBackend::Local(LocalStorage::new(dir.path()));

        let mut text = Vec::new();
        let mut binary = Vec::new();
        backend.open("mixed.bin", OpenMode::Text).unwrap().read_to_end(&mut text).unwrap();
        backend.open("mixed.bin", OpenMode::Binary).unwrap().read_to_end(&mut binary).unwrap();

        assert_eq!(text, b"a|b\r\n\xff\x00");
        assert_eq!(text, binary);
    }
}
