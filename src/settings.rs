//! Process settings read from the environment.
//!
//! Everything the storage layer and readers need is gathered once into a
//! [`Settings`] value and handed to a [`crate::storage::StorageContext`].

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};

pub const ENV_VAR: &str = "ENV";
pub const DATA_DIR_VAR: &str = "DATA_DIR";
pub const BUCKET_VAR: &str = "CLOUD_STORAGE_BUCKET";
pub const READ_CHUNK_SIZE_VAR: &str = "READ_CHUNK_SIZE";
pub const CACHE_DIR_VAR: &str = "CACHE_DIR";

pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_READ_CHUNK_SIZE: usize = 1_000;
const CACHE_SUBDIR: &str = "eligibility-overlay";

/// Deployment environment, which decides the storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl Environment {
    pub fn is_remote(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "test" | "unittest" => Ok(Environment::Test),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(Error::Configuration(format!(
                "Unable to resolve a storage backend, invalid value passed for '{}'. Value passed : {} .",
                ENV_VAR, s
            ))),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Environment::Development => "development",
            Environment::Test => "test",
            Environment::Production => "production",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub environment: Environment,
    /// Root directory of the local backend
    pub data_dir: PathBuf,
    /// Bucket of the remote backend
    pub bucket: String,
    /// Rows per batch when streaming columnar files
    pub read_chunk_size: usize,
    /// Where remote objects are materialized
    pub cache_dir: PathBuf,
}

impl Settings {
    /// Load settings from `.env` (when present) and the process environment.
    pub fn from_env() -> Result<Self> {
        // A missing .env file is normal outside development.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = match lookup(ENV_VAR) {
            Some(value) => value.parse()?,
            None => Environment::Development,
        };

        let read_chunk_size = match lookup(READ_CHUNK_SIZE_VAR) {
            Some(value) => parse_chunk_size(&value)?,
            None => DEFAULT_READ_CHUNK_SIZE,
        };

        Ok(Self {
            environment,
            data_dir: lookup(DATA_DIR_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            bucket: lookup(BUCKET_VAR).unwrap_or_default(),
            read_chunk_size,
            cache_dir: lookup(CACHE_DIR_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(default_cache_dir),
        })
    }

    /// Settings for a local backend rooted at `data_dir`.
    pub fn local(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            environment: Environment::Development,
            data_dir: data_dir.into(),
            bucket: String::new(),
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            cache_dir: default_cache_dir(),
        }
    }

    pub fn with_read_chunk_size(mut self, read_chunk_size: usize) -> Self {
        self.read_chunk_size = read_chunk_size;
        self
    }
}

fn parse_chunk_size(value: &str) -> Result<usize> {
    match value.trim().parse::<usize>() {
        Ok(size) if size > 0 => Ok(size),
        _ => Err(Error::Configuration(format!(
            "'{}' must be a positive integer. Value passed : {} .",
            READ_CHUNK_SIZE_VAR, value
        ))),
    }
}

fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join(CACHE_SUBDIR)
}
