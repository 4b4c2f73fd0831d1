//! Remote bucket backend.
//!
//! Objects are listed and downloaded through a [`BlobClient`]. The production
//! client wraps an `object_store` store driven by a current-thread tokio
//! runtime, so callers of this module stay fully blocking.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use futures::TryStreamExt;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info};

use super::{BlobCache, FileHandle, OpenMode};
use crate::error::{Error, Result};

/// Minimal object-store surface the backend needs.
pub trait BlobClient: Send + Sync {
    /// Names of every object in the bucket.
    fn list(&self) -> Result<Vec<String>>;

    /// Stream the whole object into `dest`, returning the bytes written.
    fn download(&self, name: &str, dest: &mut dyn Write) -> Result<u64>;
}

pub struct ObjectStoreClient {
    store: Arc<dyn ObjectStore>,
    runtime: Runtime,
}

impl ObjectStoreClient {
    pub fn new(store: Arc<dyn ObjectStore>) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self { store, runtime })
    }

    /// Google Cloud Storage client for `bucket`, with credentials taken from
    /// the usual `GOOGLE_*` environment variables.
    pub fn connect_gcs(bucket: &str) -> Result<Self> {
        let store = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(bucket)
            .build()
            .map_err(|e| {
                Error::Configuration(format!(
                    "Unable to create storage client for bucket '{}': {}",
                    bucket, e
                ))
            })?;
        Self::new(Arc::new(store))
    }
}

fn store_error(name: &str, err: object_store::Error) -> Error {
    match err {
        object_store::Error::NotFound { .. } => Error::NotFound(name.to_string()),
        other => Error::Remote(other.to_string()),
    }
}

impl BlobClient for ObjectStoreClient {
    fn list(&self) -> Result<Vec<String>> {
        self.runtime.block_on(async {
            self.store
                .list(None)
                .map_ok(|meta| meta.location.to_string())
                .try_collect::<Vec<_>>()
                .await
                .map_err(|e| Error::Remote(e.to_string()))
        })
    }

    fn download(&self, name: &str, dest: &mut dyn Write) -> Result<u64> {
        let location = ObjectPath::from(name);
        self.runtime.block_on(async {
            let result = self
                .store
                .get(&location)
                .await
                .map_err(|e| store_error(name, e))?;

            let mut stream = result.into_stream();
            let mut written = 0u64;
            while let Some(chunk) = stream.try_next().await.map_err(|e| store_error(name, e))? {
                dest.write_all(&chunk)?;
                written += chunk.len() as u64;
            }
            Ok::<u64, Error>(written)
        })
    }
}

/// Objects in a bucket, opened through local cached copies.
pub struct RemoteStorage {
    bucket: String,
    client: Box<dyn BlobClient>,
    cache: BlobCache,
}

impl RemoteStorage {
    pub fn new(bucket: &str, client: Box<dyn BlobClient>, cache: BlobCache) -> Self {
        Self {
            bucket: bucket.to_string(),
            client,
            cache,
        }
    }

    /// Create the GCS client for `bucket` eagerly and a cache under
    /// `cache_dir`.
    pub fn connect(bucket: &str, cache_dir: &Path) -> Result<Self> {
        if bucket.trim().is_empty() {
            return Err(Error::Configuration(
                "A storage bucket must be configured for the production environment".to_string(),
            ));
        }
        let client = ObjectStoreClient::connect_gcs(bucket)?;
        let cache = BlobCache::new(cache_dir)?;
        info!(bucket, cache_dir = %cache.dir().display(), "Connected to remote storage");
        Ok(Self::new(bucket, Box::new(client), cache))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn cache(&self) -> &BlobCache {
        &self.cache
    }

    pub fn list_contents(&self) -> Result<Vec<String>> {
        self.client.list()
    }

    /// Download `filename` on first use, then open the cached copy.
    pub fn open(&self, filename: &str, mode: OpenMode) -> Result<FileHandle> {
        let path = self.cache.fetch(filename, |dest| {
            debug!(bucket = %self.bucket, filename, "Downloading remote object");
            self.client.download(filename, dest)
        })?;
        let file = File::open(&path)?;
        Ok(FileHandle::new(filename, mode, file))
    }
}
