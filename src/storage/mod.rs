//! Object storage seam used by the conversion worker.
//!
//! The worker only needs three operations: fetch one object into a local file,
//! push one local file, and create an empty marker object. `S3Store` talks to
//! AWS (or any S3-compatible endpoint); `LocalStore` mirrors the same layout on
//! a directory tree and backs development setups and the test suite.

pub mod local;
pub mod s3;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use crate::config::{ServiceConfig, StorageKind};

pub use local::LocalStore;
pub use s3::S3Store;

#[rocket::async_trait]
pub trait ObjectStore: Send + Sync {
    async fn download(&self, bucket: &str, key: &str, destination: &Path) -> Result<()>;

    async fn upload(&self, bucket: &str, key: &str, source: &Path) -> Result<()>;

    /// Writes a zero-byte object, used to make a "directory" prefix visible.
    async fn put_empty(&self, bucket: &str, key: &str) -> Result<()>;
}

pub async fn open_store(config: &ServiceConfig) -> Result<Arc<dyn ObjectStore>> {
    match config.storage {
        StorageKind::S3 => {
            let store = S3Store::connect(&config.s3_region, config.s3_endpoint.as_deref()).await;
            Ok(Arc::new(store))
        }
        StorageKind::Local => {
            let root = config
                .local_storage_root
                .clone()
                .context("MINERU_LOCAL_STORAGE_ROOT is required for local storage")?;
            Ok(Arc::new(LocalStore::new(root)?))
        }
    }
}
