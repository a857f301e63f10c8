use anyhow::{Context, Result, bail};
use std::path::{Component, Path, PathBuf};

use super::ObjectStore;

/// Directory-backed store: object `{bucket}/{key}` lives at `{root}/{bucket}/{key}`.
///
/// Keys ending in `/` are markers and become empty directories.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .context(format!("Failed to create storage root {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem location of an object; rejects keys that escape the bucket.
    pub fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let mut path = self.root.clone();
        for part in [bucket, key] {
            let relative = Path::new(part);
            if relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
            {
                bail!("Refusing object path outside the store: {}/{}", bucket, key);
            }
            path.push(relative);
        }
        Ok(path)
    }
}

#[rocket::async_trait]
impl ObjectStore for LocalStore {
    async fn download(&self, bucket: &str, key: &str, destination: &Path) -> Result<()> {
        let source = self.object_path(bucket, key)?;
        tokio::fs::copy(&source, destination)
            .await
            .context(format!("Failed to fetch {}/{}", bucket, key))?;
        Ok(())
    }

    async fn upload(&self, bucket: &str, key: &str, source: &Path) -> Result<()> {
        let target = self.object_path(bucket, key)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(source, &target)
            .await
            .context(format!("Failed to store {}/{}", bucket, key))?;
        Ok(())
    }

    async fn put_empty(&self, bucket: &str, key: &str) -> Result<()> {
        let target = self.object_path(bucket, key)?;
        if key.ends_with('/') {
            tokio::fs::create_dir_all(&target).await?;
        } else {
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&target, b"").await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_then_download_through_bucket_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().join("store")).unwrap();
        let source = dir.path().join("input.md");
        std::fs::write(&source, "# title").unwrap();

        store.upload("docs", "output/a/input.md", &source).await.unwrap();
        assert!(dir.path().join("store/docs/output/a/input.md").is_file());

        let copy = dir.path().join("copy.md");
        store.download("docs", "output/a/input.md", &copy).await.unwrap();
        assert_eq!(std::fs::read_to_string(copy).unwrap(), "# title");
    }

    #[tokio::test]
    async fn marker_keys_become_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        store.put_empty("docs", "output/a/images/").await.unwrap();
        assert!(dir.path().join("docs/output/a/images").is_dir());
    }

    #[test]
    fn traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        assert!(store.object_path("docs", "../other/secret").is_err());
        assert!(store.object_path("..", "key").is_err());
        assert!(store.object_path("docs", "/etc/passwd").is_err());
    }

    #[tokio::test]
    async fn missing_object_fails_download() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        let result = store
            .download("docs", "nope.pdf", &dir.path().join("x.pdf"))
            .await;
        assert!(result.is_err());
    }
}
