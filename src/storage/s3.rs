use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream;
use log::info;
use std::path::Path;
use tokio::io::AsyncWriteExt;

use super::ObjectStore;

pub struct S3Store {
    client: Client,
}

impl S3Store {
    /// Builds a client from the default credential chain.
    ///
    /// A custom endpoint switches to path-style addressing so MinIO-like
    /// services work without wildcard DNS.
    pub async fn connect(region: &str, endpoint: Option<&str>) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = endpoint {
            info!("Using custom S3 endpoint: {}", endpoint);
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
        }
    }
}

#[rocket::async_trait]
impl ObjectStore for S3Store {
    async fn download(&self, bucket: &str, key: &str, destination: &Path) -> Result<()> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .context(format!("Failed to fetch s3://{}/{}", bucket, key))?;

        let mut reader = output.body.into_async_read();
        let mut file = tokio::fs::File::create(destination)
            .await
            .context(format!("Failed to create {}", destination.display()))?;
        tokio::io::copy(&mut reader, &mut file)
            .await
            .context(format!("Failed to stream s3://{}/{} to disk", bucket, key))?;
        file.flush().await?;
        Ok(())
    }

    async fn upload(&self, bucket: &str, key: &str, source: &Path) -> Result<()> {
        let body = ByteStream::from_path(source)
            .await
            .context(format!("Failed to open {} for upload", source.display()))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .context(format!("Failed to upload s3://{}/{}", bucket, key))?;
        Ok(())
    }

    async fn put_empty(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from_static(b""))
            .send()
            .await
            .context(format!("Failed to create marker s3://{}/{}", bucket, key))?;
        Ok(())
    }
}
