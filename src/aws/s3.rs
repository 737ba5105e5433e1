//! Artifact blob access through `object_store`.
//!
//! CodePipeline artifacts live in per-pipeline S3 buckets. One store is
//! built per bucket on first use and reused afterwards. Credentials come from
//! the standard AWS environment (`AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`,
//! `AWS_SESSION_TOKEN`) or instance metadata.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use object_store::{path::Path, ObjectStore};

use crate::gate::BlobStore;
use crate::models::job::S3Location;

pub struct ObjectStoreBlobs {
    stores: DashMap<String, Arc<dyn ObjectStore>>,
    region: String,
    endpoint: Option<String>,
}

impl ObjectStoreBlobs {
    pub fn new(region: impl Into<String>, endpoint: Option<String>) -> Self {
        Self {
            stores: DashMap::new(),
            region: region.into(),
            endpoint,
        }
    }

    /// Serve `bucket` from an already-built store instead of S3.
    pub fn with_store(self, bucket: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        self.stores.insert(bucket.into(), store);
        self
    }

    fn store_for(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        if let Some(store) = self.stores.get(bucket) {
            return Ok(store.clone());
        }

        let mut builder = object_store::aws::AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_region(&self.region);
        if let Some(ep) = &self.endpoint {
            builder = builder.with_endpoint(ep).with_allow_http(true);
        }

        let store: Arc<dyn ObjectStore> =
            Arc::new(builder.build().context("failed to build S3 object store")?);
        tracing::debug!(bucket, "built S3 object store");
        self.stores.insert(bucket.to_string(), store.clone());
        Ok(store)
    }
}

#[async_trait]
impl BlobStore for ObjectStoreBlobs {
    async fn fetch(&self, location: &S3Location) -> Result<Bytes> {
        let store = self.store_for(&location.bucket_name)?;
        let path = Path::from(location.object_key.as_str());

        store
            .get(&path)
            .await
            .with_context(|| format!("failed to get {} from object store", location))?
            .bytes()
            .await
            .with_context(|| format!("failed to read bytes of {}", location))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    #[tokio::test]
    async fn test_fetch_from_seeded_store() {
        let store = Arc::new(InMemory::new());
        store
            .put(&Path::from("image-test/Build/abc.zip"), Bytes::from_static(b"PK").into())
            .await
            .unwrap();

        let blobs = ObjectStoreBlobs::new("us-east-1", None).with_store("artifacts", store);
        let location = S3Location {
            bucket_name: "artifacts".into(),
            object_key: "image-test/Build/abc.zip".into(),
        };

        assert_eq!(blobs.fetch(&location).await.unwrap(), Bytes::from_static(b"PK"));
    }

    #[tokio::test]
    async fn test_missing_object_is_an_error() {
        let blobs = ObjectStoreBlobs::new("us-east-1", None)
            .with_store("artifacts", Arc::new(InMemory::new()));
        let location = S3Location {
            bucket_name: "artifacts".into(),
            object_key: "missing.zip".into(),
        };

        let err = blobs.fetch(&location).await.unwrap_err();
        assert!(err.to_string().contains("s3://artifacts/missing.zip"));
    }
}
