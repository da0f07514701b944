use super::{DynCounterStore, ObjectCounterStore};
use crate::error::StoreError;
use object_store::ObjectStore;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    S3,
    Local,
    Memory,
}

#[derive(Debug, Clone, Default)]
pub struct StoreBuilder {
    backend: StoreBackend,
    bucket: Option<String>,
    region: Option<String>,
    object_path: Option<String>,
}

impl StoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(mut self, backend: StoreBackend) -> Self {
        self.backend = backend;
        self
    }

    /// S3 bucket, or root directory for the local backend.
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn object_path(mut self, object_path: impl Into<String>) -> Self {
        self.object_path = Some(object_path.into());
        self
    }

    fn resolve_object_path(&self) -> Result<Path, StoreError> {
        let raw = self.object_path.as_deref().unwrap_or_default().trim();
        if raw.is_empty() {
            return Err(StoreError::Config(
                "store object path cannot be empty".to_string(),
            ));
        }

        Path::parse(raw.trim_start_matches('/')).map_err(|error| {
            StoreError::Config(format!("invalid object path '{}': {}", raw, error))
        })
    }

    fn resolve_bucket(&self) -> Result<String, StoreError> {
        let bucket = self.bucket.as_deref().unwrap_or_default().trim();
        if bucket.is_empty() {
            return Err(StoreError::Config(format!(
                "store bucket is required for {:?} backend",
                self.backend
            )));
        }
        Ok(bucket.to_string())
    }

    pub fn build(&self) -> Result<DynCounterStore, StoreError> {
        let key = self.resolve_object_path()?;

        let object_store: Arc<dyn ObjectStore> = match self.backend {
            StoreBackend::S3 => {
                let bucket = self.resolve_bucket()?;
                let mut builder = AmazonS3Builder::from_env().with_bucket_name(&bucket);
                if let Some(region) = self
                    .region
                    .as_deref()
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                {
                    builder = builder.with_region(region);
                }
                let s3 = builder.build().map_err(|error| {
                    StoreError::Config(format!("failed to build s3 client: {}", error))
                })?;
                Arc::new(s3)
            }
            StoreBackend::Local => {
                let root = self.resolve_bucket()?;
                std::fs::create_dir_all(&root).map_err(|error| {
                    StoreError::Config(format!("failed to create {}: {}", root, error))
                })?;
                let local = LocalFileSystem::new_with_prefix(&root).map_err(|error| {
                    StoreError::Config(format!("invalid local store root {}: {}", root, error))
                })?;
                Arc::new(local)
            }
            StoreBackend::Memory => Arc::new(InMemory::new()),
        };

        tracing::info!("counter store {:?} key={}", self.backend, key);
        Ok(Arc::new(ObjectCounterStore::new(object_store, key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::{Counter, CounterLookup};

    #[test]
    fn test_object_path_required() {
        let result = StoreBuilder::new().backend(StoreBackend::Memory).build();
        assert!(matches!(result, Err(StoreError::Config(_))));
    }

    #[test]
    fn test_bucket_required_for_s3() {
        let result = StoreBuilder::new()
            .backend(StoreBackend::S3)
            .object_path("visits.json")
            .build();
        assert!(matches!(result, Err(StoreError::Config(_))));
    }

    #[test]
    fn test_backend_names() {
        let backend: StoreBackend = serde_json::from_str("\"local\"").unwrap();
        assert_eq!(backend, StoreBackend::Local);
        assert_eq!(StoreBackend::default(), StoreBackend::S3);
    }

    #[tokio::test]
    async fn test_local_backend_creates_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("data");
        let store = StoreBuilder::new()
            .backend(StoreBackend::Local)
            .bucket(root.to_string_lossy())
            .object_path("/counters/visits.json")
            .build()
            .unwrap();

        assert_eq!(store.read().await.unwrap(), CounterLookup::NotFound);
        store
            .write(&Counter {
                visit_count: 2,
                last_access_time: None,
            })
            .await
            .unwrap();
        assert!(root.join("counters").join("visits.json").exists());
    }
}
