use super::CounterStore;
use crate::counter::{Counter, CounterLookup};
use crate::error::StoreError;
use async_trait::async_trait;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use std::sync::Arc;

/// Counter record kept as one JSON object under a single key.
pub struct ObjectCounterStore {
    store: Arc<dyn ObjectStore>,
    key: Path,
}

impl ObjectCounterStore {
    pub fn new(store: Arc<dyn ObjectStore>, key: Path) -> Self {
        Self { store, key }
    }

    pub fn key(&self) -> &Path {
        &self.key
    }
}

#[async_trait]
impl CounterStore for ObjectCounterStore {
    async fn read(&self) -> Result<CounterLookup, StoreError> {
        let result = match self.store.get(&self.key).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                tracing::debug!("counter object {} not found", self.key);
                return Ok(CounterLookup::NotFound);
            }
            Err(error) => {
                return Err(StoreError::Unexpected(format!(
                    "get {}: {}",
                    self.key, error
                )));
            }
        };

        let payload = result.bytes().await.map_err(|error| {
            StoreError::Unexpected(format!("read body of {}: {}", self.key, error))
        })?;

        let counter = Counter::from_json_bytes(&payload).map_err(|error| {
            StoreError::Unexpected(format!("decode {}: {}", self.key, error))
        })?;

        Ok(CounterLookup::Found(counter))
    }

    async fn write(&self, counter: &Counter) -> Result<(), StoreError> {
        let payload = counter.to_json_bytes().map_err(StoreError::Serialize)?;

        self.store
            .put(&self.key, PutPayload::from(payload))
            .await
            .map_err(|error| StoreError::Unexpected(format!("put {}: {}", self.key, error)))?;

        Ok(())
    }
}
