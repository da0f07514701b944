//! Storage for the counter record
//!
//! Provides the counter store seam and its object-store backed implementation.

pub mod factory;
pub mod object_counter_store;

use crate::counter::{Counter, CounterLookup};
use crate::error::StoreError;
use async_trait::async_trait;
use std::sync::Arc;

pub use factory::{StoreBackend, StoreBuilder};
pub use object_counter_store::ObjectCounterStore;

pub type DynCounterStore = Arc<dyn CounterStore>;

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Fetch the record. A missing key is `CounterLookup::NotFound`, never an error.
    async fn read(&self) -> Result<CounterLookup, StoreError>;

    /// Overwrite the whole record.
    async fn write(&self, counter: &Counter) -> Result<(), StoreError>;
}
