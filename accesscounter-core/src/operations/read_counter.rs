use crate::counter::{Counter, CounterLookup};
use crate::error::StoreError;
use crate::storage::DynCounterStore;

/// Lock-free read of the last committed counter. May lag a concurrent writer.
#[derive(Clone)]
pub struct ReadCounterOperation {
    store: DynCounterStore,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadCounterOperationOutcome {
    Found(Counter),
    NotFound,
}

impl ReadCounterOperationOutcome {
    pub fn counter(&self) -> Counter {
        match self {
            ReadCounterOperationOutcome::Found(counter) => counter.clone(),
            ReadCounterOperationOutcome::NotFound => Counter::zero(),
        }
    }
}

impl ReadCounterOperation {
    pub fn new(store: DynCounterStore) -> Self {
        Self { store }
    }

    pub async fn run(&self) -> Result<ReadCounterOperationOutcome, StoreError> {
        match self.store.read().await? {
            CounterLookup::Found(counter) => Ok(ReadCounterOperationOutcome::Found(counter)),
            CounterLookup::NotFound => Ok(ReadCounterOperationOutcome::NotFound),
        }
    }
}
