//! AccessCounter Core - a visit counter kept in object storage
//!
//! Increments are serialized across server instances with a lease lock:
//! - lease lock backends: redis, etcd, in-process
//! - one JSON record under a single object key
//! - bounded lock wait and one deadline per update
//! - counter image rendering

pub mod counter;
pub mod error;
pub mod lock;
pub mod operations;
pub mod render;
pub mod storage;

pub use counter::{Counter, CounterLookup};
pub use error::{
    CounterError, EncodeError, LockError, RenderError, Result, StoreError, UpdateError,
    UpdateStage,
};
pub use lock::{
    DynLeaseLock, Lease, LeaseLock, LockAcquisition, LockBuilder, LockGuard, LockRequest,
    MemoryLockTable, acquire, redact_lock_url,
};
pub use operations::{
    IncrementCounterOperation, IncrementCounterOperationRequest, IncrementCounterOperationResult,
    ReadCounterOperation, ReadCounterOperationOutcome,
};
pub use render::{Bitmap, COUNTER_FONT, CounterRenderer, encode_gif};
pub use storage::{CounterStore, DynCounterStore, ObjectCounterStore, StoreBackend, StoreBuilder};
