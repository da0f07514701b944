pub mod increment_counter;
pub mod read_counter;

pub use increment_counter::{
    IncrementCounterOperation, IncrementCounterOperationRequest, IncrementCounterOperationResult,
};
pub use read_counter::{ReadCounterOperation, ReadCounterOperationOutcome};
