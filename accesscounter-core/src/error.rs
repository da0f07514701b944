use std::fmt;
use thiserror::Error;

/// Failures talking to the coordination backend.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock service unavailable: {0}")]
    Unavailable(String),

    #[error("lock configuration error: {0}")]
    Config(String),
}

/// Failures of the counter store other than "key absent".
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unexpected store error: {0}")]
    Unexpected(String),

    #[error("failed to serialize counter: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("store configuration error: {0}")]
    Config(String),
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("invalid font data: {0}")]
    InvalidFont(String),
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("gif encoding failed: {0}")]
    Gif(#[from] gif::EncodingError),
}

/// Stage of the counter update in which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStage {
    LockAcquiring,
    Reading,
    Computing,
    Writing,
    Releasing,
}

impl fmt::Display for UpdateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpdateStage::LockAcquiring => "lock_acquiring",
            UpdateStage::Reading => "reading",
            UpdateStage::Computing => "computing",
            UpdateStage::Writing => "writing",
            UpdateStage::Releasing => "releasing",
        };
        f.write_str(name)
    }
}

/// Terminal failure of a counter update.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("lock was not granted before the deadline")]
    LockTimeout,

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("failed to read counter: {0}")]
    StoreRead(#[source] StoreError),

    #[error("failed to write counter: {0}")]
    StoreWrite(#[source] StoreError),

    #[error("request deadline exceeded while {stage}")]
    DeadlineExceeded { stage: UpdateStage },
}

impl UpdateError {
    /// True for failures a caller should retry later (gateway-timeout class).
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            UpdateError::LockTimeout
                | UpdateError::DeadlineExceeded { .. }
                | UpdateError::Lock(LockError::Unavailable(_))
        )
    }
}

/// Umbrella error used while wiring the service together at startup.
#[derive(Debug, Error)]
pub enum CounterError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Update(#[from] UpdateError),
}

pub type Result<T> = std::result::Result<T, CounterError>;
