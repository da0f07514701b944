use crate::counter::Counter;
use crate::error::{UpdateError, UpdateStage};
use crate::lock::{self, DynLeaseLock, LockAcquisition, LockRequest};
use crate::storage::DynCounterStore;
use chrono::Utc;
use std::time::Duration;
use tokio::time::{Instant, timeout, timeout_at};

pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_millis(100);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// Lock-guarded read-increment-write of the counter record.
#[derive(Clone)]
pub struct IncrementCounterOperation {
    lock: DynLeaseLock,
    store: DynCounterStore,
}

#[derive(Debug, Clone)]
pub struct IncrementCounterOperationRequest {
    pub lease_duration: Duration,
    /// Upper bound for the whole update, lock wait included.
    pub request_timeout: Duration,
    pub retry_interval: Duration,
    pub renew_lease: bool,
}

impl Default for IncrementCounterOperationRequest {
    fn default() -> Self {
        Self {
            lease_duration: DEFAULT_LEASE_DURATION,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            renew_lease: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IncrementCounterOperationResult {
    pub previous: Counter,
    pub counter: Counter,
}

impl IncrementCounterOperation {
    pub fn new(lock: DynLeaseLock, store: DynCounterStore) -> Self {
        Self { lock, store }
    }

    pub async fn run(
        &self,
        request: IncrementCounterOperationRequest,
    ) -> Result<IncrementCounterOperationResult, UpdateError> {
        let deadline = Instant::now() + request.request_timeout;

        tracing::debug!("counter update: {}", UpdateStage::LockAcquiring);
        let mut lock_request = LockRequest::new(request.lease_duration, request.request_timeout)
            .with_retry_interval(request.retry_interval);
        if request.renew_lease {
            lock_request = lock_request.with_renewal();
        }

        let acquisition = timeout_at(deadline, lock::acquire(self.lock.clone(), lock_request))
            .await
            .map_err(|_| UpdateError::LockTimeout)??;

        let guard = match acquisition {
            LockAcquisition::Granted(guard) => guard,
            LockAcquisition::NotGranted => {
                tracing::debug!("lock {} was not granted", self.lock.name());
                return Err(UpdateError::LockTimeout);
            }
        };

        let outcome = self.update_locked(deadline).await;

        tracing::debug!("counter update: {}", UpdateStage::Releasing);
        let release_budget = deadline
            .saturating_duration_since(Instant::now())
            .max(request.lease_duration);
        match timeout(release_budget, guard.release()).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                tracing::warn!(
                    "failed to release lock {}; lease will expire: {}",
                    self.lock.name(),
                    error
                );
            }
            Err(_) => {
                tracing::warn!(
                    "release of lock {} timed out after {:?}; lease will expire",
                    self.lock.name(),
                    release_budget
                );
            }
        }

        outcome
    }

    /// Critical section. Only ever called while holding the lock.
    async fn update_locked(
        &self,
        deadline: Instant,
    ) -> Result<IncrementCounterOperationResult, UpdateError> {
        tracing::debug!("counter update: {}", UpdateStage::Reading);
        let previous = timeout_at(deadline, self.store.read())
            .await
            .map_err(|_| UpdateError::DeadlineExceeded {
                stage: UpdateStage::Reading,
            })?
            .map_err(UpdateError::StoreRead)?
            .into_counter_or_zero();

        tracing::debug!("counter update: {}", UpdateStage::Computing);
        let counter = previous.incremented(Utc::now());

        tracing::debug!("counter update: {}", UpdateStage::Writing);
        timeout_at(deadline, self.store.write(&counter))
            .await
            .map_err(|_| UpdateError::DeadlineExceeded {
                stage: UpdateStage::Writing,
            })?
            .map_err(UpdateError::StoreWrite)?;

        if let Some(last_access) = counter.last_access_time {
            tracing::info!(
                "now visit {} (last access {})",
                counter.visit_count,
                last_access.to_rfc3339()
            );
        }

        Ok(IncrementCounterOperationResult { previous, counter })
    }
}
