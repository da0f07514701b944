//! Lease-based distributed lock.
//!
//! A [`LeaseLock`] backend grants a named reservation that expires on its own
//! after the lease duration. [`acquire`] layers a bounded wait on top and hands
//! out a [`LockGuard`] that releases the reservation on every exit path.

pub mod etcd;
pub mod factory;
pub mod memory;
pub mod redis;

use crate::error::LockError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub use etcd::EtcdLeaseLock;
pub use factory::{LockBuilder, LockDescriptor, LockScheme, redact_lock_url};
pub use memory::{MemoryLeaseLock, MemoryLockTable};
pub use redis::RedisLeaseLock;

pub type DynLeaseLock = Arc<dyn LeaseLock>;

/// A granted reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub lock_name: String,
    /// Random per-acquisition token; release and renew only act on a matching token.
    pub token: String,
    /// Backend handle for the lease (etcd lease id).
    pub backend_lease_id: Option<i64>,
    pub lease_duration: Duration,
}

#[async_trait]
pub trait LeaseLock: Send + Sync {
    fn name(&self) -> &str;

    /// Single attempt. `Ok(None)` means the lock is currently held elsewhere.
    async fn try_acquire(&self, lease_duration: Duration) -> Result<Option<Lease>, LockError>;

    /// Extend a held lease. `Ok(false)` means the lease was lost.
    async fn renew(&self, lease: &Lease) -> Result<bool, LockError>;

    async fn release(&self, lease: &Lease) -> Result<(), LockError>;
}

#[derive(Debug, Clone)]
pub struct LockRequest {
    pub lease_duration: Duration,
    pub wait_timeout: Duration,
    pub retry_interval: Duration,
    pub renew_interval: Option<Duration>,
}

impl LockRequest {
    pub fn new(lease_duration: Duration, wait_timeout: Duration) -> Self {
        Self {
            lease_duration,
            wait_timeout,
            retry_interval: Duration::from_millis(20),
            renew_interval: None,
        }
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Keep the lease alive in the background, renewing every third of its duration.
    /// Backends that grant a longer lease than requested renew less often.
    pub fn with_renewal(mut self) -> Self {
        self.renew_interval = Some(renewal_interval(self.lease_duration));
        self
    }
}

fn renewal_interval(lease_duration: Duration) -> Duration {
    (lease_duration / 3).max(Duration::from_millis(10))
}

pub enum LockAcquisition {
    Granted(LockGuard),
    NotGranted,
}

impl LockAcquisition {
    pub fn is_granted(&self) -> bool {
        matches!(self, LockAcquisition::Granted(_))
    }
}

/// Try to take the lock, polling until `wait_timeout` elapses.
///
/// Cancelling this future right after a backend grant leaves that reservation
/// without a guard; it is freed when its lease expires.
pub async fn acquire(lock: DynLeaseLock, request: LockRequest) -> Result<LockAcquisition, LockError> {
    let deadline = Instant::now() + request.wait_timeout;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        if let Some(lease) = lock.try_acquire(request.lease_duration).await? {
            tracing::debug!(
                "lock {} granted after {} attempt(s) token={}",
                lease.lock_name,
                attempts,
                lease.token
            );
            return Ok(LockAcquisition::Granted(LockGuard::new(
                lock,
                lease,
                request.renew_interval,
            )));
        }

        let now = Instant::now();
        if now >= deadline {
            tracing::debug!(
                "lock {} not granted within {:?} ({} attempts)",
                lock.name(),
                request.wait_timeout,
                attempts
            );
            return Ok(LockAcquisition::NotGranted);
        }

        let remaining = deadline - now;
        tokio::time::sleep(request.retry_interval.min(remaining)).await;
    }
}

/// Scoped ownership of a lease.
///
/// Call [`LockGuard::release`] on the normal path. A guard dropped without
/// release (panic, cancelled future) schedules the release on the runtime.
pub struct LockGuard {
    lock: DynLeaseLock,
    lease: Option<Lease>,
    heartbeat: Option<JoinHandle<()>>,
}

impl LockGuard {
    fn new(lock: DynLeaseLock, lease: Lease, renew_interval: Option<Duration>) -> Self {
        let heartbeat = renew_interval.map(|requested| {
            let interval = requested.max(renewal_interval(lease.lease_duration));
            spawn_heartbeat(lock.clone(), lease.clone(), interval)
        });
        Self {
            lock,
            lease: Some(lease),
            heartbeat,
        }
    }

    pub fn lease(&self) -> Option<&Lease> {
        self.lease.as_ref()
    }

    pub async fn release(mut self) -> Result<(), LockError> {
        self.stop_heartbeat();
        match self.lease.take() {
            Some(lease) => {
                self.lock.release(&lease).await?;
                tracing::debug!("lock {} released token={}", lease.lock_name, lease.token);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn stop_heartbeat(&mut self) {
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.stop_heartbeat();
        let Some(lease) = self.lease.take() else {
            return;
        };

        tracing::warn!(
            "lock {} dropped without release; releasing in background",
            lease.lock_name
        );
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let lock = self.lock.clone();
                handle.spawn(async move {
                    if let Err(error) = lock.release(&lease).await {
                        tracing::warn!(
                            "background release of lock {} failed: {}",
                            lease.lock_name,
                            error
                        );
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    "no runtime to release lock {}; lease will expire",
                    lease.lock_name
                );
            }
        }
    }
}

fn spawn_heartbeat(lock: DynLeaseLock, lease: Lease, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        loop {
            ticker.tick().await;
            match lock.renew(&lease).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!("lease on lock {} was lost", lease.lock_name);
                    return;
                }
                Err(error) => {
                    tracing::warn!("failed to renew lock {}: {}", lease.lock_name, error);
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn memory_lock(table: &MemoryLockTable) -> DynLeaseLock {
        Arc::new(MemoryLeaseLock::new("counter", table.clone()))
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let table = MemoryLockTable::new();
        let lock = memory_lock(&table);

        let request = LockRequest::new(Duration::from_secs(10), Duration::from_millis(100));
        let LockAcquisition::Granted(guard) = acquire(lock.clone(), request.clone()).await.unwrap()
        else {
            panic!("lock should be granted");
        };
        assert!(table.is_held("counter").await);

        guard.release().await.unwrap();
        assert!(!table.is_held("counter").await);

        let again = acquire(lock, request).await.unwrap();
        assert!(again.is_granted());
    }

    #[tokio::test]
    async fn test_wait_is_bounded_when_held() {
        let table = MemoryLockTable::new();
        let holder = memory_lock(&table);
        let _held = holder
            .try_acquire(Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();

        let started = std::time::Instant::now();
        let request = LockRequest::new(Duration::from_secs(1), Duration::from_millis(150))
            .with_retry_interval(Duration::from_millis(10));
        let outcome = acquire(memory_lock(&table), request).await.unwrap();

        assert!(!outcome.is_granted());
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_waiter_gets_lock_after_lease_expires() {
        let table = MemoryLockTable::new();
        let holder = memory_lock(&table);
        holder
            .try_acquire(Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();

        let request = LockRequest::new(Duration::from_secs(1), Duration::from_secs(2))
            .with_retry_interval(Duration::from_millis(10));
        let outcome = acquire(memory_lock(&table), request).await.unwrap();
        assert!(outcome.is_granted());
    }

    #[tokio::test]
    async fn test_dropped_guard_releases_in_background() {
        let table = MemoryLockTable::new();
        let lock = memory_lock(&table);
        let request = LockRequest::new(Duration::from_secs(30), Duration::from_millis(50));

        let guard = acquire(lock, request).await.unwrap();
        assert!(table.is_held("counter").await);
        drop(guard);

        for _ in 0..50 {
            if !table.is_held("counter").await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("dropped guard did not release the lock");
    }

    #[tokio::test]
    async fn test_heartbeat_keeps_lease_alive() {
        let table = MemoryLockTable::new();
        let request = LockRequest::new(Duration::from_millis(60), Duration::from_millis(50))
            .with_renewal();
        let LockAcquisition::Granted(guard) = acquire(memory_lock(&table), request).await.unwrap()
        else {
            panic!("lock should be granted");
        };

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(table.is_held("counter").await);

        guard.release().await.unwrap();
        assert!(!table.is_held("counter").await);
    }

    /// Grants a fixed 3s lease whatever was requested, and counts renewals.
    struct LongLeaseLock {
        renewals: AtomicUsize,
    }

    #[async_trait]
    impl LeaseLock for LongLeaseLock {
        fn name(&self) -> &str {
            "counter"
        }

        async fn try_acquire(&self, _lease_duration: Duration) -> Result<Option<Lease>, LockError> {
            Ok(Some(Lease {
                lock_name: "counter".to_string(),
                token: "long".to_string(),
                backend_lease_id: Some(7),
                lease_duration: Duration::from_secs(3),
            }))
        }

        async fn renew(&self, _lease: &Lease) -> Result<bool, LockError> {
            self.renewals.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }

        async fn release(&self, _lease: &Lease) -> Result<(), LockError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_heartbeat_follows_granted_lease() {
        let lock = Arc::new(LongLeaseLock {
            renewals: AtomicUsize::new(0),
        });
        let request = LockRequest::new(Duration::from_millis(30), Duration::from_millis(50))
            .with_renewal();
        let LockAcquisition::Granted(guard) = acquire(lock.clone(), request).await.unwrap() else {
            panic!("lock should be granted");
        };

        // Requested 30ms would tick every 10ms; the granted 3s lease ticks every 1s.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(lock.renewals.load(Ordering::SeqCst), 0);

        guard.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_unavailable_backend_fails_acquire() {
        let table = MemoryLockTable::new();
        table.set_unavailable(true);

        let request = LockRequest::new(Duration::from_secs(1), Duration::from_millis(50));
        let result = acquire(memory_lock(&table), request).await;
        assert!(matches!(result, Err(LockError::Unavailable(_))));
    }
}
