use super::{Lease, LeaseLock};
use crate::error::LockError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use ulid::Ulid;

#[derive(Debug, Clone)]
struct Reservation {
    token: String,
    expires_at: Instant,
    lease_duration: Duration,
}

/// Process-local reservation table shared by every [`MemoryLeaseLock`] cloned
/// from it. Stands in for the coordination service in development and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryLockTable {
    reservations: Arc<Mutex<HashMap<String, Reservation>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the service were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn is_held(&self, name: &str) -> bool {
        let reservations = self.reservations.lock().await;
        reservations
            .get(name)
            .map(|reservation| reservation.expires_at > Instant::now())
            .unwrap_or(false)
    }

    fn check_available(&self) -> Result<(), LockError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LockError::Unavailable(
                "memory lock table marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct MemoryLeaseLock {
    name: String,
    table: MemoryLockTable,
}

impl MemoryLeaseLock {
    pub fn new(name: impl Into<String>, table: MemoryLockTable) -> Self {
        Self {
            name: name.into(),
            table,
        }
    }
}

#[async_trait]
impl LeaseLock for MemoryLeaseLock {
    fn name(&self) -> &str {
        &self.name
    }

    async fn try_acquire(&self, lease_duration: Duration) -> Result<Option<Lease>, LockError> {
        self.table.check_available()?;

        let now = Instant::now();
        let mut reservations = self.table.reservations.lock().await;
        if let Some(existing) = reservations.get(&self.name) {
            if existing.expires_at > now {
                return Ok(None);
            }
        }

        let token = Ulid::new().to_string();
        reservations.insert(
            self.name.clone(),
            Reservation {
                token: token.clone(),
                expires_at: now + lease_duration,
                lease_duration,
            },
        );

        Ok(Some(Lease {
            lock_name: self.name.clone(),
            token,
            backend_lease_id: None,
            lease_duration,
        }))
    }

    async fn renew(&self, lease: &Lease) -> Result<bool, LockError> {
        self.table.check_available()?;

        let now = Instant::now();
        let mut reservations = self.table.reservations.lock().await;
        match reservations.get_mut(&self.name) {
            Some(existing) if existing.token == lease.token && existing.expires_at > now => {
                existing.expires_at = now + existing.lease_duration;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, lease: &Lease) -> Result<(), LockError> {
        self.table.check_available()?;

        let mut reservations = self.table.reservations.lock().await;
        let owned = reservations
            .get(&self.name)
            .map(|existing| existing.token == lease.token)
            .unwrap_or(false);
        if owned {
            reservations.remove(&self.name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_acquire_is_refused_while_held() {
        let table = MemoryLockTable::new();
        let a = MemoryLeaseLock::new("counter", table.clone());
        let b = MemoryLeaseLock::new("counter", table.clone());

        let lease = a.try_acquire(Duration::from_secs(5)).await.unwrap();
        assert!(lease.is_some());
        assert!(b.try_acquire(Duration::from_secs(5)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_locks_with_different_names_are_independent() {
        let table = MemoryLockTable::new();
        let a = MemoryLeaseLock::new("a", table.clone());
        let b = MemoryLeaseLock::new("b", table.clone());

        assert!(a.try_acquire(Duration::from_secs(5)).await.unwrap().is_some());
        assert!(b.try_acquire(Duration::from_secs(5)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_release_with_stale_token_keeps_new_holder() {
        let table = MemoryLockTable::new();
        let lock = MemoryLeaseLock::new("counter", table.clone());

        let stale = lock
            .try_acquire(Duration::from_millis(20))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let current = lock
            .try_acquire(Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        lock.release(&stale).await.unwrap();
        assert!(table.is_held("counter").await);
        assert!(!lock.renew(&stale).await.unwrap());

        lock.release(&current).await.unwrap();
        assert!(!table.is_held("counter").await);
    }
}
