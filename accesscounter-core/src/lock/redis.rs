use super::{Lease, LeaseLock};
use crate::error::LockError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tokio::sync::OnceCell;
use ulid::Ulid;

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

const RENEW_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// Lease lock on a single redis key: `SET key token NX PX <lease>`.
pub struct RedisLeaseLock {
    name: String,
    key: String,
    client: redis::Client,
    conn: OnceCell<ConnectionManager>,
}

impl RedisLeaseLock {
    pub fn new(url: &str, name: &str) -> Result<Self, LockError> {
        let client = redis::Client::open(url).map_err(|error| {
            LockError::Config(format!("invalid redis lock url '{}': {}", url, error))
        })?;

        Ok(Self {
            name: name.to_string(),
            key: format!("accesscounter:lock:{}", name),
            client,
            conn: OnceCell::new(),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    async fn connection(&self) -> Result<ConnectionManager, LockError> {
        let conn = self
            .conn
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await
            .map_err(unavailable)?;
        Ok(conn.clone())
    }
}

fn unavailable(error: redis::RedisError) -> LockError {
    LockError::Unavailable(format!("redis: {}", error))
}

fn lease_millis(lease_duration: Duration) -> u64 {
    (lease_duration.as_millis() as u64).max(1)
}

#[async_trait]
impl LeaseLock for RedisLeaseLock {
    fn name(&self) -> &str {
        &self.name
    }

    async fn try_acquire(&self, lease_duration: Duration) -> Result<Option<Lease>, LockError> {
        let mut conn = self.connection().await?;
        let token = Ulid::new().to_string();

        let reply: Option<String> = redis::cmd("SET")
            .arg(&self.key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(lease_millis(lease_duration))
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;

        if reply.is_none() {
            return Ok(None);
        }

        Ok(Some(Lease {
            lock_name: self.name.clone(),
            token,
            backend_lease_id: None,
            lease_duration,
        }))
    }

    async fn renew(&self, lease: &Lease) -> Result<bool, LockError> {
        let mut conn = self.connection().await?;
        let renewed: i64 = redis::Script::new(RENEW_SCRIPT)
            .key(&self.key)
            .arg(&lease.token)
            .arg(lease_millis(lease.lease_duration))
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;

        Ok(renewed == 1)
    }

    async fn release(&self, lease: &Lease) -> Result<(), LockError> {
        let mut conn = self.connection().await?;
        let deleted: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(&self.key)
            .arg(&lease.token)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;

        if deleted == 0 {
            tracing::warn!(
                "redis lock {} was no longer held by token {} at release",
                self.name,
                lease.token
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_is_config_error() {
        let result = RedisLeaseLock::new("not a url", "counter");
        assert!(matches!(result, Err(LockError::Config(_))));
    }

    #[test]
    fn test_key_is_namespaced() {
        let lock = RedisLeaseLock::new("redis://127.0.0.1:6379", "counter").unwrap();
        assert_eq!(lock.key(), "accesscounter:lock:counter");
        assert_eq!(lock.name(), "counter");
    }

    #[test]
    fn test_lease_millis_never_zero() {
        assert_eq!(lease_millis(Duration::from_micros(10)), 1);
        assert_eq!(lease_millis(Duration::from_millis(100)), 100);
    }
}
