use super::{DynLeaseLock, EtcdLeaseLock, MemoryLeaseLock, MemoryLockTable, RedisLeaseLock};
use crate::error::LockError;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScheme {
    Redis,
    RedisTls,
    Etcd,
    Memory,
}

/// Parsed lock connection descriptor: `<scheme>://<endpoints>/<lock name>`.
///
/// - `redis://127.0.0.1:6379/counter` (also `rediss://`, credentials allowed)
/// - `etcd://10.0.0.1:2379,10.0.0.2:2379/counter`
/// - `memory://counter`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockDescriptor {
    pub scheme: LockScheme,
    pub endpoints: Vec<String>,
    pub lock_name: String,
}

impl LockDescriptor {
    pub fn parse(url: &str) -> Result<Self, LockError> {
        let url = url.trim();
        let (scheme, rest) = url.split_once("://").ok_or_else(|| {
            LockError::Config(format!(
                "lock url '{}' is missing a scheme",
                redact_lock_url(url)
            ))
        })?;

        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "redis" => LockScheme::Redis,
            "rediss" => LockScheme::RedisTls,
            "etcd" => LockScheme::Etcd,
            "memory" => LockScheme::Memory,
            other => {
                return Err(LockError::Config(format!(
                    "unsupported lock scheme: {}",
                    other
                )));
            }
        };

        let (authority, lock_name) = match scheme {
            LockScheme::Memory => ("", rest),
            _ => rest.split_once('/').ok_or_else(|| {
                LockError::Config(format!(
                    "lock url '{}' is missing a lock name",
                    redact_lock_url(url)
                ))
            })?,
        };

        let lock_name = lock_name.trim_matches('/');
        if lock_name.is_empty() || lock_name.contains('/') {
            return Err(LockError::Config(format!(
                "invalid lock name in '{}'",
                redact_lock_url(url)
            )));
        }

        let endpoints: Vec<String> = authority
            .split(',')
            .map(str::trim)
            .filter(|endpoint| !endpoint.is_empty())
            .map(str::to_string)
            .collect();

        if scheme != LockScheme::Memory && endpoints.is_empty() {
            return Err(LockError::Config(format!(
                "lock url '{}' has no endpoints",
                redact_lock_url(url)
            )));
        }

        if matches!(scheme, LockScheme::Redis | LockScheme::RedisTls) && endpoints.len() != 1 {
            return Err(LockError::Config(
                "redis lock url must name exactly one endpoint".to_string(),
            ));
        }

        Ok(Self {
            scheme,
            endpoints,
            lock_name: lock_name.to_string(),
        })
    }

    fn redis_url(&self) -> String {
        let scheme = match self.scheme {
            LockScheme::RedisTls => "rediss",
            _ => "redis",
        };
        format!("{}://{}", scheme, self.endpoints.join(","))
    }

    fn etcd_endpoints(&self) -> Vec<String> {
        self.endpoints
            .iter()
            .map(|endpoint| format!("http://{}", endpoint))
            .collect()
    }
}

/// Lock url safe for logs: userinfo before `@` is masked.
pub fn redact_lock_url(url: &str) -> String {
    let url = url.trim();
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let (authority, path) = match rest.find('/') {
        Some(index) => rest.split_at(index),
        None => (rest, ""),
    };
    let authority = authority
        .split(',')
        .map(|endpoint| match endpoint.rsplit_once('@') {
            Some((_, host)) => format!("***@{}", host),
            None => endpoint.to_string(),
        })
        .collect::<Vec<_>>()
        .join(",");
    format!("{}://{}{}", scheme, authority, path)
}

#[derive(Debug, Clone, Default)]
pub struct LockBuilder {
    url: Option<String>,
    memory_table: Option<MemoryLockTable>,
}

impl LockBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Table backing `memory://` locks. A fresh one is created when unset.
    pub fn memory_table(mut self, table: MemoryLockTable) -> Self {
        self.memory_table = Some(table);
        self
    }

    /// Build the backend. Connections are opened lazily on first use.
    pub fn build(&self) -> Result<DynLeaseLock, LockError> {
        let url = self.url.as_deref().unwrap_or_default().trim();
        if url.is_empty() {
            return Err(LockError::Config("lock url is required".to_string()));
        }

        let descriptor = LockDescriptor::parse(url)?;
        tracing::info!(
            "lock backend {:?} name={} endpoints={}",
            descriptor.scheme,
            descriptor.lock_name,
            descriptor.endpoints.len()
        );

        match descriptor.scheme {
            LockScheme::Redis | LockScheme::RedisTls => Ok(Arc::new(RedisLeaseLock::new(
                &descriptor.redis_url(),
                &descriptor.lock_name,
            )?)),
            LockScheme::Etcd => Ok(Arc::new(EtcdLeaseLock::new(
                descriptor.etcd_endpoints(),
                &descriptor.lock_name,
            )?)),
            LockScheme::Memory => {
                let table = self.memory_table.clone().unwrap_or_default();
                Ok(Arc::new(MemoryLeaseLock::new(descriptor.lock_name, table)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_lock_url_masks_credentials() {
        assert_eq!(
            redact_lock_url("redis://:secret@cache:6379/visits"),
            "redis://***@cache:6379/visits"
        );
        assert_eq!(
            redact_lock_url("rediss://user:pw@cache:6380/visits"),
            "rediss://***@cache:6380/visits"
        );
        assert_eq!(
            redact_lock_url("etcd://10.0.0.1:2379,10.0.0.2:2379/visits"),
            "etcd://10.0.0.1:2379,10.0.0.2:2379/visits"
        );
        assert_eq!(redact_lock_url("memory://visits"), "memory://visits");
    }

    #[test]
    fn test_parse_errors_do_not_echo_credentials() {
        let error = LockDescriptor::parse("redis://:secret@cache:6379").unwrap_err();
        assert!(!error.to_string().contains("secret"));
    }

    #[test]
    fn test_parse_redis_descriptor() {
        let descriptor = LockDescriptor::parse("redis://:secret@cache:6379/visits").unwrap();
        assert_eq!(descriptor.scheme, LockScheme::Redis);
        assert_eq!(descriptor.endpoints, vec![":secret@cache:6379".to_string()]);
        assert_eq!(descriptor.lock_name, "visits");
        assert_eq!(descriptor.redis_url(), "redis://:secret@cache:6379");
    }

    #[test]
    fn test_parse_etcd_descriptor_with_many_endpoints() {
        let descriptor =
            LockDescriptor::parse("etcd://10.0.0.1:2379, 10.0.0.2:2379/visits").unwrap();
        assert_eq!(descriptor.scheme, LockScheme::Etcd);
        assert_eq!(
            descriptor.etcd_endpoints(),
            vec![
                "http://10.0.0.1:2379".to_string(),
                "http://10.0.0.2:2379".to_string()
            ]
        );
    }

    #[test]
    fn test_parse_memory_descriptor() {
        let descriptor = LockDescriptor::parse("memory://visits").unwrap();
        assert_eq!(descriptor.scheme, LockScheme::Memory);
        assert!(descriptor.endpoints.is_empty());
        assert_eq!(descriptor.lock_name, "visits");
    }

    #[test]
    fn test_rejects_malformed_descriptors() {
        for url in [
            "",
            "visits",
            "ddb://table/visits",
            "redis://cache:6379",
            "redis://cache:6379/",
            "redis://a:6379,b:6379/visits",
            "etcd:///visits",
            "memory://",
            "etcd://host:2379/a/b",
        ] {
            assert!(
                matches!(LockDescriptor::parse(url), Err(LockError::Config(_))),
                "expected config error for {:?}",
                url
            );
        }
    }

    #[test]
    fn test_builder_requires_url() {
        assert!(matches!(
            LockBuilder::new().build(),
            Err(LockError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_builder_memory_shares_table() {
        let table = MemoryLockTable::new();
        let lock = LockBuilder::new()
            .url("memory://visits")
            .memory_table(table.clone())
            .build()
            .unwrap();

        assert_eq!(lock.name(), "visits");
        lock.try_acquire(std::time::Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert!(table.is_held("visits").await);
    }
}
