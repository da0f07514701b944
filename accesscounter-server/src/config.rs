use accesscounter_core::{
    CounterError, IncrementCounterOperationRequest, LockBuilder, Result, StoreBackend,
    StoreBuilder,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    pub lock: LockConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub update: UpdateConfig,
}

/// Lease lock location, e.g. `redis://127.0.0.1:6379/visits` or
/// `etcd://10.0.0.1:2379,10.0.0.2:2379/visits`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub object_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    #[serde(default = "default_lease_duration_ms")]
    pub lease_duration_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    #[serde(default = "default_renew_lease")]
    pub renew_lease: bool,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            lease_duration_ms: default_lease_duration_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            retry_interval_ms: default_retry_interval_ms(),
            renew_lease: default_renew_lease(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_lease_duration_ms() -> u64 {
    100
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_retry_interval_ms() -> u64 {
    20
}

fn default_renew_lease() -> bool {
    true
}

fn is_blank(value: Option<&str>) -> bool {
    value.map(str::trim).unwrap_or_default().is_empty()
}

impl Config {
    /// Load from an optional file, overridden by `ACCESSCOUNTER_*` variables
    /// (`ACCESSCOUNTER_STORE__OBJECT_PATH` sets `store.object_path`).
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path).required(false))
            .add_source(
                ::config::Environment::with_prefix("ACCESSCOUNTER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| CounterError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| CounterError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if is_blank(Some(&self.lock.url)) {
            return Err(CounterError::Config("lock.url is required".to_string()));
        }
        if is_blank(Some(&self.store.object_path)) {
            return Err(CounterError::Config(
                "store.object_path is required".to_string(),
            ));
        }
        if self.store.backend != StoreBackend::Memory && is_blank(self.store.bucket.as_deref()) {
            return Err(CounterError::Config(format!(
                "store.bucket is required for {:?} backend",
                self.store.backend
            )));
        }
        if self.update.lease_duration_ms == 0 {
            return Err(CounterError::Config(
                "update.lease_duration_ms must be positive".to_string(),
            ));
        }
        if self.update.request_timeout_ms == 0 {
            return Err(CounterError::Config(
                "update.request_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn increment_request(&self) -> IncrementCounterOperationRequest {
        IncrementCounterOperationRequest {
            lease_duration: Duration::from_millis(self.update.lease_duration_ms),
            request_timeout: Duration::from_millis(self.update.request_timeout_ms),
            retry_interval: Duration::from_millis(self.update.retry_interval_ms.max(1)),
            renew_lease: self.update.renew_lease,
        }
    }

    pub fn lock_builder(&self) -> LockBuilder {
        LockBuilder::new().url(self.lock.url.trim())
    }

    pub fn store_builder(&self) -> StoreBuilder {
        let mut builder = StoreBuilder::new()
            .backend(self.store.backend)
            .object_path(self.store.object_path.trim());
        if let Some(bucket) = &self.store.bucket {
            builder = builder.bucket(bucket.trim());
        }
        if let Some(region) = &self.store.region {
            builder = builder.region(region.trim());
        }
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn load(file: &tempfile::NamedTempFile) -> Result<Config> {
        Config::from_file(file.path().to_str().unwrap())
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let file = write_config(
            r#"
lock:
  url: "memory://visits"
store:
  backend: memory
  object_path: "counter/visits.json"
"#,
        );

        let config = load(&file).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.store.backend, StoreBackend::Memory);

        let request = config.increment_request();
        assert_eq!(request.lease_duration, Duration::from_millis(100));
        assert_eq!(request.request_timeout, Duration::from_secs(5));
        assert_eq!(request.retry_interval, Duration::from_millis(20));
        assert!(request.renew_lease);

        assert!(config.lock_builder().build().is_ok());
        assert!(config.store_builder().build().is_ok());
    }

    #[test]
    fn test_full_config() {
        let file = write_config(
            r#"
bind_addr: "127.0.0.1:9000"
lock:
  url: "redis://127.0.0.1:6379/visits"
store:
  backend: s3
  bucket: "counters"
  region: "ap-northeast-1"
  object_path: "visits.json"
update:
  lease_duration_ms: 250
  request_timeout_ms: 1000
  retry_interval_ms: 5
  renew_lease: false
"#,
        );

        let config = load(&file).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.store.bucket.as_deref(), Some("counters"));
        assert_eq!(config.store.region.as_deref(), Some("ap-northeast-1"));

        let request = config.increment_request();
        assert_eq!(request.lease_duration, Duration::from_millis(250));
        assert_eq!(request.request_timeout, Duration::from_secs(1));
        assert_eq!(request.retry_interval, Duration::from_millis(5));
        assert!(!request.renew_lease);
    }

    #[test]
    fn test_missing_lock_url_is_rejected() {
        let file = write_config(
            r#"
lock:
  url: "  "
store:
  backend: memory
  object_path: "visits.json"
"#,
        );
        assert!(matches!(load(&file), Err(CounterError::Config(_))));
    }

    #[test]
    fn test_bucket_required_outside_memory_backend() {
        let file = write_config(
            r#"
lock:
  url: "memory://visits"
store:
  backend: local
  object_path: "visits.json"
"#,
        );
        let error = load(&file).unwrap_err();
        assert!(error.to_string().contains("store.bucket"));
    }

    #[test]
    fn test_missing_object_path_is_rejected() {
        let file = write_config(
            r#"
lock:
  url: "memory://visits"
store:
  backend: s3
  bucket: "counters"
"#,
        );
        let error = load(&file).unwrap_err();
        assert!(error.to_string().contains("store.object_path"));
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let file = write_config(
            r#"
lock:
  url: "memory://visits"
store:
  backend: memory
  object_path: "visits.json"
update:
  request_timeout_ms: 0
"#,
        );
        assert!(matches!(load(&file), Err(CounterError::Config(_))));
    }
}
