use super::{Lease, LeaseLock};
use crate::error::LockError;
use async_trait::async_trait;
use etcd_client::{Client, Compare, CompareOp, PutOptions, Txn, TxnOp};
use std::time::Duration;
use tokio::sync::OnceCell;
use ulid::Ulid;

/// Lease lock on an etcd key bound to an etcd lease.
///
/// etcd leases have whole-second TTLs, so sub-second lease durations are
/// rounded up to one second.
pub struct EtcdLeaseLock {
    name: String,
    key: String,
    endpoints: Vec<String>,
    client: OnceCell<Client>,
}

impl EtcdLeaseLock {
    pub fn new(endpoints: Vec<String>, name: &str) -> Result<Self, LockError> {
        if endpoints.is_empty() {
            return Err(LockError::Config(
                "etcd endpoints cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            name: name.to_string(),
            key: format!("/accesscounter/locks/{}", name),
            endpoints,
            client: OnceCell::new(),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    async fn client(&self) -> Result<Client, LockError> {
        let client = self
            .client
            .get_or_try_init(|| Client::connect(self.endpoints.clone(), None))
            .await
            .map_err(unavailable)?;
        Ok(client.clone())
    }
}

fn unavailable(error: etcd_client::Error) -> LockError {
    LockError::Unavailable(format!("etcd: {}", error))
}

fn lease_ttl_seconds(lease_duration: Duration) -> i64 {
    let millis = lease_duration.as_millis() as i64;
    ((millis + 999) / 1000).max(1)
}

/// Lease length etcd actually granted. Drives the heartbeat period.
fn granted_lease_duration(ttl_seconds: i64) -> Duration {
    Duration::from_secs(ttl_seconds.max(1) as u64)
}

#[async_trait]
impl LeaseLock for EtcdLeaseLock {
    fn name(&self) -> &str {
        &self.name
    }

    async fn try_acquire(&self, lease_duration: Duration) -> Result<Option<Lease>, LockError> {
        let mut client = self.client().await?;
        let token = Ulid::new().to_string();

        let grant = client
            .lease_grant(lease_ttl_seconds(lease_duration), None)
            .await
            .map_err(unavailable)?;
        let lease_id = grant.id();
        let granted_ttl = grant.ttl();

        let txn = Txn::new()
            .when(vec![Compare::create_revision(
                self.key.clone(),
                CompareOp::Equal,
                0,
            )])
            .and_then(vec![TxnOp::put(
                self.key.clone(),
                token.clone(),
                Some(PutOptions::new().with_lease(lease_id)),
            )]);

        let response = client.txn(txn).await.map_err(unavailable)?;
        if !response.succeeded() {
            if let Err(error) = client.lease_revoke(lease_id).await {
                tracing::debug!("failed to revoke unused etcd lease {}: {}", lease_id, error);
            }
            return Ok(None);
        }

        Ok(Some(Lease {
            lock_name: self.name.clone(),
            token,
            backend_lease_id: Some(lease_id),
            lease_duration: granted_lease_duration(granted_ttl),
        }))
    }

    async fn renew(&self, lease: &Lease) -> Result<bool, LockError> {
        let Some(lease_id) = lease.backend_lease_id else {
            return Ok(false);
        };

        let mut client = self.client().await?;
        let (mut keeper, mut stream) = client
            .lease_keep_alive(lease_id)
            .await
            .map_err(unavailable)?;
        keeper.keep_alive().await.map_err(unavailable)?;

        match stream.message().await.map_err(unavailable)? {
            Some(reply) => Ok(reply.ttl() > 0),
            None => Ok(false),
        }
    }

    async fn release(&self, lease: &Lease) -> Result<(), LockError> {
        let mut client = self.client().await?;

        let txn = Txn::new()
            .when(vec![Compare::value(
                self.key.clone(),
                CompareOp::Equal,
                lease.token.clone(),
            )])
            .and_then(vec![TxnOp::delete(self.key.clone(), None)]);
        let response = client.txn(txn).await.map_err(unavailable)?;
        if !response.succeeded() {
            tracing::warn!(
                "etcd lock {} was no longer held by token {} at release",
                self.name,
                lease.token
            );
        }

        if let Some(lease_id) = lease.backend_lease_id {
            client.lease_revoke(lease_id).await.map_err(unavailable)?;
        }

        Ok(())
    }
}
