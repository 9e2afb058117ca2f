//! Configuration Resolver (spec.md section 4.3): periodically pulls
//! producer/consumer topology from the Management Node and publishes it as
//! an immutable snapshot.
//!
//! Snapshot publication uses a `tokio::sync::watch` channel rather than the
//! source's mutable shared graph — exactly the "immutable snapshots
//! published atomically" design note in section 9: `snapshot()` is a
//! lock-free clone of an `Arc`, and a stale reader simply keeps the
//! `Arc` it already cloned.

use std::sync::Arc;

use async_trait::async_trait;
use federator_auth::CredentialBroker;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::job_scheduler::JobHandler;
use crate::model::TopologySnapshot;

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("management node request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("management node returned status {0}")]
    NonSuccessStatus(u16),
    #[error("failed to parse management node response: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("token error: {0}")]
    Token(#[from] federator_auth::FederatorTokenError),
}

pub struct ConfigurationResolver {
    base_url: String,
    http: reqwest::Client,
    credential_broker: Arc<CredentialBroker>,
    tx: watch::Sender<Arc<TopologySnapshot>>,
    rx: watch::Receiver<Arc<TopologySnapshot>>,
}

impl ConfigurationResolver {
    pub fn new(base_url: impl Into<String>, http: reqwest::Client, credential_broker: Arc<CredentialBroker>) -> Self {
        let (tx, rx) = watch::channel(Arc::new(TopologySnapshot::default()));
        Self {
            base_url: base_url.into(),
            http,
            credential_broker,
            tx,
            rx,
        }
    }

    /// Lock-free snapshot read. Never blocks on an in-progress refresh.
    pub fn snapshot(&self) -> Arc<TopologySnapshot> {
        self.rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<TopologySnapshot>> {
        self.rx.clone()
    }

    /// One pull of both endpoints. On 401, evicts the cached token and
    /// retries once (spec.md section 4.3).
    pub async fn refresh_once(&self) -> Result<(), ResolverError> {
        let token = self.credential_broker.get_token().await?;
        match self.pull(&token).await {
            Err(ResolverError::NonSuccessStatus(401)) => {
                warn!("management node rejected token, evicting cache and retrying once");
                let fresh_token = self.credential_broker.refresh_after_401().await?;
                self.pull(&fresh_token).await
            }
            other => other,
        }
    }

    async fn pull(&self, token: &str) -> Result<(), ResolverError> {
        let producers = self
            .get_json::<Vec<crate::model::ProducerEntry>>("/api/v1/configuration/producer", token)
            .await?;
        let consumers = self
            .get_json::<Vec<crate::model::ConsumerEntry>>("/api/v1/configuration/consumer", token)
            .await?;

        let snapshot = Arc::new(TopologySnapshot { producers, consumers });
        self.tx.send_replace(snapshot);
        info!("published new configuration snapshot");
        Ok(())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str, token: &str) -> Result<T, ResolverError> {
        let resp = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .send()
            .await?;
        if resp.status().as_u16() == 401 {
            return Err(ResolverError::NonSuccessStatus(401));
        }
        if !resp.status().is_success() {
            return Err(ResolverError::NonSuccessStatus(resp.status().as_u16()));
        }
        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// Registered with the [`crate::job_scheduler::JobScheduler`] on the
/// consumer side (spec.md section 4.10a): one tick is one `refresh_once`
/// call, leaving interval timing and retry bookkeeping to the scheduler
/// rather than duplicating a loop here.
#[async_trait]
impl JobHandler for ConfigurationResolver {
    async fn run(&self) -> anyhow::Result<()> {
        self.refresh_once().await.map_err(anyhow::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConsumerEntry, ProducerEntry, Product};
    use std::collections::HashMap;

    #[test]
    fn snapshot_starts_empty() {
        let (tx, rx) = watch::channel(Arc::new(TopologySnapshot::default()));
        drop(tx);
        assert!(rx.borrow().producers.is_empty());
    }

    #[test]
    fn stale_reader_keeps_previous_snapshot_after_publish() {
        let (tx, rx) = watch::channel(Arc::new(TopologySnapshot::default()));
        let stale = rx.borrow().clone();
        let fresh = Arc::new(TopologySnapshot {
            producers: vec![ProducerEntry {
                client_id: "p1".to_string(),
                products: vec![Product {
                    topic: "orders".to_string(),
                    consumers: vec!["A".to_string()],
                    attributes: HashMap::new(),
                }],
            }],
            consumers: vec![ConsumerEntry { client_id: "A".to_string(), links: vec![] }],
        });
        tx.send_replace(fresh.clone());
        assert!(stale.producers.is_empty());
        assert_eq!(rx.borrow().producers.len(), 1);
    }
}
