//! Reconciles the current Configuration Resolver snapshot against the
//! Streaming Conductors actually running in this process (spec.md section
//! 4.10's "transitively start/stop per-topic Streaming Conductors").
//!
//! Grounded on `hook-janitor`'s `cleanup_loop` tick shape, generalized from
//! a fixed set of jobs to a dynamic one: every
//! `supervisor_poll_interval_secs` the supervisor diffs "what the topology
//! says this consumer may read" against "what is currently running" and
//! spawns/cancels conductors to match. A conductor that exhausts its own
//! retry budget or trips its breaker reports a [`ConductorOutcome`] rather
//! than a process-wide failure (see `conductor.rs`); the next reconcile
//! tick simply respawns it, giving the supervisor's poll interval as the
//! effective backoff between attempts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common_health::HealthHandle;
use common_store::OffsetStore;
use federator_auth::CredentialBroker;
use federator_config::{ConfigurationResolver, ConnectionDescriptor, StreamKind};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::assembler::ChunkedFileAssembler;
use crate::conductor::{ConductorOutcome, StreamingConductor};
use crate::sink::RecordSink;

struct RunningConductor {
    stop: CancellationToken,
    task: JoinHandle<ConductorOutcome>,
}

/// One instance per consumer process. Owns every [`StreamingConductor`]
/// this process currently runs, keyed by `"<server_name>::<topic>"`.
pub struct ConductorSupervisor {
    consumer_client_id: String,
    connections: Vec<ConnectionDescriptor>,
    resolver: Arc<ConfigurationResolver>,
    offset_store: Arc<OffsetStore>,
    credential_broker: Arc<CredentialBroker>,
    sink: Arc<dyn RecordSink>,
    assembler: Arc<ChunkedFileAssembler>,
    running: Mutex<HashMap<String, RunningConductor>>,
}

fn key(server_name: &str, topic: &str) -> String {
    format!("{server_name}::{topic}")
}

impl ConductorSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        consumer_client_id: String,
        connections: Vec<ConnectionDescriptor>,
        resolver: Arc<ConfigurationResolver>,
        offset_store: Arc<OffsetStore>,
        credential_broker: Arc<CredentialBroker>,
        sink: Arc<dyn RecordSink>,
        assembler: Arc<ChunkedFileAssembler>,
    ) -> Self {
        Self {
            consumer_client_id,
            connections,
            resolver,
            offset_store,
            credential_broker,
            sink,
            assembler,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// The (server, topic, kind) triples this consumer is currently
    /// authorized to read, resolved against the locally configured
    /// connections (spec.md section 4.3: the Management Node says *which*
    /// topics, the local connections file says *where* each server is).
    fn desired(&self) -> HashMap<String, (ConnectionDescriptor, String, StreamKind)> {
        let snapshot = self.resolver.snapshot();
        let links = snapshot.producers_for_consumer(&self.consumer_client_id);

        let mut desired = HashMap::new();
        for link in links {
            match self
                .connections
                .iter()
                .find(|c| c.server_name.eq_ignore_ascii_case(&link.producer_client_id))
            {
                Some(conn) => {
                    desired.insert(key(&conn.server_name, &link.topic), (conn.clone(), link.topic.clone(), link.kind));
                }
                None => {
                    warn!(
                        producer = %link.producer_client_id,
                        topic = %link.topic,
                        "topology authorizes a producer with no matching local connection descriptor, skipping"
                    );
                }
            }
        }
        desired
    }

    /// One reconciliation pass: stop conductors for pairs no longer in the
    /// snapshot, drop bookkeeping for conductors that have already exited
    /// (so they get respawned below), and spawn conductors for newly
    /// authorized pairs.
    pub async fn reconcile(&self) {
        let desired = self.desired();
        let mut running = self.running.lock().await;

        let stale: Vec<String> = running.keys().filter(|k| !desired.contains_key(*k)).cloned().collect();
        for k in stale {
            if let Some(entry) = running.remove(&k) {
                entry.stop.cancel();
                info!(pair = %k, "stopping conductor: no longer authorized by current topology");
            }
        }

        let finished: Vec<String> = running
            .iter()
            .filter(|(_, entry)| entry.task.is_finished())
            .map(|(k, _)| k.clone())
            .collect();
        for k in finished {
            running.remove(&k);
        }

        for (k, (conn, topic, kind)) in desired {
            if running.contains_key(&k) {
                continue;
            }

            let conductor = match StreamingConductor::connect(
                conn.clone(),
                topic.clone(),
                kind,
                self.offset_store.clone(),
                self.credential_broker.clone(),
                self.sink.clone(),
                self.assembler.clone(),
            )
            .await
            {
                Ok(c) => c,
                Err(e) => {
                    warn!(pair = %k, error = %e, "failed to open transport channel for conductor, will retry next reconcile");
                    continue;
                }
            };

            let stop = CancellationToken::new();
            let task_stop = stop.clone();
            let pair = k.clone();
            let task = tokio::spawn(async move {
                let outcome = conductor.run(task_stop, None).await;
                match &outcome {
                    ConductorOutcome::Stopped => info!(pair = %pair, "conductor stopped"),
                    ConductorOutcome::CircuitOpen => warn!(pair = %pair, "conductor circuit open, will respawn on next reconcile"),
                    ConductorOutcome::RetriesExhausted(reason) => {
                        warn!(pair = %pair, reason = %reason, "conductor exhausted retries, will respawn on next reconcile")
                    }
                }
                outcome
            });

            info!(pair = %k, "starting conductor");
            running.insert(k, RunningConductor { stop, task });
        }
    }

    /// Reconciles on a fixed interval until `stop` is cancelled, then stops
    /// every running conductor and waits for their tasks to exit.
    pub async fn run(&self, poll_interval: Duration, stop: CancellationToken, health: Option<HealthHandle>) {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    if let Some(h) = &health {
                        h.report_healthy().await;
                    }
                    self.reconcile().await;
                }
            }
        }

        let mut running = self.running.lock().await;
        for (pair, entry) in running.drain() {
            entry.stop.cancel();
            if let Err(e) = entry.task.await {
                warn!(pair = %pair, error = %e, "conductor task panicked during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use federator_config::{ConsumerEntry, ConsumerProducerLink, ProducerEntry, Product, TopologySnapshot};
    use std::collections::HashMap as StdHashMap;

    fn conn(server_name: &str) -> ConnectionDescriptor {
        ConnectionDescriptor::new("consumer-a", "k", server_name, "host", Some(8443), Some(true)).unwrap()
    }

    #[test]
    fn desired_matches_connections_by_server_name_case_insensitively() {
        let snapshot = TopologySnapshot {
            producers: vec![ProducerEntry {
                client_id: "Acme".to_string(),
                products: vec![Product {
                    topic: "orders".to_string(),
                    consumers: vec!["consumer-a".to_string()],
                    attributes: StdHashMap::new(),
                }],
            }],
            consumers: vec![ConsumerEntry {
                client_id: "consumer-a".to_string(),
                links: vec![ConsumerProducerLink {
                    producer_client_id: "acme".to_string(),
                    topic: "orders".to_string(),
                    kind: StreamKind::Record,
                }],
            }],
        };

        // Building a full ConductorSupervisor needs a live resolver/offset
        // store/credential broker, so this test exercises the matching
        // logic `desired()` relies on directly rather than constructing one.
        let connections = vec![conn("Acme")];
        let link = &snapshot.consumers[0].links[0];
        let matched = connections
            .iter()
            .find(|c| c.server_name.eq_ignore_ascii_case(&link.producer_client_id));
        assert!(matched.is_some());
    }
}
