//! Streaming Conductor (spec.md section 4.8): one instance per (server,
//! topic), opening a fresh RPC stream at the last persisted offset,
//! dispatching each event to the local sink or the Chunked File Assembler,
//! and checkpointing via the Offset Store Adapter.
//!
//! Grounded on the same retry/backoff/circuit-breaker primitives the
//! Credential Broker uses (`common_retry`), generalized from a single
//! request-response call to a long-lived stream: each "open stream and
//! consume it to completion or failure" attempt is one unit the breaker
//! gates, rather than a single HTTP call.

use std::sync::Arc;
use std::time::Duration;

use common_health::HealthHandle;
use common_retry::{CircuitBreaker, CircuitBreakerConfig, RetryPolicy};
use common_store::OffsetStore;
use federator_auth::CredentialBroker;
use federator_config::{ConnectionDescriptor, StreamKind};
use federator_proto::federator_client::FederatorClient;
use federator_proto::file_stream_event::Event;
use federator_proto::{FileStreamRequest, KafkaByteBatch, TopicRequest};
use thiserror::Error;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::{Request, Status};
use tracing::{info, warn};

use crate::assembler::ChunkedFileAssembler;
use crate::sink::RecordSink;

/// How a conductor's `run` loop ended, reported back to the
/// [`crate::supervisor::ConductorSupervisor`] rather than to the global
/// lifecycle `Manager` — per spec.md section 7, a single (server, topic)
/// pair exhausting its retries or tripping its breaker must not take down
/// any other conductor, so this is the "scheduler issues start/stop,
/// conductor reports completed/failed events" shape from section 9's
/// design notes, not a process-wide failure signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConductorOutcome {
    /// `stop` was cancelled (topology no longer lists this pair, or process
    /// shutdown).
    Stopped,
    /// The circuit breaker opened; the supervisor decides when to retry.
    CircuitOpen,
    /// Consecutive attempts reached the retry policy's cap.
    RetriesExhausted(String),
}

#[derive(Debug, Error)]
pub enum ConductorError {
    #[error("failed to build transport channel: {0}")]
    Transport(#[from] tonic::transport::Error),
    #[error("token error: {0}")]
    Token(#[from] federator_auth::FederatorTokenError),
    #[error("offset store error: {0}")]
    Store(#[from] common_store::StoreError),
    #[error("rpc call failed: {0}")]
    Rpc(#[from] Status),
}

/// Per-(server, topic) conductor. Constructed fresh by the
/// [`crate::supervisor::ConductorSupervisor`] each time it starts streaming
/// from a producer; dropped (and its breaker/backoff state with it) when the
/// topology no longer lists the pair or the task exits.
pub struct StreamingConductor {
    server: ConnectionDescriptor,
    topic: String,
    kind: StreamKind,
    channel: Channel,
    offset_store: Arc<OffsetStore>,
    credential_broker: Arc<CredentialBroker>,
    sink: Arc<dyn RecordSink>,
    assembler: Arc<ChunkedFileAssembler>,
    retry_policy: RetryPolicy,
    breaker: CircuitBreaker,
}

impl StreamingConductor {
    pub async fn connect(
        server: ConnectionDescriptor,
        topic: String,
        kind: StreamKind,
        offset_store: Arc<OffsetStore>,
        credential_broker: Arc<CredentialBroker>,
        sink: Arc<dyn RecordSink>,
        assembler: Arc<ChunkedFileAssembler>,
    ) -> Result<Self, ConductorError> {
        let scheme = if server.tls { "https" } else { "http" };
        let uri = format!("{scheme}://{}:{}", server.server_host, server.server_port);
        let mut endpoint = Endpoint::from_shared(uri)?
            .keep_alive_while_idle(true)
            .timeout(Duration::from_secs(30));
        if server.tls {
            endpoint = endpoint.tls_config(ClientTlsConfig::new())?;
        }
        let channel = endpoint.connect_lazy();

        Ok(Self {
            server,
            topic,
            kind,
            channel,
            offset_store,
            credential_broker,
            sink,
            assembler,
            retry_policy: RetryPolicy::default(),
            breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
        })
    }

    fn store_key_pair(&self) -> (&str, &str) {
        (self.server.client_name.as_str(), self.topic.as_str())
    }

    /// Runs until `stop` is cancelled or this conductor exhausts its retry
    /// budget / trips its breaker, in which case it returns the outcome so
    /// the supervisor can decide whether and when to respawn it — other
    /// conductors are unaffected either way.
    pub async fn run(&self, stop: CancellationToken, health: Option<HealthHandle>) -> ConductorOutcome {
        let mut consecutive_failures = 0u32;

        loop {
            if stop.is_cancelled() {
                info!(server = %self.server.server_name, topic = %self.topic, "conductor stopping");
                return ConductorOutcome::Stopped;
            }

            if !self.breaker.allow_request() {
                warn!(server = %self.server.server_name, topic = %self.topic, "circuit open, surfacing to supervisor");
                return ConductorOutcome::CircuitOpen;
            }

            if let Some(h) = &health {
                h.report_healthy().await;
            }

            match self.run_once().await {
                Ok(()) => {
                    self.breaker.record_success();
                    consecutive_failures = 0;
                    info!(server = %self.server.server_name, topic = %self.topic, "stream completed cleanly, reopening");
                }
                Err(e) => {
                    self.breaker.record_failure();
                    consecutive_failures += 1;
                    warn!(server = %self.server.server_name, topic = %self.topic, error = %e, attempt = consecutive_failures, "conductor attempt failed");

                    if consecutive_failures >= self.retry_policy.max_attempts {
                        return ConductorOutcome::RetriesExhausted(format!(
                            "{}/{} exceeded max consecutive attempts: {e}",
                            self.server.server_name, self.topic
                        ));
                    }

                    let backoff = self.retry_policy.retry_interval(consecutive_failures);
                    tokio::select! {
                        _ = stop.cancelled() => return ConductorOutcome::Stopped,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }
    }

    /// Opens one stream at the currently persisted offset and consumes it to
    /// completion, a 401 (which triggers one token refresh and is treated as
    /// retryable), or a transport failure.
    async fn run_once(&self) -> Result<(), ConductorError> {
        let (client_id, topic) = self.store_key_pair();
        let offset = self.offset_store.get_offset(client_id, topic).await?;
        let token = self.credential_broker.get_token().await?;

        let mut client = FederatorClient::new(self.channel.clone());

        let result = match self.kind {
            StreamKind::Record => self.consume_records(&mut client, &token, offset).await,
            StreamKind::File => self.consume_files(&mut client, &token, offset).await,
        };

        match result {
            Err(ConductorError::Rpc(status)) if status.code() == tonic::Code::Unauthenticated => {
                warn!(server = %self.server.server_name, topic = %self.topic, "producer rejected token, refreshing once");
                self.credential_broker.refresh_after_401().await?;
                Err(ConductorError::Rpc(status))
            }
            other => other,
        }
    }

    fn authed_request<T>(&self, message: T, token: &str) -> Result<Request<T>, ConductorError> {
        let mut request = Request::new(message);
        let value = format!("Bearer {token}")
            .parse()
            .map_err(|_| ConductorError::Rpc(Status::invalid_argument("token is not valid ascii")))?;
        request.metadata_mut().insert("authorization", value);
        Ok(request)
    }

    async fn consume_records(&self, client: &mut FederatorClient<Channel>, token: &str, offset: i64) -> Result<(), ConductorError> {
        let request = self.authed_request(
            TopicRequest {
                client: self.server.client_name.clone(),
                key: self.server.client_key.clone(),
                topic: self.topic.clone(),
                offset,
            },
            token,
        )?;

        let mut stream = client.get_records(request).await?.into_inner();
        let (client_id, topic) = self.store_key_pair();

        while let Some(item) = stream.next().await {
            let batch: KafkaByteBatch = item?;
            self.sink.write(&self.topic, &batch).await.map_err(|e| ConductorError::Rpc(Status::unavailable(e.to_string())))?;
            self.offset_store.set_offset(client_id, topic, batch.offset + 1).await?;
        }

        Ok(())
    }

    async fn consume_files(&self, client: &mut FederatorClient<Channel>, token: &str, start_sequence_id: i64) -> Result<(), ConductorError> {
        let request = self.authed_request(
            FileStreamRequest {
                topic: self.topic.clone(),
                start_sequence_id,
            },
            token,
        )?;

        let mut stream = client.get_files(request).await?.into_inner();
        let (client_id, topic) = self.store_key_pair();

        while let Some(item) = stream.next().await {
            let event = item?;
            match event.event {
                Some(Event::Chunk(chunk)) => {
                    let sequence_id = chunk.file_sequence_id;
                    match self.assembler.accept(&chunk).await {
                        Ok(Some(_location)) => {
                            self.offset_store.set_offset(client_id, topic, sequence_id + 1).await?;
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(server = %self.server.server_name, topic = %self.topic, sequence_id, error = %e, "file assembly failed, offset not advanced");
                        }
                    }
                }
                Some(Event::Warning(warning)) => {
                    warn!(
                        server = %self.server.server_name,
                        topic = %self.topic,
                        skipped_sequence_id = warning.skipped_sequence_id,
                        reason = warning.reason,
                        details = %warning.details,
                        "producer skipped a file descriptor"
                    );
                    self.offset_store.set_offset(client_id, topic, warning.skipped_sequence_id + 1).await?;
                }
                None => {}
            }
        }

        Ok(())
    }
}
