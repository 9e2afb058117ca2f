//! Consumer-side local bus sink (spec.md section 4.8's "write to local
//! sink"). Grounded directly on `common_kafka::kafka_producer`: same
//! `FutureProducer`/`ClientConfig` construction and metadata "ping" on
//! startup, generalized from JSON-only payloads to raw bytes plus headers
//! since the wire `KafkaByteBatch` already carries opaque payload bytes.

use rdkafka::error::KafkaError;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use thiserror::Error;
use tracing::{error, info};

use crate::config::KafkaConfig;

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("producer send was canceled")]
    Canceled,
}

pub struct TopicWriter {
    producer: FutureProducer,
}

impl TopicWriter {
    pub async fn connect(config: &KafkaConfig) -> Result<Self, WriterError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_bootstrap_servers)
            .set("statistics.interval.ms", "10000")
            .set("message.timeout.ms", "30000");

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        }

        for (k, v) in config.additional() {
            client_config.set(&k, &v);
        }

        let producer: FutureProducer = client_config.create()?;

        match producer
            .client()
            .fetch_metadata(None, std::time::Duration::from_secs(2))
        {
            Ok(metadata) => info!(topics = metadata.topics().len(), "connected to local bus"),
            Err(e) => {
                error!(error = %e, "failed to fetch local bus metadata");
                return Err(WriterError::Kafka(e));
            }
        }

        Ok(Self { producer })
    }

    /// Writes one record (the decoded `KafkaByteBatch`, sans `offset`, which
    /// is the producer's own concern) to `topic`. Headers are carried
    /// through verbatim, matching spec.md's `sharedHeaders` pass-through.
    pub async fn send(
        &self,
        topic: &str,
        key: Option<&[u8]>,
        value: &[u8],
        headers: &[(String, Vec<u8>)],
    ) -> Result<(), WriterError> {
        let mut owned_headers = OwnedHeaders::new_with_capacity(headers.len());
        for (name, value) in headers {
            owned_headers = owned_headers.insert(Header {
                key: name.as_str(),
                value: Some(value.as_slice()),
            });
        }

        let record = FutureRecord {
            topic,
            partition: None,
            payload: Some(value),
            key,
            timestamp: None,
            headers: Some(owned_headers),
        };

        match self.producer.send(record, std::time::Duration::from_secs(10)).await {
            Ok(_) => Ok(()),
            Err((error, _)) => Err(WriterError::Kafka(error)),
        }
    }
}
