//! Per-request topic reader for the producer side (Record Stream Service,
//! File Stream Service; spec.md sections 4.5/4.6).
//!
//! Unlike `common_kafka::kafka_consumer::SingleTopicConsumer` (one
//! consumer-group membership for the lifetime of the process), each inbound
//! RPC here opens its own reader seeked to the caller-supplied offset —
//! there is no broker-side group to rejoin, since offset tracking is the
//! consumer's responsibility (spec.md section 4.5, "Termination"). Grounded
//! on the same `StreamConsumer`/`ClientConfig` shape as
//! `common_kafka::kafka_consumer`, with `assign()` replacing `subscribe()`.

use std::time::Duration;

use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::{ClientConfig, Message, Offset, TopicPartitionList};
use thiserror::Error;
use tracing::debug;

use crate::config::KafkaConfig;

/// The single partition every topic in this system is assumed to have.
/// spec.md's `Offset` type is a plain per-(client, topic) integer with no
/// partition dimension, so the wire protocol and the offset store carry no
/// partition field either; this reader assigns only partition 0.
pub const PARTITION: i32 = 0;

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
}

/// One record read off the local bus: payload bytes plus headers (spec.md
/// section 3's `Record`), carrying the offset it was read at.
#[derive(Debug, Clone)]
pub struct KafkaRecord {
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
    pub headers: Vec<(String, Vec<u8>)>,
    pub offset: i64,
}

impl KafkaRecord {
    /// The value of a named header, if present. Used by the filter engine to
    /// read `Security-Label` without cloning the full header list.
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }
}

/// Opens a `StreamConsumer` assigned (not subscribed) to `topic`'s single
/// partition, seeked to `start_offset`.
pub struct TopicReader {
    consumer: StreamConsumer,
    topic: String,
}

impl TopicReader {
    pub fn open(config: &KafkaConfig, topic: &str, start_offset: i64) -> Result<Self, ReaderError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_bootstrap_servers)
            .set("group.id", &config.kafka_consumer_group)
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .set("statistics.interval.ms", "10000");

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        }

        for (k, v) in config.additional() {
            client_config.set(&k, &v);
        }

        let consumer: StreamConsumer = client_config.create()?;

        let mut assignment = TopicPartitionList::new();
        assignment.add_partition_offset(topic, PARTITION, Offset::Offset(start_offset))?;
        consumer.assign(&assignment)?;

        debug!(topic, start_offset, "opened topic reader");
        Ok(Self {
            consumer,
            topic: topic.to_string(),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Reads one record, waiting up to `timeout`. `Ok(None)` means the poll
    /// window elapsed with nothing to read (spec.md section 4.5's idle
    /// timeout uses this to decide end-of-stream).
    pub async fn poll_one(&self, timeout: Duration) -> Result<Option<KafkaRecord>, ReaderError> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Ok(Ok(message)) => {
                let key = message.key().map(|k| k.to_vec());
                let value = message.payload().unwrap_or(&[]).to_vec();
                let headers = message
                    .headers()
                    .map(|hs| {
                        (0..hs.count())
                            .filter_map(|i| {
                                let header = hs.get(i);
                                header.value.map(|v| (header.key.to_string(), v.to_vec()))
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                let offset = message.offset();
                Ok(Some(KafkaRecord {
                    key,
                    value,
                    headers,
                    offset,
                }))
            }
            Ok(Err(e)) => Err(ReaderError::Kafka(e)),
            Err(_elapsed) => Ok(None),
        }
    }

    /// Drains up to `max_records` within `total_timeout`, stopping early once
    /// the window elapses or a single `poll_one` comes back empty.
    pub async fn poll_batch(
        &self,
        max_records: u32,
        total_timeout: Duration,
    ) -> Result<Vec<KafkaRecord>, ReaderError> {
        let deadline = tokio::time::Instant::now() + total_timeout;
        let mut out = Vec::new();
        while (out.len() as u32) < max_records {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.poll_one(remaining).await? {
                Some(record) => out.push(record),
                None => break,
            }
        }
        Ok(out)
    }
}
