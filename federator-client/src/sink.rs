//! Consumer-side local bus sink (spec.md section 4.8's "write to local
//! sink"). A thin `async_trait` seam over `common_kafka::TopicWriter` so the
//! Streaming Conductor can be tested against a recording sink instead of a
//! live broker.

use async_trait::async_trait;
use common_kafka::{KafkaConfig, TopicWriter, WriterError};
use federator_proto::KafkaByteBatch;

#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn write(&self, topic: &str, record: &KafkaByteBatch) -> Result<(), WriterError>;
}

/// Writes decoded records back onto this process's own local bus, under the
/// same topic name they were federated from.
pub struct KafkaRecordSink {
    writer: TopicWriter,
}

impl KafkaRecordSink {
    pub async fn connect(config: &KafkaConfig) -> Result<Self, WriterError> {
        Ok(Self {
            writer: TopicWriter::connect(config).await?,
        })
    }
}

#[async_trait]
impl RecordSink for KafkaRecordSink {
    async fn write(&self, topic: &str, record: &KafkaByteBatch) -> Result<(), WriterError> {
        let headers: Vec<(String, Vec<u8>)> = record
            .headers
            .iter()
            .map(|h| (h.name.clone(), h.value.clone()))
            .collect();
        let key = if record.key.is_empty() { None } else { Some(record.key.as_slice()) };
        self.writer.send(topic, key, &record.value, &headers).await
    }
}
