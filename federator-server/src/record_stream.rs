//! Record Stream Service (spec.md section 4.5): producer-side, consumes a
//! local topic at a caller-given offset, applies the Header Filter Engine,
//! and streams matching records to the client.
//!
//! Grounded on `ferroid-tonic-server`'s `stream_ids` handler shape: a
//! spawned source-read task bridged to the client via a bounded
//! `mpsc::Sender`, with cancellation detected by the sender observing a
//! dropped receiver. Backpressure falls out of the same bounded channel —
//! `send` blocks until the RPC transport drains it, which is exactly
//! "suspends further reads from the local bus until capacity returns."

use std::collections::HashSet;
use std::time::Duration;

use common_kafka::{KafkaRecord, ReaderError, TopicReader};
use federator_filter::{Attribute, FilterEngine};
use federator_proto::{KafkaByteBatch, KafkaHeader};
use tokio::sync::mpsc;
use tonic::Status;
use tracing::{info, warn};

const CHANNEL_CAPACITY: usize = 32;
/// spec.md section 4.5: "when the local consumer returns empty after a poll
/// and the idle timeout elapses, the service completes the stream." Five
/// consecutive empty poll windows is the idle budget this service allows.
const IDLE_POLL_WINDOWS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Cancelled,
    Failed,
}

pub struct RecordStreamService;

impl RecordStreamService {
    /// Spawns the source-read loop and returns the receiving half of the
    /// bridge channel. The loop runs until end-of-stream, the receiver is
    /// dropped (caller cancel), or an unrecoverable error occurs.
    pub fn stream(
        reader: TopicReader,
        filter_engine: FilterEngine,
        required_attributes: Vec<Attribute>,
        shared_headers: Option<HashSet<String>>,
        poll_records: u32,
        poll_duration: Duration,
        topic: String,
        caller_id: String,
    ) -> mpsc::Receiver<Result<KafkaByteBatch, Status>> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let outcome = run(
                &reader,
                &filter_engine,
                &required_attributes,
                shared_headers.as_ref(),
                poll_records,
                poll_duration,
                &tx,
            )
            .await;

            match outcome {
                Ok(StreamOutcome::Completed) => {
                    info!(topic = %topic, client = %caller_id, "record stream completed cleanly");
                }
                Ok(StreamOutcome::Cancelled) => {
                    info!(topic = %topic, client = %caller_id, "record stream cancelled by caller");
                }
                Ok(StreamOutcome::Failed) | Err(_) => {
                    warn!(topic = %topic, client = %caller_id, "record stream failed");
                }
            }
        });

        rx
    }
}

async fn run(
    reader: &TopicReader,
    filter_engine: &FilterEngine,
    required_attributes: &[Attribute],
    shared_headers: Option<&HashSet<String>>,
    poll_records: u32,
    poll_duration: Duration,
    tx: &mpsc::Sender<Result<KafkaByteBatch, Status>>,
) -> Result<StreamOutcome, ReaderError> {
    let mut idle_windows = 0u32;

    loop {
        let batch = reader.poll_batch(poll_records, poll_duration).await?;

        if batch.is_empty() {
            idle_windows += 1;
            if idle_windows >= IDLE_POLL_WINDOWS {
                return Ok(StreamOutcome::Completed);
            }
            continue;
        }
        idle_windows = 0;

        for record in batch {
            match release_decision(filter_engine, required_attributes, &record) {
                Ok(true) => {
                    let batch = encode(&record, shared_headers);
                    if tx.send(Ok(batch)).await.is_err() {
                        return Ok(StreamOutcome::Cancelled);
                    }
                }
                Ok(false) => {
                    // dropped by the filter; stream continues (spec.md section 7:
                    // FilterParseError/filter exclusion never escapes the record).
                }
                Err(e) => {
                    warn!(error = %e, offset = record.offset, "dropping record with malformed security label");
                }
            }
        }
    }
}

fn release_decision(
    filter_engine: &FilterEngine,
    required_attributes: &[Attribute],
    record: &KafkaRecord,
) -> Result<bool, federator_filter::LabelError> {
    let raw_label = record
        .header(federator_filter::SECURITY_LABEL_HEADER)
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned());
    filter_engine.evaluate(required_attributes, raw_label.as_deref(), None)
}

fn encode(record: &KafkaRecord, shared_headers: Option<&HashSet<String>>) -> KafkaByteBatch {
    let headers = record
        .headers
        .iter()
        .filter(|(name, _)| match shared_headers {
            Some(allowed) => allowed.contains(name.as_str()),
            None => true,
        })
        .map(|(name, value)| KafkaHeader {
            name: name.clone(),
            value: value.clone(),
        })
        .collect();

    KafkaByteBatch {
        key: record.key.clone().unwrap_or_default(),
        value: record.value.clone(),
        headers,
        offset: record.offset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(offset: i64, headers: Vec<(&str, &str)>) -> KafkaRecord {
        KafkaRecord {
            key: None,
            value: b"payload".to_vec(),
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
                .collect(),
            offset,
        }
    }

    #[test]
    fn release_decision_keeps_matching_label() {
        let engine = FilterEngine::default();
        let required = vec![Attribute::new("nationality", "uk")];
        let r = record(0, vec![("Security-Label", "NATIONALITY=UK")]);
        assert!(release_decision(&engine, &required, &r).unwrap());
    }

    #[test]
    fn release_decision_drops_mismatched_label() {
        let engine = FilterEngine::default();
        let required = vec![Attribute::new("nationality", "uk")];
        let r = record(1, vec![("Security-Label", "NATIONALITY=US")]);
        assert!(!release_decision(&engine, &required, &r).unwrap());
    }

    #[test]
    fn encode_filters_to_shared_headers_when_configured() {
        let r = record(5, vec![("Security-Label", "NATIONALITY=UK"), ("trace-id", "abc")]);
        let allowed: HashSet<String> = ["trace-id".to_string()].into_iter().collect();
        let encoded = encode(&r, Some(&allowed));
        assert_eq!(encoded.headers.len(), 1);
        assert_eq!(encoded.headers[0].name, "trace-id");
        assert_eq!(encoded.offset, 5);
    }

    #[test]
    fn encode_keeps_all_headers_when_shared_headers_unconfigured() {
        let r = record(5, vec![("Security-Label", "NATIONALITY=UK"), ("trace-id", "abc")]);
        let encoded = encode(&r, None);
        assert_eq!(encoded.headers.len(), 2);
    }

    #[test]
    fn release_decision_keeps_uk_drops_us_for_nationality_filter() {
        let engine = FilterEngine::default();
        let required = vec![Attribute::new("nationality", "uk")];
        let r0 = record(0, vec![("Security-Label", "NATIONALITY=UK")]);
        let r1 = record(1, vec![("Security-Label", "NATIONALITY=US")]);
        let r2 = record(2, vec![("Security-Label", "NATIONALITY=UK")]);
        let kept: Vec<i64> = [&r0, &r1, &r2]
            .into_iter()
            .filter(|r| release_decision(&engine, &required, r).unwrap())
            .map(|r| r.offset)
            .collect();
        assert_eq!(kept, vec![0, 2]);
    }
}
