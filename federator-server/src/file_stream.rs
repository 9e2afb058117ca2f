//! File Stream Service (spec.md section 4.6): producer-side, reads
//! file-transfer descriptors from a topic, fetches each file from the
//! configured object store, and streams it as bounded `FileChunk`s with a
//! running SHA-256 checksum. Validation/deserialization failures on a
//! single descriptor become a `StreamWarning`, not a stream failure.
//!
//! Bridged to the tonic response the same way as the Record Stream Service
//! (`record_stream.rs`): a spawned task feeding a bounded `mpsc::Sender`.

use std::sync::Arc;

use common_kafka::TopicReader;
use federator_objectstore::{FileDescriptor, FileSource, ObjectStoreError, SourceType};
use federator_proto::{file_stream_event::Event, FileChunk, FileStreamEvent, StreamWarning, StreamWarningReason};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tonic::Status;
use tracing::{info, warn};

const CHANNEL_CAPACITY: usize = 8;

/// Resolves the concrete [`FileSource`] for a descriptor's `source_type`.
/// The filter plugin loader is out of scope per spec.md's Purpose & Scope;
/// this is the analogous in-scope "contract, not the loader" boundary for
/// object stores.
pub trait FileSourceResolver: Send + Sync {
    fn resolve(&self, source_type: SourceType) -> Arc<dyn FileSource>;
}

pub struct FileStreamService;

impl FileStreamService {
    pub fn stream(
        reader: TopicReader,
        resolver: Arc<dyn FileSourceResolver>,
        chunk_size: usize,
        topic: String,
        start_sequence_id: i64,
    ) -> mpsc::Receiver<Result<FileStreamEvent, Status>> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        tokio::spawn(async move {
            if let Err(e) = run(&reader, resolver.as_ref(), chunk_size, &tx).await {
                warn!(topic = %topic, start_sequence_id, error = %e, "file stream terminated by transport error");
            } else {
                info!(topic = %topic, start_sequence_id, "file stream completed or cancelled");
            }
        });

        rx
    }
}

#[derive(Debug, thiserror::Error)]
enum RunError {
    #[error("kafka error: {0}")]
    Kafka(#[from] common_kafka::ReaderError),
}

async fn run(
    reader: &TopicReader,
    resolver: &dyn FileSourceResolver,
    chunk_size: usize,
    tx: &mpsc::Sender<Result<FileStreamEvent, Status>>,
) -> Result<(), RunError> {
    use std::time::Duration;
    const POLL_TIMEOUT: Duration = Duration::from_secs(2);
    const IDLE_POLL_WINDOWS: u32 = 5;

    let mut idle_windows = 0u32;

    loop {
        let record = match reader.poll_one(POLL_TIMEOUT).await? {
            Some(r) => r,
            None => {
                idle_windows += 1;
                if idle_windows >= IDLE_POLL_WINDOWS {
                    return Ok(());
                }
                continue;
            }
        };
        idle_windows = 0;
        let sequence_id = record.offset;

        let descriptor: FileDescriptor = match serde_json::from_slice(&record.value) {
            Ok(d) => d,
            Err(e) => {
                if !send_warning(tx, sequence_id, StreamWarningReason::Deserialization, e.to_string()).await {
                    return Ok(());
                }
                continue;
            }
        };

        if let Err(e) = descriptor.validate() {
            if !send_warning(tx, sequence_id, StreamWarningReason::Validation, e.to_string()).await {
                return Ok(());
            }
            continue;
        }

        let source = resolver.resolve(descriptor.source_type);
        let (size, byte_stream) = match source.size_and_stream(&descriptor).await {
            Ok(v) => v,
            Err(e) => {
                if !send_warning(tx, sequence_id, StreamWarningReason::Validation, fetch_error_detail(&e)).await {
                    return Ok(());
                }
                continue;
            }
        };

        let file_name = file_name_from_path(&descriptor.path);
        if !stream_file(tx, &file_name, sequence_id, size, chunk_size, byte_stream).await {
            return Ok(());
        }
    }
}

/// The last path component of a descriptor's `path`, used as the wire
/// `fileName` so the consumer's assembler can key its in-flight state
/// without seeing the producer's storage layout.
fn file_name_from_path(path: &str) -> String {
    path.rsplit(['/', '\\']).next().unwrap_or(path).to_string()
}

fn fetch_error_detail(e: &ObjectStoreError) -> String {
    format!("fetch failed: {e}")
}

/// Returns `false` when the receiver was dropped (caller cancel / transport
/// failure), signalling the caller to stop reading entirely.
async fn send_warning(
    tx: &mpsc::Sender<Result<FileStreamEvent, Status>>,
    skipped_sequence_id: i64,
    reason: StreamWarningReason,
    details: String,
) -> bool {
    let event = FileStreamEvent {
        event: Some(Event::Warning(StreamWarning {
            skipped_sequence_id,
            reason: reason as i32,
            details,
        })),
    };
    tx.send(Ok(event)).await.is_ok()
}

/// Splits `byte_stream` into `chunk_size` chunks, computing a running
/// SHA-256. The final chunk (including the sole chunk of an empty file) is
/// only known once the source stream ends, so earlier full chunks are
/// emitted eagerly and the trailing remainder becomes the last chunk.
async fn stream_file(
    tx: &mpsc::Sender<Result<FileStreamEvent, Status>>,
    file_name: &str,
    sequence_id: i64,
    size: u64,
    chunk_size: usize,
    mut byte_stream: federator_objectstore::ByteStreamResult,
) -> bool {
    let total_chunks: i32 = if size == 0 {
        1
    } else {
        size.div_ceil(chunk_size as u64) as i32
    };

    let mut hasher = Sha256::new();
    let mut buffer: Vec<u8> = Vec::with_capacity(chunk_size);
    let mut chunk_index: i32 = 0;
    let mut bytes_seen: u64 = 0;

    loop {
        match byte_stream.next().await {
            Some(Ok(bytes)) => {
                buffer.extend_from_slice(&bytes);
                while buffer.len() >= chunk_size && chunk_index + 1 < total_chunks {
                    let rest = buffer.split_off(chunk_size);
                    let chunk_data = std::mem::replace(&mut buffer, rest);
                    hasher.update(&chunk_data);
                    bytes_seen += chunk_data.len() as u64;
                    if !emit_chunk(tx, file_name, sequence_id, chunk_index, total_chunks, chunk_data, false, 0, "").await {
                        return false;
                    }
                    chunk_index += 1;
                }
            }
            Some(Err(e)) => {
                warn!(sequence_id, error = %e, "object store stream read failed mid-transfer");
                return false;
            }
            None => break,
        }
    }

    hasher.update(&buffer);
    bytes_seen += buffer.len() as u64;
    let checksum = hex::encode(hasher.finalize());
    emit_chunk(tx, file_name, sequence_id, chunk_index, total_chunks.max(chunk_index + 1), buffer, true, bytes_seen, &checksum).await
}

#[allow(clippy::too_many_arguments)]
async fn emit_chunk(
    tx: &mpsc::Sender<Result<FileStreamEvent, Status>>,
    file_name: &str,
    sequence_id: i64,
    chunk_index: i32,
    total_chunks: i32,
    data: Vec<u8>,
    is_last: bool,
    file_size: u64,
    checksum: &str,
) -> bool {
    let chunk = FileChunk {
        file_name: file_name.to_string(),
        file_sequence_id: sequence_id,
        chunk_index,
        total_chunks,
        chunk_data: data,
        is_last_chunk: is_last,
        file_size: if is_last { file_size as i64 } else { 0 },
        file_checksum: if is_last { checksum.to_string() } else { String::new() },
    };
    let event = FileStreamEvent {
        event: Some(Event::Chunk(chunk)),
    };
    tx.send(Ok(event)).await.is_ok()
}
