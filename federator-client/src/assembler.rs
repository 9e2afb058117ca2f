//! Chunked File Assembler (spec.md section 4.7): reconstructs a file on disk
//! from an ordered sequence of `FileChunk` messages, verifies size and
//! SHA-256 on the final chunk, and atomically publishes the result to the
//! configured Received-File Storage provider.
//!
//! State is keyed by `<sanitized filename>#<sequenceId>` behind a per-key
//! `tokio::sync::Mutex` so different files assemble concurrently while a
//! single (name, seq) pair is single-writer, matching the "monitor" model
//! spec.md describes. The temp file handle is never held across an `.await`
//! point beyond a single chunk write, so it is released on every exit path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use federator_objectstore::{ObjectStoreError, ReceivedFileStorage, StoredLocation};
use federator_proto::FileChunk;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug, Error)]
pub enum FileAssemblyError {
    #[error("checksum mismatch for {file_name:?} at sequence {sequence_id}: expected {expected}, computed {actual}")]
    ChecksumMismatch {
        file_name: String,
        sequence_id: i64,
        expected: String,
        actual: String,
    },
    #[error("size mismatch for {file_name:?} at sequence {sequence_id}: expected {expected}, wrote {actual}")]
    SizeMismatch {
        file_name: String,
        sequence_id: i64,
        expected: u64,
        actual: u64,
    },
    #[error("io error assembling file: {0}")]
    Io(#[from] std::io::Error),
    #[error("received-file storage rejected the completed file: {0}")]
    Storage(#[from] ObjectStoreError),
}

struct AssemblyState {
    temp_path: PathBuf,
    bytes_written: u64,
    hasher: Sha256,
}

/// Disk-backed receiver for chunked file streams. One instance is shared by
/// every Streaming Conductor handling a `StreamKind::File` topic.
pub struct ChunkedFileAssembler {
    base_dir: PathBuf,
    storage: Arc<dyn ReceivedFileStorage>,
    states: Mutex<HashMap<String, Arc<Mutex<Option<AssemblyState>>>>>,
}

impl ChunkedFileAssembler {
    pub fn new(base_dir: impl Into<PathBuf>, storage: Arc<dyn ReceivedFileStorage>) -> Self {
        Self {
            base_dir: base_dir.into(),
            storage,
            states: Mutex::new(HashMap::new()),
        }
    }

    fn parts_dir(&self) -> PathBuf {
        self.base_dir.join(".parts")
    }

    /// Processes one chunk. Returns `Some(location)` once the chunk
    /// completes a file, `None` while still buffering.
    pub async fn accept(&self, chunk: &FileChunk) -> Result<Option<StoredLocation>, FileAssemblyError> {
        let sanitized = sanitize_file_name(&chunk.file_name);
        let key = format!("{sanitized}#{}", chunk.file_sequence_id);

        let entry = {
            let mut states = self.states.lock().await;
            states.entry(key.clone()).or_insert_with(|| Arc::new(Mutex::new(None))).clone()
        };

        let result = {
            let mut guard = entry.lock().await;
            self.accept_locked(&sanitized, chunk, &mut guard).await
        };

        if result.is_ok() {
            if let Ok(Some(_)) = &result {
                self.states.lock().await.remove(&key);
            }
        } else {
            self.states.lock().await.remove(&key);
        }

        result
    }

    async fn accept_locked(
        &self,
        sanitized: &str,
        chunk: &FileChunk,
        slot: &mut Option<AssemblyState>,
    ) -> Result<Option<StoredLocation>, FileAssemblyError> {
        if slot.is_none() {
            tokio::fs::create_dir_all(self.parts_dir()).await?;
            let temp_path = self.parts_dir().join(format!("{sanitized}.{}.part", chunk.file_sequence_id));
            // Truncate any stale temp file from a previous crashed attempt.
            tokio::fs::File::create(&temp_path).await?;
            *slot = Some(AssemblyState {
                temp_path,
                bytes_written: 0,
                hasher: Sha256::new(),
            });
        }

        let state = slot.as_mut().expect("just initialized above");

        {
            let mut file = tokio::fs::OpenOptions::new().append(true).open(&state.temp_path).await?;
            file.write_all(&chunk.chunk_data).await?;
            file.flush().await?;
        }
        state.bytes_written += chunk.chunk_data.len() as u64;
        state.hasher.update(&chunk.chunk_data);

        if !chunk.is_last_chunk {
            return Ok(None);
        }

        if !chunk.file_checksum.trim().is_empty() {
            let computed = hex::encode(state.hasher.clone().finalize());
            if !computed.eq_ignore_ascii_case(&chunk.file_checksum) {
                let temp_path = state.temp_path.clone();
                *slot = None;
                tokio::fs::remove_file(&temp_path).await.ok();
                return Err(FileAssemblyError::ChecksumMismatch {
                    file_name: sanitized.to_string(),
                    sequence_id: chunk.file_sequence_id,
                    expected: chunk.file_checksum.clone(),
                    actual: computed,
                });
            }
        }

        if chunk.file_size >= 0 && state.bytes_written != chunk.file_size as u64 {
            let expected = chunk.file_size as u64;
            let actual = state.bytes_written;
            let temp_path = state.temp_path.clone();
            *slot = None;
            tokio::fs::remove_file(&temp_path).await.ok();
            return Err(FileAssemblyError::SizeMismatch {
                file_name: sanitized.to_string(),
                sequence_id: chunk.file_sequence_id,
                expected,
                actual,
            });
        }

        let temp_path = state.temp_path.clone();
        *slot = None;

        let final_path = self.base_dir.join(sanitized);
        move_into_place(&temp_path, &final_path).await?;

        let location = self.storage.store(&final_path, sanitized).await?;
        Ok(Some(location))
    }
}

/// Strips any path components from a producer-supplied file name so a
/// traversal attempt (`../../etc/passwd`) cannot escape `base_dir`.
fn sanitize_file_name(raw: &str) -> String {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    if name.trim().is_empty() {
        "unnamed".to_string()
    } else {
        name.to_string()
    }
}

/// Renames the completed temp file into place; falls back to copy-then-remove
/// when the filesystem refuses the rename (e.g. across devices).
async fn move_into_place(temp_path: &Path, final_path: &Path) -> std::io::Result<()> {
    if let Some(parent) = final_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    match tokio::fs::rename(temp_path, final_path).await {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!(error = %e, "atomic rename failed, falling back to copy");
            tokio::fs::copy(temp_path, final_path).await?;
            tokio::fs::remove_file(temp_path).await?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use federator_objectstore::LocalFiles;

    fn chunk(name: &str, seq: i64, idx: i32, total: i32, data: &[u8], last: bool, size: i64, checksum: &str) -> FileChunk {
        FileChunk {
            file_name: name.to_string(),
            file_sequence_id: seq,
            chunk_index: idx,
            total_chunks: total,
            chunk_data: data.to_vec(),
            is_last_chunk: last,
            file_size: size,
            file_checksum: checksum.to_string(),
        }
    }

    #[tokio::test]
    async fn assembles_a_multi_chunk_file_and_hands_off_to_storage() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalFiles { base_dir: dir.path().to_path_buf() });
        let assembler = ChunkedFileAssembler::new(dir.path(), storage);

        let data = b"hello world";
        let checksum = hex::encode(Sha256::digest(data));

        let c0 = chunk("report.csv", 7, 0, 2, &data[..6], false, 0, "");
        assert!(assembler.accept(&c0).await.unwrap().is_none());

        let c1 = chunk("report.csv", 7, 1, 2, &data[6..], true, data.len() as i64, &checksum);
        let location = assembler.accept(&c1).await.unwrap().unwrap();
        assert_eq!(location, StoredLocation::Local(dir.path().join("report.csv")));

        let contents = tokio::fs::read(dir.path().join("report.csv")).await.unwrap();
        assert_eq!(contents, data);
        assert!(!dir.path().join(".parts").join("report.csv.7.part").exists());
    }

    #[tokio::test]
    async fn checksum_mismatch_deletes_temp_file_and_fails() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalFiles { base_dir: dir.path().to_path_buf() });
        let assembler = ChunkedFileAssembler::new(dir.path(), storage);

        let data = vec![b'x'; 300];
        let c0 = chunk("data.bin", 1, 0, 1, &data, true, data.len() as i64, "deadbeef");
        let err = assembler.accept(&c0).await.unwrap_err();
        assert!(matches!(err, FileAssemblyError::ChecksumMismatch { .. }));
        assert!(!dir.path().join("data.bin").exists());
        assert!(!dir.path().join(".parts").join("data.bin.1.part").exists());
    }

    #[tokio::test]
    async fn size_mismatch_deletes_temp_file_and_fails() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalFiles { base_dir: dir.path().to_path_buf() });
        let assembler = ChunkedFileAssembler::new(dir.path(), storage);

        let data = b"short";
        let checksum = hex::encode(Sha256::digest(data));
        let c0 = chunk("data.bin", 2, 0, 1, data, true, 999, &checksum);
        let err = assembler.accept(&c0).await.unwrap_err();
        assert!(matches!(err, FileAssemblyError::SizeMismatch { expected: 999, actual: 5, .. }));
        assert!(!dir.path().join("data.bin").exists());
    }

    #[tokio::test]
    async fn empty_file_produces_single_last_chunk_with_zero_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalFiles { base_dir: dir.path().to_path_buf() });
        let assembler = ChunkedFileAssembler::new(dir.path(), storage);

        let checksum = hex::encode(Sha256::digest(b""));
        let c0 = chunk("empty.bin", 3, 0, 1, &[], true, 0, &checksum);
        let location = assembler.accept(&c0).await.unwrap().unwrap();
        assert_eq!(location, StoredLocation::Local(dir.path().join("empty.bin")));
    }

    #[test]
    fn sanitize_strips_path_components() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("a/b/report.csv"), "report.csv");
        assert_eq!(sanitize_file_name("plain.txt"), "plain.txt");
    }
}
