//! Pluggable object store abstraction used by the File Stream Service
//! (producer side, spec.md section 4.6) to fetch file-transfer descriptors
//! and by the Chunked File Assembler (consumer side, spec.md section 4.7)
//! to publish completed files. SDK internals for S3/Azure/GCS are out of
//! scope per spec.md's Purpose & Scope; this crate carries only the
//! interface the core consumes, plus a concrete S3 implementation grounded
//! on `common-s3`'s `S3Client` trait (get/put, `S3Error` taxonomy,
//! `#[async_trait]`) since the AWS SDK is already this workspace's chosen
//! stack. Azure/GCP are represented as descriptor variants whose concrete
//! client is injected by the composition root; this crate ships no Azure/GCP
//! SDK calls.

use std::path::{Path, PathBuf};
use std::pin::Pin;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream as AwsByteStream;
use bytes::Bytes;
use thiserror::Error;
use tokio_stream::Stream;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceType {
    Local,
    S3,
    Azure,
    Gcp,
}

/// A file-transfer descriptor read from the producer's local topic
/// (spec.md section 4.6). JSON-decoded off the topic value by the File
/// Stream Service; a decode failure there is a `DeserializationError`
/// (spec.md section 4.6, step 1), not a panic.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct FileDescriptor {
    pub source_type: SourceType,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("path is required")]
    BlankPath,
    #[error("container is required for {0:?} sources")]
    BlankContainer(SourceType),
}

impl FileDescriptor {
    /// Non-blank path always; non-blank container additionally required
    /// for cloud providers (spec.md section 4.6, step 1).
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.path.trim().is_empty() {
            return Err(ValidationError::BlankPath);
        }
        if self.source_type != SourceType::Local
            && self.container.as_deref().unwrap_or("").trim().is_empty()
        {
            return Err(ValidationError::BlankContainer(self.source_type));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("object store operation failed: {0}")]
    OperationFailed(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0:?} is not configured in this build (out of scope SDK internals)")]
    ProviderNotConfigured(SourceType),
}

pub type ByteStreamResult = Pin<Box<dyn Stream<Item = Result<Bytes, ObjectStoreError>> + Send>>;

/// Producer-side file fetch contract (spec.md section 4.6, steps 2-4).
#[async_trait]
pub trait FileSource: Send + Sync {
    async fn size_and_stream(&self, descriptor: &FileDescriptor) -> Result<(u64, ByteStreamResult), ObjectStoreError>;
}

/// Where a completed file landed after the Chunked File Assembler publishes
/// it (spec.md section 4.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredLocation {
    Local(PathBuf),
    Remote { container: String, key: String },
}

/// Consumer-side Received-File Storage contract (spec.md section 4.7):
/// LOCAL keeps the file in place, S3/Azure upload and optionally remove the
/// local temp copy.
#[async_trait]
pub trait ReceivedFileStorage: Send + Sync {
    async fn store(&self, local_path: &Path, sanitized_name: &str) -> Result<StoredLocation, ObjectStoreError>;
}

/// Reads files directly off the local filesystem. Used on the producer side
/// for `SourceType::Local` descriptors and on the consumer side as the
/// default Received-File Storage (files are already where they need to be).
pub struct LocalFiles {
    pub base_dir: PathBuf,
}

#[async_trait]
impl FileSource for LocalFiles {
    async fn size_and_stream(&self, descriptor: &FileDescriptor) -> Result<(u64, ByteStreamResult), ObjectStoreError> {
        let path = self.base_dir.join(&descriptor.path);
        let metadata = tokio::fs::metadata(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ObjectStoreError::NotFound(descriptor.path.clone())
            } else {
                ObjectStoreError::Io(e)
            }
        })?;
        let size = metadata.len();
        let file = tokio::fs::File::open(&path).await?;
        let stream = tokio_util::io::ReaderStream::new(file);
        let stream = tokio_stream::StreamExt::map(stream, |chunk| chunk.map_err(ObjectStoreError::Io));
        Ok((size, Box::pin(stream)))
    }
}

#[async_trait]
impl ReceivedFileStorage for LocalFiles {
    async fn store(&self, local_path: &Path, _sanitized_name: &str) -> Result<StoredLocation, ObjectStoreError> {
        Ok(StoredLocation::Local(local_path.to_path_buf()))
    }
}

/// S3-backed object store, grounded on `common-s3`'s `S3Impl` (an
/// `aws_sdk_s3::Client` wrapped behind a small async trait).
pub struct S3Files {
    pub client: aws_sdk_s3::Client,
    pub bucket_for_received_files: Option<String>,
    pub remove_local_after_upload: bool,
}

#[async_trait]
impl FileSource for S3Files {
    async fn size_and_stream(&self, descriptor: &FileDescriptor) -> Result<(u64, ByteStreamResult), ObjectStoreError> {
        let bucket = descriptor
            .container
            .as_deref()
            .ok_or_else(|| ObjectStoreError::OperationFailed("S3 descriptor missing bucket".to_string()))?;

        let head = self
            .client
            .head_object()
            .bucket(bucket)
            .key(&descriptor.path)
            .send()
            .await
            .map_err(|e| ObjectStoreError::OperationFailed(e.to_string()))?;
        let size = head.content_length().unwrap_or(0).max(0) as u64;

        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(&descriptor.path)
            .send()
            .await
            .map_err(|e| ObjectStoreError::OperationFailed(e.to_string()))?;

        let stream = output.body.into_async_read();
        let stream = tokio_util::io::ReaderStream::new(stream);
        let stream = tokio_stream::StreamExt::map(stream, |chunk| chunk.map_err(ObjectStoreError::Io));
        Ok((size, Box::pin(stream)))
    }
}

#[async_trait]
impl ReceivedFileStorage for S3Files {
    async fn store(&self, local_path: &Path, sanitized_name: &str) -> Result<StoredLocation, ObjectStoreError> {
        let bucket = self
            .bucket_for_received_files
            .clone()
            .ok_or_else(|| ObjectStoreError::OperationFailed("no bucket configured for received files".to_string()))?;

        let body = AwsByteStream::from_path(local_path)
            .await
            .map_err(|e| ObjectStoreError::OperationFailed(e.to_string()))?;
        self.client
            .put_object()
            .bucket(&bucket)
            .key(sanitized_name)
            .body(body)
            .send()
            .await
            .map_err(|e| ObjectStoreError::OperationFailed(e.to_string()))?;

        if self.remove_local_after_upload {
            tokio::fs::remove_file(local_path).await.ok();
        }

        Ok(StoredLocation::Remote {
            container: bucket,
            key: sanitized_name.to_string(),
        })
    }
}

/// Stand-in for providers whose SDK internals are out of scope: it honors
/// the trait contract with a clear error rather than silently no-op'ing.
pub struct UnconfiguredProvider(pub SourceType);

#[async_trait]
impl FileSource for UnconfiguredProvider {
    async fn size_and_stream(&self, _descriptor: &FileDescriptor) -> Result<(u64, ByteStreamResult), ObjectStoreError> {
        Err(ObjectStoreError::ProviderNotConfigured(self.0))
    }
}

#[async_trait]
impl ReceivedFileStorage for UnconfiguredProvider {
    async fn store(&self, _local_path: &Path, _sanitized_name: &str) -> Result<StoredLocation, ObjectStoreError> {
        Err(ObjectStoreError::ProviderNotConfigured(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_deserializes_from_json() {
        let json = r#"{"source_type":"S3","container":"bucket","path":"a/b.bin"}"#;
        let d: FileDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(d.source_type, SourceType::S3);
        assert_eq!(d.container.as_deref(), Some("bucket"));
        assert_eq!(d.path, "a/b.bin");
    }

    #[test]
    fn descriptor_deserializes_with_blank_path_when_absent() {
        let json = r#"{"source_type":"LOCAL"}"#;
        let d: FileDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(d.validate().unwrap_err(), ValidationError::BlankPath);
    }

    #[test]
    fn validate_rejects_blank_path() {
        let d = FileDescriptor { source_type: SourceType::Local, container: None, path: "  ".to_string() };
        assert_eq!(d.validate().unwrap_err(), ValidationError::BlankPath);
    }

    #[test]
    fn validate_requires_container_for_cloud_sources() {
        let d = FileDescriptor { source_type: SourceType::S3, container: None, path: "a.bin".to_string() };
        assert_eq!(d.validate().unwrap_err(), ValidationError::BlankContainer(SourceType::S3));
    }

    #[test]
    fn validate_allows_missing_container_for_local() {
        let d = FileDescriptor { source_type: SourceType::Local, container: None, path: "a.bin".to_string() };
        assert!(d.validate().is_ok());
    }

    #[tokio::test]
    async fn local_file_source_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let source = LocalFiles { base_dir: dir.path().to_path_buf() };
        let descriptor = FileDescriptor {
            source_type: SourceType::Local,
            container: None,
            path: "missing.bin".to_string(),
        };
        let err = source.size_and_stream(&descriptor).await.unwrap_err();
        assert!(matches!(err, ObjectStoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn local_file_source_reads_full_contents() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.bin"), b"hello world").await.unwrap();
        let source = LocalFiles { base_dir: dir.path().to_path_buf() };
        let descriptor = FileDescriptor {
            source_type: SourceType::Local,
            container: None,
            path: "a.bin".to_string(),
        };
        let (size, mut stream) = source.size_and_stream(&descriptor).await.unwrap();
        assert_eq!(size, 11);
        let mut collected = Vec::new();
        while let Some(chunk) = tokio_stream::StreamExt::next(&mut stream).await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, b"hello world");
    }

    #[tokio::test]
    async fn local_received_file_storage_keeps_file_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        tokio::fs::write(&path, b"data").await.unwrap();
        let storage = LocalFiles { base_dir: dir.path().to_path_buf() };
        let location = storage.store(&path, "a.bin").await.unwrap();
        assert_eq!(location, StoredLocation::Local(path));
    }

    #[tokio::test]
    async fn unconfigured_provider_errors_clearly() {
        let provider = UnconfiguredProvider(SourceType::Azure);
        let descriptor = FileDescriptor { source_type: SourceType::Azure, container: Some("c".into()), path: "a".into() };
        let err = provider.size_and_stream(&descriptor).await.unwrap_err();
        assert!(matches!(err, ObjectStoreError::ProviderNotConfigured(SourceType::Azure)));
    }
}
