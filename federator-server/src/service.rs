//! `Federator` gRPC service implementation (spec.md sections 4.1, 4.5, 4.6):
//! ties the auth gate's bound caller id, the Configuration Resolver's
//! authorization check, and the Record/File Stream Services together.

use std::pin::Pin;
use std::sync::Arc;

use common_kafka::{KafkaConfig, TopicReader};
use federator_config::ConfigurationResolver;
use federator_filter::FilterEngine;
use federator_objectstore::{FileSource, SourceType};
use federator_proto::federator_server::Federator;
use federator_proto::{ApiRequest, ApiTopics, FileStreamEvent, FileStreamRequest, KafkaByteBatch, TopicRequest};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tonic::{Request, Response, Status};
use tracing::warn;

use crate::auth_interceptor::CallerId;
use crate::file_stream::{FileStreamService, FileSourceResolver};
use crate::record_stream::RecordStreamService;

pub struct FederatorSourceResolver {
    pub local: Arc<dyn FileSource>,
    pub s3: Option<Arc<dyn FileSource>>,
}

impl FileSourceResolver for FederatorSourceResolver {
    fn resolve(&self, source_type: SourceType) -> Arc<dyn FileSource> {
        match source_type {
            SourceType::Local => self.local.clone(),
            SourceType::S3 => self
                .s3
                .clone()
                .unwrap_or_else(|| Arc::new(federator_objectstore::UnconfiguredProvider(SourceType::S3))),
            other => Arc::new(federator_objectstore::UnconfiguredProvider(other)),
        }
    }
}

pub struct FederatorService {
    pub resolver: Arc<ConfigurationResolver>,
    pub filter_engine: FilterEngine,
    pub kafka: KafkaConfig,
    pub file_source_resolver: Arc<dyn FileSourceResolver>,
    pub chunk_size: usize,
    pub shared_headers: Option<std::collections::HashSet<String>>,
}

fn caller_id(request: &Request<impl Sized>) -> Result<String, Status> {
    request
        .extensions()
        .get::<CallerId>()
        .map(|c| c.0.clone())
        .ok_or_else(|| Status::unauthenticated("no caller identity bound to this call"))
}

#[tonic::async_trait]
impl Federator for FederatorService {
    type GetRecordsStream = Pin<Box<dyn Stream<Item = Result<KafkaByteBatch, Status>> + Send>>;
    type GetFilesStream = Pin<Box<dyn Stream<Item = Result<FileStreamEvent, Status>> + Send>>;

    async fn get_records(
        &self,
        request: Request<TopicRequest>,
    ) -> Result<Response<Self::GetRecordsStream>, Status> {
        let caller = caller_id(&request)?;
        let req = request.into_inner();

        if req.topic.trim().is_empty() {
            return Err(Status::invalid_argument("topic must not be blank"));
        }

        let snapshot = self.resolver.snapshot();
        if !snapshot.has_consumer_access(&caller, &req.topic) {
            warn!(client_id = %caller, topic = %req.topic, "unauthorized GetRecords request");
            return Err(Status::permission_denied("caller is not authorized for this topic"));
        }

        let required_attributes = snapshot.filter_attributes_for(&caller, &req.topic);
        drop(snapshot);

        let reader = TopicReader::open(&self.kafka, &req.topic, req.offset)
            .map_err(|e| Status::unavailable(format!("failed to open topic reader: {e}")))?;

        let rx = RecordStreamService::stream(
            reader,
            self.filter_engine.clone(),
            required_attributes,
            self.shared_headers.clone(),
            self.kafka.kafka_poll_records,
            self.kafka.poll_duration(),
            req.topic,
            caller,
        );

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn get_files(
        &self,
        request: Request<FileStreamRequest>,
    ) -> Result<Response<Self::GetFilesStream>, Status> {
        let caller = caller_id(&request)?;
        let req = request.into_inner();

        if req.topic.trim().is_empty() {
            return Err(Status::invalid_argument("topic must not be blank"));
        }

        let snapshot = self.resolver.snapshot();
        if !snapshot.has_consumer_access(&caller, &req.topic) {
            warn!(client_id = %caller, topic = %req.topic, "unauthorized GetFiles request");
            return Err(Status::permission_denied("caller is not authorized for this topic"));
        }
        drop(snapshot);

        let reader = TopicReader::open(&self.kafka, &req.topic, req.start_sequence_id)
            .map_err(|e| Status::unavailable(format!("failed to open topic reader: {e}")))?;

        let rx = FileStreamService::stream(
            reader,
            self.file_source_resolver.clone(),
            self.chunk_size,
            req.topic,
            req.start_sequence_id,
        );

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn get_topics(&self, request: Request<ApiRequest>) -> Result<Response<ApiTopics>, Status> {
        let caller = caller_id(&request)?;
        let snapshot = self.resolver.snapshot();
        let topics = snapshot
            .producers_for_consumer(&caller)
            .into_iter()
            .map(|link| link.topic.clone())
            .collect();
        Ok(Response::new(ApiTopics { topics }))
    }
}
