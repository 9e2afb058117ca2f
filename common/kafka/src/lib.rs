//! Local event bus access. Producer-side per-request topic reads (spec.md
//! sections 4.5/4.6) and consumer-side sink writes (section 4.8), both
//! grounded on `common_kafka`'s `rdkafka`-backed shape.

pub mod config;
pub mod reader;
pub mod writer;

pub use config::KafkaConfig;
pub use reader::{KafkaRecord, ReaderError, TopicReader, PARTITION};
pub use writer::{TopicWriter, WriterError};
