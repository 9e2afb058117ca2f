//! Connection descriptors, the producer/consumer topology tree, the
//! Configuration Resolver, and the Job Scheduler (spec.md sections 3, 4.3,
//! 4.10).

mod connection;
mod job_scheduler;
mod model;
mod resolver;

pub use connection::{ConnectionDescriptor, ConnectionDescriptorError};
pub use job_scheduler::{JobHandler, JobParams, JobScheduler};
pub use model::{ConsumerEntry, ConsumerProducerLink, ProducerEntry, Product, StreamKind, TopologySnapshot};
pub use resolver::{ConfigurationResolver, ResolverError};
