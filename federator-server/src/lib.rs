//! Producer-side library: the Record Stream Service and File Stream Service
//! (spec.md sections 4.5/4.6), the auth gate binding a caller id onto each
//! inbound call, and the tonic `Federator` service wiring them together.

pub mod auth_interceptor;
pub mod config;
pub mod file_stream;
pub mod record_stream;
pub mod service;
