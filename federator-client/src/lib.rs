//! Consumer-side library: connects to one or more producers, opens a
//! Streaming Conductor per authorized (server, topic) pair (spec.md section
//! 4.8), writes received records to the local bus or completed files to the
//! configured Received-File Storage (section 4.7), and checkpoints progress
//! via the Offset Store Adapter (section 4.9).

pub mod assembler;
pub mod conductor;
pub mod config;
pub mod connections;
pub mod sink;
pub mod supervisor;
