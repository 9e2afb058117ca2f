//! Generated wire types and tonic client/server stubs for the federation RPC.
//!
//! Field numbering in `proto/federator.proto` must stay stable across
//! releases — producers and consumers on either side of an organizational
//! boundary upgrade independently.

pub mod federator {
    pub mod v1 {
        tonic::include_proto!("federator.v1");
    }
}

pub use federator::v1::*;
