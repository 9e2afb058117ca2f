//! Credential Broker: OAuth2 token fetch/cache and inbound JWT verification
//! (spec.md section 4.2).

mod config;
mod credential_broker;
mod error;
mod jwks;

pub use config::IdpConfig;
pub use credential_broker::{CredentialBroker, JwtToken};
pub use error::FederatorTokenError;
pub use jwks::{Jwk, Jwks};
