//! Loads the local list of producer endpoints this consumer connects to.
//!
//! `ConnectionDescriptor` (spec.md section 3) is validated once at
//! construction; the Management Node's topology snapshot tells a consumer
//! *which* topics it may read, but not *where* each producer lives on the
//! network, so that mapping is local, file-backed configuration, read once
//! at startup. Grounded on `capture::config::Config`'s "parse once at
//! startup, fail loudly on a bad file" shape.

use federator_config::{ConnectionDescriptor, ConnectionDescriptorError};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Deserialize)]
struct RawConnection {
    client_name: String,
    client_key: String,
    server_name: String,
    server_host: String,
    server_port: Option<i64>,
    tls: Option<bool>,
}

#[derive(Debug, Error)]
pub enum LoadConnectionsError {
    #[error("failed to read connections config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse connections config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid connection descriptor for server {server_name:?}: {source}")]
    Invalid {
        server_name: String,
        #[source]
        source: ConnectionDescriptorError,
    },
}

/// Reads a JSON array of connection descriptors from `path`, validating each
/// one via [`ConnectionDescriptor::new`].
pub fn load_connections(path: &str) -> Result<Vec<ConnectionDescriptor>, LoadConnectionsError> {
    let raw = std::fs::read_to_string(path)?;
    let entries: Vec<RawConnection> = serde_json::from_str(&raw)?;

    entries
        .into_iter()
        .map(|entry| {
            let server_name = entry.server_name.clone();
            ConnectionDescriptor::new(
                entry.client_name,
                entry.client_key,
                entry.server_name,
                entry.server_host,
                entry.server_port,
                entry.tls,
            )
            .map_err(|source| LoadConnectionsError::Invalid { server_name, source })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_and_validates_a_connections_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connections.json");
        std::fs::write(
            &path,
            r#"[{"client_name":"consumer-a","client_key":"k","server_name":"Acme","server_host":"acme.example.com","server_port":8443,"tls":true}]"#,
        )
        .unwrap();

        let connections = load_connections(path.to_str().unwrap()).unwrap();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].server_name, "Acme");
        assert_eq!(connections[0].server_port, 8443);
        assert!(connections[0].tls);
    }

    #[test]
    fn rejects_an_invalid_descriptor_with_the_server_name_in_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connections.json");
        std::fs::write(
            &path,
            r#"[{"client_name":"consumer-a","client_key":"k","server_name":"bad-name","server_host":"h"}]"#,
        )
        .unwrap();

        let err = load_connections(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, LoadConnectionsError::Invalid { server_name, .. } if server_name == "bad-name"));
    }
}
