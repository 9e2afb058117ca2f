//! `ConnectionDescriptor` (spec.md section 3): immutable, validated once at
//! construction. Grounded on `capture::config::Config`'s envconfig-derived
//! struct shape, generalized with explicit validation since this value is
//! constructed from a config file rather than purely from env vars.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectionDescriptorError {
    #[error("clientName must not be blank")]
    BlankClientName,
    #[error("clientKey must not be blank")]
    BlankClientKey,
    #[error("serverName must be alphanumeric and non-blank, got {0:?}")]
    InvalidServerName(String),
    #[error("serverHost must not be blank")]
    BlankServerHost,
    #[error("serverPort must be non-negative, got {0}")]
    NegativeServerPort(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub client_name: String,
    pub client_key: String,
    pub server_name: String,
    pub server_host: String,
    pub server_port: u16,
    pub tls: bool,
}

impl ConnectionDescriptor {
    /// Validates and constructs a descriptor. `server_port` is `None` to take
    /// the default of 8080; `tls` is `None` to take the default of `false`.
    pub fn new(
        client_name: impl Into<String>,
        client_key: impl Into<String>,
        server_name: impl Into<String>,
        server_host: impl Into<String>,
        server_port: Option<i64>,
        tls: Option<bool>,
    ) -> Result<Self, ConnectionDescriptorError> {
        let client_name = client_name.into();
        let client_key = client_key.into();
        let server_name = server_name.into();
        let server_host = server_host.into();

        if client_name.trim().is_empty() {
            return Err(ConnectionDescriptorError::BlankClientName);
        }
        if client_key.trim().is_empty() {
            return Err(ConnectionDescriptorError::BlankClientKey);
        }
        if server_name.trim().is_empty() || !server_name.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConnectionDescriptorError::InvalidServerName(server_name));
        }
        if server_host.trim().is_empty() {
            return Err(ConnectionDescriptorError::BlankServerHost);
        }
        let server_port = match server_port {
            Some(p) if p < 0 => return Err(ConnectionDescriptorError::NegativeServerPort(p)),
            Some(p) => p as u16,
            None => 8080,
        };

        Ok(Self {
            client_name,
            client_key,
            server_name,
            server_host,
            server_port,
            tls: tls.unwrap_or(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in_port_and_tls() {
        let d = ConnectionDescriptor::new("c", "k", "Server1", "host", None, None).unwrap();
        assert_eq!(d.server_port, 8080);
        assert!(!d.tls);
    }

    #[test]
    fn rejects_blank_client_name() {
        assert_eq!(
            ConnectionDescriptor::new("", "k", "Server1", "host", None, None).unwrap_err(),
            ConnectionDescriptorError::BlankClientName
        );
    }

    #[test]
    fn rejects_blank_client_key() {
        assert_eq!(
            ConnectionDescriptor::new("c", "  ", "Server1", "host", None, None).unwrap_err(),
            ConnectionDescriptorError::BlankClientKey
        );
    }

    #[test]
    fn rejects_non_alphanumeric_server_name() {
        assert!(matches!(
            ConnectionDescriptor::new("c", "k", "server-1", "host", None, None).unwrap_err(),
            ConnectionDescriptorError::InvalidServerName(_)
        ));
    }

    #[test]
    fn rejects_blank_server_host() {
        assert_eq!(
            ConnectionDescriptor::new("c", "k", "Server1", "", None, None).unwrap_err(),
            ConnectionDescriptorError::BlankServerHost
        );
    }

    #[test]
    fn rejects_negative_server_port() {
        assert_eq!(
            ConnectionDescriptor::new("c", "k", "Server1", "host", Some(-1), None).unwrap_err(),
            ConnectionDescriptorError::NegativeServerPort(-1)
        );
    }

    #[test]
    fn accepts_explicit_port_and_tls() {
        let d = ConnectionDescriptor::new("c", "k", "Server1", "host", Some(9443), Some(true)).unwrap();
        assert_eq!(d.server_port, 9443);
        assert!(d.tls);
    }
}
